//! Measure distribution — partitions stacks into systems and pages and
//! computes every stack's final width.
//!
//! Pipeline, in order:
//! 1. [`constraints::prepare`] applies overrides, forced breaks and
//!    keep-together groups
//! 2. [`breaker`] picks system breaks per forced-break partition
//! 3. [`allocator`] scales ideal widths into each system
//! 4. [`pages`] picks page breaks over the finished systems
//!
//! [`plan`] runs the pipeline as a pure function. [`Distributor`] adds the
//! [`DistributionCache`] with incremental updates after edits and bounded
//! reflows requested by downstream stages.

pub mod allocator;
pub mod breaker;
pub mod cache;
pub mod constraints;
pub mod pages;

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_traits::Zero;
use serde::Serialize;

pub use cache::{CacheEntry, CacheSnapshot, DistributionCache};
pub use constraints::Constraints;

use crate::config::{self, DistributionConfig};
use crate::error::{DistributionError, Result};
use crate::model::*;
use crate::policy::{BreakPenalty, BudgetPolicy, NoPenalty, PageBudget};
use crate::rational::{int, Rational};
use cache::{index_entries, PartitionState};
use constraints::Partition;

// ═══════════════════════════════════════════════════════════════════════
// Cancellation and policies
// ═══════════════════════════════════════════════════════════════════════

/// Cooperative cancellation flag, checked once per outer DP step.
///
/// A cancelled pass is abandoned wholesale; nothing it computed reaches
/// the cache.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The externally supplied functions one pass runs with.
#[derive(Clone)]
pub struct Policies {
    /// Width budget per candidate system (stack positions)
    pub width: Arc<dyn BudgetPolicy>,
    /// Height budget per candidate page (system indices)
    pub height: Arc<dyn BudgetPolicy>,
    pub penalty: Arc<dyn BreakPenalty>,
    /// Height of a system whose stacks carry no height of their own
    pub system_height: Rational,
}

impl Policies {
    pub fn new(width: impl BudgetPolicy + 'static) -> Self {
        Self {
            width: Arc::new(width),
            height: Arc::new(PageBudget {
                height: int(config::DEFAULT_PAGE_HEIGHT),
                system_gap: int(config::DEFAULT_SYSTEM_GAP),
            }),
            penalty: Arc::new(NoPenalty),
            system_height: int(config::DEFAULT_SYSTEM_HEIGHT),
        }
    }

    pub fn with_height(mut self, height: impl BudgetPolicy + 'static) -> Self {
        self.height = Arc::new(height);
        self
    }

    pub fn with_penalty(mut self, penalty: impl BreakPenalty + 'static) -> Self {
        self.penalty = Arc::new(penalty);
        self
    }

    pub fn with_system_height(mut self, height: Rational) -> Self {
        self.system_height = height;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════

/// Run the whole stage on `stacks` without touching any cache.
pub fn plan(stacks: &[Stack], policies: &Policies, constraints: &Constraints) -> Result<Outcome> {
    Ok(run(stacks, policies, constraints, None, None)?.outcome)
}

/// [`plan`], abandoned with [`DistributionError::Cancelled`] once `cancel`
/// fires.
pub fn plan_cancellable(
    stacks: &[Stack],
    policies: &Policies,
    constraints: &Constraints,
    cancel: &CancelToken,
) -> Result<Outcome> {
    Ok(run(stacks, policies, constraints, Some(cancel), None)?.outcome)
}

/// One pass. With `previous`, partitions whose stacks are unchanged reuse
/// their DP table and systems reuse their widths.
///
/// A changed partition resumes its DP at the first changed unit; every
/// prefix entry after that point is solved again, because each one carries
/// the cost of its whole prefix. Reconvergence is only exploited when the
/// systems are built: a system with the same range and stacks as before is
/// copied rather than re-allocated.
pub(crate) fn run(
    stacks: &[Stack],
    policies: &Policies,
    constraints: &Constraints,
    cancel: Option<&CancelToken>,
    previous: Option<&CacheSnapshot>,
) -> Result<CacheSnapshot> {
    let prepared = constraints::prepare(stacks, constraints)?;
    let effective = prepared.stacks;
    let penalty = |start: usize, end: usize| policies.penalty.penalty(&effective, start, end);

    let mut partitions = Vec::with_capacity(prepared.partitions.len());
    for partition in prepared.partitions {
        let resume = previous.and_then(|prev| resume_point(prev, &effective, &partition));
        let table = match resume {
            Some((old, keep)) if keep == partition.units.len() => old.table.clone(),
            Some((old, keep)) => breaker::solve(
                &partition.units,
                &*policies.width,
                &penalty,
                Some((&old.table, keep)),
                cancel,
            )?,
            None => breaker::solve(&partition.units, &*policies.width, &penalty, None, cancel)?,
        };
        partitions.push(PartitionState {
            valid_prefix: partition.units.len(),
            span: partition.span,
            units: partition.units,
            table,
        });
    }

    let outcome = assemble(&effective, &partitions, policies, constraints, previous);
    let entries = outcome
        .layout()
        .map(|layout| index_entries(&effective, layout))
        .unwrap_or_default();

    Ok(CacheSnapshot {
        inputs: stacks.to_vec(),
        effective,
        constraints: constraints.clone(),
        base_constraints: constraints.clone(),
        partitions,
        outcome,
        entries,
        reflows_used: 0,
    })
}

/// The cached table for `partition` and how many of its units are still
/// valid, when the grouping is unchanged.
fn resume_point<'a>(
    previous: &'a CacheSnapshot,
    effective: &[Stack],
    partition: &Partition,
) -> Option<(&'a PartitionState, usize)> {
    let old = previous.partitions.iter().find(|p| p.span == partition.span)?;
    let same_grouping = old.units.len() == partition.units.len()
        && old.units.iter().zip(&partition.units).all(|(a, b)| a.span == b.span);
    if !same_grouping {
        return None;
    }

    let changed_unit = partition
        .span
        .clone()
        .find(|&p| {
            previous
                .effective
                .get(p)
                .map_or(true, |old| !same_widths(old, &effective[p]))
        })
        .map_or(partition.units.len(), |p| {
            partition
                .units
                .iter()
                .position(|u| u.span.contains(&p))
                .unwrap_or(0)
        });

    Some((old, changed_unit.min(old.valid_prefix)))
}

fn same_widths(a: &Stack, b: &Stack) -> bool {
    a.min_width == b.min_width && a.ideal_width == b.ideal_width
}

fn assemble(
    effective: &[Stack],
    partitions: &[PartitionState],
    policies: &Policies,
    constraints: &Constraints,
    previous: Option<&CacheSnapshot>,
) -> Outcome {
    let mut systems: Vec<SystemLayout> = Vec::new();
    let mut breaks = vec![0];
    let mut cost = Rational::zero();

    for state in partitions {
        let Some((unit_breaks, segment_costs)) = state.table.path() else {
            let stuck = state.table.stuck_at();
            let position = state
                .units
                .get(stuck)
                .map_or(state.span.start, |u| u.span.start);
            log::debug!(
                "system pass infeasible: stack {position} unreachable in {:?}",
                state.span
            );
            return Outcome::Infeasible(Infeasibility {
                level: BreakLevel::System,
                position,
                partition: state.span.clone(),
            });
        };

        for (pair, segment_cost) in unit_breaks.windows(2).zip(segment_costs) {
            let stacks = state.units[pair[0]].span.start..state.units[pair[1] - 1].span.end;
            cost += &segment_cost;
            breaks.push(stacks.end);
            let index = systems.len();
            systems.push(build_system(index, stacks, segment_cost, effective, policies, previous));
        }
    }

    log::debug!(
        "system pass: {} stacks in {} systems, cost {cost}",
        effective.len(),
        systems.len()
    );

    let forced_starts = page_starts(&systems, constraints);
    match pages::optimize_pages(&systems, &*policies.height, &forced_starts) {
        Ok(plan) => Outcome::Feasible(Layout {
            system_breaks: Segmentation { breaks, cost },
            page_breaks: plan.segmentation,
            systems,
            pages: plan.pages,
        }),
        Err(report) => Outcome::Infeasible(report),
    }
}

fn build_system(
    index: usize,
    stacks: Range<usize>,
    cost: Rational,
    effective: &[Stack],
    policies: &Policies,
    previous: Option<&CacheSnapshot>,
) -> SystemLayout {
    let members = &effective[stacks.clone()];

    let unchanged = previous.and_then(|prev| {
        let old = prev
            .outcome
            .layout()?
            .systems
            .iter()
            .find(|s| s.stacks == stacks)?;
        (prev.effective.get(stacks.clone()) == Some(members)).then_some(old)
    });
    if let Some(old) = unchanged {
        return SystemLayout {
            index,
            cost,
            ..old.clone()
        };
    }

    let width = policies.width.available(stacks.start, stacks.end);
    let scale = allocator::scale_factor(members, &width);
    SystemLayout {
        index,
        actual_widths: allocator::apply_scale(members, &scale),
        height: system_height(members, &policies.system_height),
        stacks,
        width,
        scale,
        cost,
    }
}

/// Tallest member height, never below `default`.
fn system_height(members: &[Stack], default: &Rational) -> Rational {
    members
        .iter()
        .filter_map(|s| s.height.as_ref())
        .fold(default, |tallest, h| if h > tallest { h } else { tallest })
        .clone()
}

/// Systems that must open a page.
fn page_starts(systems: &[SystemLayout], constraints: &Constraints) -> BTreeSet<usize> {
    systems
        .iter()
        .filter(|s| constraints.forced_page_breaks.contains(&s.stacks.start))
        .map(|s| s.index)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Distributor
// ═══════════════════════════════════════════════════════════════════════

/// How [`Distributor::update`] produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecomputePath {
    /// Inputs identical to the cached ones
    Unchanged,
    /// System membership provably unchanged; no system DP re-run
    FastPath,
    /// Changed partitions re-optimized from their first changed unit
    Ripple,
    /// Everything recomputed
    Full,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub outcome: Outcome,
    pub path: RecomputePath,
    /// Positions whose input stack differs from the cached one
    pub changed: Vec<usize>,
}

/// Distribution stage with a cache for incremental recomputation.
pub struct Distributor {
    policies: Policies,
    constraints: Constraints,
    max_reflows: usize,
    cache: DistributionCache,
}

impl Distributor {
    pub fn new(policies: Policies) -> Self {
        Self {
            policies,
            constraints: Constraints::default(),
            max_reflows: config::DEFAULT_MAX_REFLOWS,
            cache: DistributionCache::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_max_reflows(mut self, limit: usize) -> Self {
        self.max_reflows = limit;
        self
    }

    pub fn from_config(config: &DistributionConfig) -> Result<Self> {
        Ok(Self::new(config.policies()?)
            .with_constraints(config.constraints.clone())
            .with_max_reflows(config.max_reflows))
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn cache(&self) -> &DistributionCache {
        &self.cache
    }

    /// Full pass; replaces the cache and starts a new layout cycle.
    pub fn distribute(&self, stacks: &[Stack]) -> Result<Outcome> {
        self.full(stacks, None)
    }

    /// [`distribute`](Self::distribute) that leaves the cache untouched when
    /// cancelled.
    pub fn distribute_cancellable(
        &self,
        stacks: &[Stack],
        cancel: &CancelToken,
    ) -> Result<Outcome> {
        self.full(stacks, Some(cancel))
    }

    fn full(&self, stacks: &[Stack], cancel: Option<&CancelToken>) -> Result<Outcome> {
        let expected = self.cache.load();
        let snapshot = run(stacks, &self.policies, &self.constraints, cancel, None)?;
        self.commit(&expected, snapshot)
    }

    /// Publish `snapshot` if the cache still holds the snapshot it was
    /// derived from.
    fn commit(
        &self,
        expected: &Option<Arc<CacheSnapshot>>,
        snapshot: CacheSnapshot,
    ) -> Result<Outcome> {
        let outcome = snapshot.outcome.clone();
        if !self.cache.compare_and_store(expected, Arc::new(snapshot)) {
            log::debug!("discarding superseded distribution pass");
            return Err(DistributionError::Superseded);
        }
        Ok(outcome)
    }

    /// Recompute after an edit, doing as little work as the change allows.
    ///
    /// Stays within the current layout cycle: breaks held by earlier reflows
    /// and the reflow count carry over. A length change drops the held
    /// breaks, since their positions no longer line up, but keeps the
    /// reflow overrides and count.
    ///
    /// Fails with [`DistributionError::Superseded`] when another pass stored
    /// a newer snapshot while this one ran.
    pub fn update(&self, stacks: &[Stack]) -> Result<Update> {
        let expected = self.cache.load();
        let Some(previous) = expected.clone() else {
            return Ok(Update {
                outcome: self.distribute(stacks)?,
                path: RecomputePath::Full,
                changed: (0..stacks.len()).collect(),
            });
        };

        if previous.inputs.len() != stacks.len() || !previous.outcome.is_feasible() {
            let mut snapshot =
                run(stacks, &self.policies, &previous.base_constraints, None, None)?;
            snapshot.reflows_used = previous.reflows_used;
            return Ok(Update {
                outcome: self.commit(&expected, snapshot)?,
                path: RecomputePath::Full,
                changed: (0..stacks.len()).collect(),
            });
        }

        let changed: Vec<usize> = stacks
            .iter()
            .zip(&previous.inputs)
            .enumerate()
            .filter(|(_, (new, old))| new != old)
            .map(|(position, _)| position)
            .collect();
        if changed.is_empty() {
            return Ok(Update {
                outcome: previous.outcome.clone(),
                path: RecomputePath::Unchanged,
                changed,
            });
        }

        if let Some(snapshot) = self.fast_path(&previous, stacks)? {
            log::debug!("fast path for {} changed stacks", changed.len());
            return Ok(Update {
                outcome: self.commit(&expected, snapshot)?,
                path: RecomputePath::FastPath,
                changed,
            });
        }

        log::debug!("ripple recompute for {} changed stacks", changed.len());
        let mut snapshot = run(
            stacks,
            &self.policies,
            &previous.constraints,
            None,
            Some(&*previous),
        )?;
        snapshot.base_constraints = previous.base_constraints.clone();
        snapshot.reflows_used = previous.reflows_used;
        Ok(Update {
            outcome: self.commit(&expected, snapshot)?,
            path: RecomputePath::Ripple,
            changed,
        })
    }

    /// Apply an edit without re-running the system DP, if that is exact.
    ///
    /// Costs depend only on ideal widths, so when every changed stack keeps
    /// its ideal width and only raises its min width to at most its current
    /// actual width, the cached segmentation stays feasible, keeps its cost,
    /// and every alternative can only get worse. Height changes re-run only
    /// the page pass.
    fn fast_path(
        &self,
        previous: &CacheSnapshot,
        stacks: &[Stack],
    ) -> Result<Option<CacheSnapshot>> {
        let Some(layout) = previous.outcome.layout() else {
            return Ok(None);
        };
        let prepared = constraints::prepare(stacks, &previous.constraints)?;
        let actual = layout.actual_widths();

        let mut raised = Vec::new();
        let mut heights_changed = false;
        for (position, (new, old)) in prepared.stacks.iter().zip(&previous.effective).enumerate() {
            if new.ideal_width != old.ideal_width
                || new.min_width < old.min_width
                || new.min_width > actual[position]
            {
                return Ok(None);
            }
            if new.min_width != old.min_width {
                raised.push(position);
            }
            heights_changed |= new.height != old.height;
        }

        let partitions = prepared
            .partitions
            .into_iter()
            .zip(&previous.partitions)
            .map(|(partition, old)| {
                let first_raised = partition
                    .units
                    .iter()
                    .position(|u| raised.iter().any(|p| u.span.contains(p)));
                let valid_prefix =
                    first_raised.map_or(old.valid_prefix, |u| u.min(old.valid_prefix));
                PartitionState {
                    valid_prefix,
                    span: partition.span,
                    units: partition.units,
                    table: old.table.clone(),
                }
            })
            .collect();

        let mut layout = layout.clone();
        let outcome = if heights_changed {
            for system in &mut layout.systems {
                system.height = system_height(
                    &prepared.stacks[system.stacks.clone()],
                    &self.policies.system_height,
                );
            }
            let forced_starts = page_starts(&layout.systems, &previous.constraints);
            match pages::optimize_pages(&layout.systems, &*self.policies.height, &forced_starts) {
                Ok(plan) => {
                    layout.page_breaks = plan.segmentation;
                    layout.pages = plan.pages;
                    Outcome::Feasible(layout)
                }
                Err(report) => Outcome::Infeasible(report),
            }
        } else {
            Outcome::Feasible(layout)
        };

        let entries = outcome
            .layout()
            .map(|layout| index_entries(&prepared.stacks, layout))
            .unwrap_or_default();

        Ok(Some(CacheSnapshot {
            inputs: stacks.to_vec(),
            effective: prepared.stacks,
            constraints: previous.constraints.clone(),
            base_constraints: previous.base_constraints.clone(),
            partitions,
            outcome,
            entries,
            reflows_used: previous.reflows_used,
        }))
    }

    /// Re-run system breaking over the laid-out systems `systems` with extra
    /// width overrides, holding every break outside that range fixed.
    ///
    /// Downstream stages use this when finished geometry turns out locally
    /// unworkable. At most `max_reflows` reflows run per layout cycle. The
    /// held breaks and the extra overrides stay in force for later
    /// [`update`](Self::update)s until the next [`distribute`](Self::distribute).
    pub fn reflow(&self, systems: Range<usize>, overrides: Vec<WidthOverride>) -> Result<Outcome> {
        let expected = self.cache.load();
        let previous = expected.as_ref().ok_or(DistributionError::NoLayout)?;
        let layout = previous.outcome.layout().ok_or(DistributionError::NoLayout)?;

        let count = layout.systems.len();
        if systems.start >= systems.end || systems.end > count {
            return Err(DistributionError::InvalidReflowRange {
                start: systems.start,
                end: systems.end,
                count,
            });
        }
        if previous.reflows_used >= self.max_reflows {
            return Err(DistributionError::ReflowLimit {
                limit: self.max_reflows,
            });
        }

        let region =
            layout.systems[systems.start].stacks.start..layout.systems[systems.end - 1].stacks.end;

        let mut base = previous.base_constraints.clone();
        base.overrides.extend(overrides);
        let mut held = base.clone();
        held.forced_breaks.extend(
            layout
                .system_breaks
                .breaks
                .iter()
                .copied()
                .filter(|&b| b <= region.start || b >= region.end),
        );

        let mut snapshot = run(&previous.inputs, &self.policies, &held, None, Some(&**previous))?;
        snapshot.base_constraints = base;
        snapshot.reflows_used = previous.reflows_used + 1;
        log::debug!(
            "reflow {}/{} over systems {systems:?} (stacks {region:?})",
            snapshot.reflows_used,
            self.max_reflows
        );
        self.commit(&expected, snapshot)
    }
}
