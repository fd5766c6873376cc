//! Break optimizer — capacity-constrained segmentation by dynamic
//! programming, generalized from paragraph line breaking.
//!
//! The optimizer is generic over [`Extent`]: stacks (or grouped stacks)
//! for system breaking, systems for page breaking.
//!
//! For each prefix length `t` (ascending) the candidate previous break `s`
//! is scanned from `t - 1` down to `0`. A segment `s..t` is feasible when
//! its minimum widths fit the budget and the uniform scale
//! `budget / Σ ideal` keeps every member at or above its minimum. Both
//! conditions only get harder as `s` moves left, so the scan stops at the
//! first infeasible segment. The running best is replaced only on strict
//! improvement; together with the loop directions this fixes which of
//! several equal-cost segmentations is returned.

use std::collections::BTreeSet;
use std::ops::Range;

use num_traits::{One, Zero};

use super::CancelToken;
use crate::error::{DistributionError, Result};
use crate::model::{Segmentation, Stack};
use crate::policy::{BreakPenalty, BudgetPolicy};
use crate::rational::Rational;

/// Something the optimizer can pack into segments.
pub trait Extent {
    /// Positions in the underlying sequence covered by this unit
    fn span(&self) -> Range<usize>;
    /// Σ of member minimum extents
    fn min_extent(&self) -> &Rational;
    /// Σ of member ideal extents
    fn ideal_extent(&self) -> &Rational;
    /// Σ of squared member ideal extents
    fn ideal_square_sum(&self) -> &Rational;
    /// Largest `min / ideal` over the members
    fn tightest_ratio(&self) -> &Rational;
}

// ═══════════════════════════════════════════════════════════════════════
// Segment math
// ═══════════════════════════════════════════════════════════════════════

/// Running sums over a candidate segment, extended leftwards one unit at a
/// time.
#[derive(Debug, Clone)]
pub struct SegmentStats {
    min: Rational,
    ideal: Rational,
    ideal_sq: Rational,
    tightest: Rational,
}

/// Scale and discomfort of a feasible segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fit {
    pub scale: Rational,
    pub cost: Rational,
}

impl Default for SegmentStats {
    fn default() -> Self {
        Self {
            min: Rational::zero(),
            ideal: Rational::zero(),
            ideal_sq: Rational::zero(),
            tightest: Rational::zero(),
        }
    }
}

impl SegmentStats {
    pub fn extend<U: Extent>(&mut self, unit: &U) {
        self.min += unit.min_extent();
        self.ideal += unit.ideal_extent();
        self.ideal_sq += unit.ideal_square_sum();
        if unit.tightest_ratio() > &self.tightest {
            self.tightest = unit.tightest_ratio().clone();
        }
    }

    /// Closed-form fit into `available`, or `None` when infeasible.
    ///
    /// Cost is `(scale - 1)² × Σ ideal²`.
    pub fn fit(&self, available: &Rational) -> Option<Fit> {
        if &self.min > available || self.ideal.is_zero() {
            return None;
        }
        let scale = available / &self.ideal;
        if scale < self.tightest {
            return None;
        }
        let deviation = &scale - Rational::one();
        let cost = &deviation * &deviation * &self.ideal_sq;
        Some(Fit { scale, cost })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// DP table
// ═══════════════════════════════════════════════════════════════════════

/// Best way to cover a prefix: total cost, where its last segment starts,
/// and that segment's own cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reach {
    pub(crate) cost: Rational,
    pub(crate) from: usize,
    pub(crate) segment_cost: Rational,
}

/// `reach[t]` is `None` when no feasible segmentation covers the first `t`
/// units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DpTable {
    pub(crate) reach: Vec<Option<Reach>>,
}

impl DpTable {
    fn seeded() -> Self {
        Self {
            reach: vec![Some(Reach {
                cost: Rational::zero(),
                from: 0,
                segment_cost: Rational::zero(),
            })],
        }
    }

    fn units(&self) -> usize {
        self.reach.len() - 1
    }

    /// Unit-index breaks of the optimal path and each segment's cost.
    pub(crate) fn path(&self) -> Option<(Vec<usize>, Vec<Rational>)> {
        let mut t = self.units();
        let mut breaks = vec![t];
        let mut costs = Vec::new();
        while t > 0 {
            let reach = self.reach[t].as_ref()?;
            costs.push(reach.segment_cost.clone());
            t = reach.from;
            breaks.push(t);
        }
        breaks.reverse();
        costs.reverse();
        Some((breaks, costs))
    }

    pub(crate) fn total_cost(&self) -> Option<&Rational> {
        self.reach.last()?.as_ref().map(|r| &r.cost)
    }

    /// First unit no feasible segmentation gets past.
    pub(crate) fn stuck_at(&self) -> usize {
        self.reach
            .iter()
            .rposition(|r| r.is_some())
            .unwrap_or(0)
            .min(self.units().saturating_sub(1))
    }
}

/// Run the DP over `units`, reusing `resume.0.reach[..=resume.1]` when a
/// previous table for an identical prefix is available.
pub(crate) fn solve<U: Extent>(
    units: &[U],
    budget: &dyn BudgetPolicy,
    penalty: &dyn Fn(usize, usize) -> Rational,
    resume: Option<(&DpTable, usize)>,
    cancel: Option<&CancelToken>,
) -> Result<DpTable> {
    let n = units.len();
    let mut table = match resume {
        Some((previous, valid)) => {
            let keep = valid.min(previous.units()).min(n);
            log::trace!("resuming break DP at unit {keep} of {n}");
            DpTable {
                reach: previous.reach[..=keep].to_vec(),
            }
        }
        None => DpTable::seeded(),
    };
    table.reach.reserve(n + 1 - table.reach.len());

    for t in table.reach.len()..=n {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(DistributionError::Cancelled);
        }
        let end = units[t - 1].span().end;
        let mut stats = SegmentStats::default();
        let mut best: Option<Reach> = None;

        for s in (0..t).rev() {
            let unit = &units[s];
            stats.extend(unit);
            let start = unit.span().start;
            let Some(fit) = stats.fit(&budget.available(start, end)) else {
                break;
            };
            let Some(prefix) = &table.reach[s] else {
                continue;
            };
            let segment_cost = fit.cost + penalty(start, end);
            let total = &prefix.cost + &segment_cost;
            if best.as_ref().map_or(true, |b| total < b.cost) {
                best = Some(Reach {
                    cost: total,
                    from: s,
                    segment_cost,
                });
            }
        }
        table.reach.push(best);
    }

    Ok(table)
}

// ═══════════════════════════════════════════════════════════════════════
// Public entry points
// ═══════════════════════════════════════════════════════════════════════

/// Optimal segmentation of `units`, breaks given as unit indices.
///
/// `penalty(start, end)` receives positions (see [`Extent::span`]).
/// Returns `None` when no segmentation is feasible.
pub fn optimize<U: Extent>(
    units: &[U],
    budget: &dyn BudgetPolicy,
    penalty: &dyn Fn(usize, usize) -> Rational,
) -> Option<Segmentation> {
    let table = solve(units, budget, penalty, None, None).ok()?;
    let (breaks, _) = table.path()?;
    let cost = table.total_cost()?.clone();
    Some(Segmentation { breaks, cost })
}

/// Optimal system breaks for ungrouped, unconstrained stacks.
pub fn optimize_stacks(
    stacks: &[Stack],
    width: &dyn BudgetPolicy,
    penalty: &dyn BreakPenalty,
) -> Option<Segmentation> {
    let units: Vec<_> = stacks
        .iter()
        .enumerate()
        .map(|(position, stack)| super::constraints::Unit::single(position, stack))
        .collect();
    optimize(&units, width, &|start, end| penalty.penalty(stacks, start, end))
}

/// Split `0..n` into independent runs at the given interior indices.
pub(crate) fn split_at(n: usize, cuts: &BTreeSet<usize>) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    let mut runs = Vec::new();
    let mut start = 0;
    for &cut in cuts.range(1..n) {
        runs.push(start..cut);
        start = cut;
    }
    runs.push(start..n);
    runs
}
