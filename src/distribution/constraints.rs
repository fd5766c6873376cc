//! Constraint preprocessor — turns raw stacks plus user constraints into
//! independent optimization problems.
//!
//! Applied in a fixed order:
//! 1. width overrides (per stack, by `source_index`)
//! 2. forced breaks (split the sequence into partitions)
//! 3. keep-together ranges (merge stacks into atomic units)

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::breaker::{split_at, Extent};
use crate::error::{DistributionError, Result};
use crate::model::{KeepTogether, Stack, WidthOverride};
use crate::rational::Rational;

/// User constraints for one distribution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Constraints {
    /// Positions where a new system must start
    pub forced_breaks: BTreeSet<usize>,
    /// Positions where a new page (and therefore a new system) must start
    pub forced_page_breaks: BTreeSet<usize>,
    pub keep_together: Vec<KeepTogether>,
    pub overrides: Vec<WidthOverride>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forced_break(mut self, position: usize) -> Self {
        self.forced_breaks.insert(position);
        self
    }

    pub fn with_forced_page_break(mut self, position: usize) -> Self {
        self.forced_page_breaks.insert(position);
        self
    }

    pub fn with_keep_together(mut self, start: usize, end: usize) -> Self {
        self.keep_together.push(KeepTogether { start, end });
        self
    }

    pub fn with_override(mut self, width_override: WidthOverride) -> Self {
        self.overrides.push(width_override);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Units and partitions
// ═══════════════════════════════════════════════════════════════════════

/// One stack, or several stacks that may not be separated.
///
/// Aggregates keep per-member information (`Σ ideal²`, tightest
/// `min / ideal`) so grouping never changes costs or feasibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub span: Range<usize>,
    pub min_width: Rational,
    pub ideal_width: Rational,
    pub ideal_square_sum: Rational,
    pub tightest_ratio: Rational,
}

impl Unit {
    pub fn single(position: usize, stack: &Stack) -> Self {
        Self {
            span: position..position + 1,
            min_width: stack.min_width.clone(),
            ideal_width: stack.ideal_width.clone(),
            ideal_square_sum: &stack.ideal_width * &stack.ideal_width,
            tightest_ratio: &stack.min_width / &stack.ideal_width,
        }
    }

    fn absorb(&mut self, stack: &Stack) {
        self.span.end += 1;
        self.min_width += &stack.min_width;
        self.ideal_width += &stack.ideal_width;
        self.ideal_square_sum += &stack.ideal_width * &stack.ideal_width;
        let ratio = &stack.min_width / &stack.ideal_width;
        if ratio > self.tightest_ratio {
            self.tightest_ratio = ratio;
        }
    }
}

impl Extent for Unit {
    fn span(&self) -> Range<usize> {
        self.span.clone()
    }
    fn min_extent(&self) -> &Rational {
        &self.min_width
    }
    fn ideal_extent(&self) -> &Rational {
        &self.ideal_width
    }
    fn ideal_square_sum(&self) -> &Rational {
        &self.ideal_square_sum
    }
    fn tightest_ratio(&self) -> &Rational {
        &self.tightest_ratio
    }
}

/// A run of stacks between forced breaks, optimized on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub span: Range<usize>,
    pub units: Vec<Unit>,
}

/// Stacks after overrides, split into partitions of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub stacks: Vec<Stack>,
    pub partitions: Vec<Partition>,
}

// ═══════════════════════════════════════════════════════════════════════
// Preprocessing
// ═══════════════════════════════════════════════════════════════════════

pub fn prepare(stacks: &[Stack], constraints: &Constraints) -> Result<Prepared> {
    debug_assert!(
        stacks
            .iter()
            .all(|s| s.min_width > Rational::zero() && s.min_width <= s.ideal_width),
        "stacks must satisfy 0 < min_width <= ideal_width"
    );

    let stacks = apply_overrides(stacks, &constraints.overrides)?;
    let n = stacks.len();

    let mut forced = BTreeSet::new();
    for &index in constraints
        .forced_breaks
        .iter()
        .chain(&constraints.forced_page_breaks)
    {
        if index > n {
            return Err(DistributionError::ForcedBreakOutOfRange { index, len: n });
        }
        forced.insert(index);
    }

    let joined = joined_boundaries(n, &constraints.keep_together, &forced)?;

    let partitions = split_at(n, &forced)
        .into_iter()
        .map(|span| Partition {
            units: group(&stacks, span.clone(), &joined),
            span,
        })
        .collect();

    Ok(Prepared { stacks, partitions })
}

fn apply_overrides(stacks: &[Stack], overrides: &[WidthOverride]) -> Result<Vec<Stack>> {
    let mut stacks = stacks.to_vec();
    if overrides.is_empty() {
        return Ok(stacks);
    }

    let positions: HashMap<usize, usize> = stacks
        .iter()
        .enumerate()
        .map(|(position, s)| (s.source_index, position))
        .collect();

    for o in overrides {
        let source_index = o.source_index;
        let position = *positions
            .get(&source_index)
            .ok_or(DistributionError::UnknownStack { source_index })?;
        let stack = &mut stacks[position];

        if let Some(ref min) = o.min_width {
            if min <= &Rational::zero() {
                return Err(DistributionError::InvalidOverride {
                    source_index,
                    message: format!("min width {min} is not positive"),
                });
            }
            if min < &stack.min_width {
                log::warn!(
                    "override for stack {source_index} would lower the collision floor {} \
                     to {min}; keeping the floor",
                    stack.min_width
                );
            } else {
                stack.min_width = min.clone();
            }
        }

        if let Some(ref ideal) = o.ideal_width {
            if ideal <= &Rational::zero() {
                return Err(DistributionError::InvalidOverride {
                    source_index,
                    message: format!("ideal width {ideal} is not positive"),
                });
            }
            stack.ideal_width = ideal.clone();
        }

        if stack.ideal_width < stack.min_width {
            log::warn!(
                "stack {source_index}: ideal width {} is below min width {}; raising ideal to min",
                stack.ideal_width,
                stack.min_width
            );
            stack.ideal_width = stack.min_width.clone();
        }
    }

    Ok(stacks)
}

/// `joined[b]` is true when no break may fall at boundary `b`.
fn joined_boundaries(
    n: usize,
    ranges: &[KeepTogether],
    forced: &BTreeSet<usize>,
) -> Result<Vec<bool>> {
    let mut joined = vec![false; n + 1];
    for &KeepTogether { start, end } in ranges {
        if start >= end || end > n {
            return Err(DistributionError::InvalidKeepTogether { start, end, len: n });
        }
        if let Some(&index) = forced.range(start + 1..end).next() {
            return Err(DistributionError::ConflictingConstraints { start, end, index });
        }
        joined[start + 1..end].fill(true);
    }
    Ok(joined)
}

fn group(stacks: &[Stack], span: Range<usize>, joined: &[bool]) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::with_capacity(span.len());
    for position in span {
        let stack = &stacks[position];
        match units.last_mut() {
            Some(unit) if joined[position] => unit.absorb(stack),
            _ => units.push(Unit::single(position, stack)),
        }
    }
    units
}
