//! Width/height budgets and the soft break-penalty hook.
//!
//! A [`BudgetPolicy`] answers "how much room does the segment covering
//! positions `start..end` get?". The same trait serves as the width policy
//! for systems (positions are stack positions) and the height policy for
//! pages (positions are system indices).
//!
//! For a fixed `end`, the budget must not grow as `start` moves left. The
//! break optimizer stops scanning at the first infeasible segment and relies
//! on this to stay exact.

use std::collections::BTreeSet;

use crate::model::Stack;
use crate::rational::Rational;

// ═══════════════════════════════════════════════════════════════════════
// Budgets
// ═══════════════════════════════════════════════════════════════════════

pub trait BudgetPolicy: Send + Sync {
    /// Room available to the segment covering positions `start..end`.
    fn available(&self, start: usize, end: usize) -> Rational;
}

impl<F> BudgetPolicy for F
where
    F: Fn(usize, usize) -> Rational + Send + Sync,
{
    fn available(&self, start: usize, end: usize) -> Rational {
        self(start, end)
    }
}

/// The same budget for every segment.
#[derive(Debug, Clone)]
pub struct Uniform(pub Rational);

impl BudgetPolicy for Uniform {
    fn available(&self, _start: usize, _end: usize) -> Rational {
        self.0.clone()
    }
}

/// Full width everywhere except the first system, which loses `indent`
/// (room for instrument names).
#[derive(Debug, Clone)]
pub struct FirstSystemIndent {
    pub width: Rational,
    pub indent: Rational,
}

impl BudgetPolicy for FirstSystemIndent {
    fn available(&self, start: usize, _end: usize) -> Rational {
        if start == 0 {
            &self.width - &self.indent
        } else {
            self.width.clone()
        }
    }
}

/// Page height minus the gaps between the systems stacked on it.
#[derive(Debug, Clone)]
pub struct PageBudget {
    pub height: Rational,
    pub system_gap: Rational,
}

impl BudgetPolicy for PageBudget {
    fn available(&self, start: usize, end: usize) -> Rational {
        let gaps = end.saturating_sub(start).saturating_sub(1);
        &self.height - &self.system_gap * Rational::from_integer(gaps.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Penalties
// ═══════════════════════════════════════════════════════════════════════

/// Additive soft cost for closing a system over `stacks[start..end]`.
///
/// Penalties never affect feasibility. Implementations must depend only on
/// the positions and on the ideal widths of the stacks inside `start..end`:
/// the cache reuses DP prefixes and skips re-optimization on
/// min-width-only edits under that assumption.
pub trait BreakPenalty: Send + Sync {
    fn penalty(&self, stacks: &[Stack], start: usize, end: usize) -> Rational;
}

/// Constant zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPenalty;

impl BreakPenalty for NoPenalty {
    fn penalty(&self, _stacks: &[Stack], _start: usize, _end: usize) -> Rational {
        Rational::from_integer(0.into())
    }
}

/// Charges `cost` for every system whose right edge is not a preferred
/// break position (rehearsal marks, double bars). The final system is
/// exempt.
#[derive(Debug, Clone)]
pub struct PreferredBreaks {
    pub positions: BTreeSet<usize>,
    pub cost: Rational,
}

impl BreakPenalty for PreferredBreaks {
    fn penalty(&self, stacks: &[Stack], _start: usize, end: usize) -> Rational {
        if end >= stacks.len() || self.positions.contains(&end) {
            Rational::from_integer(0.into())
        } else {
            self.cost.clone()
        }
    }
}
