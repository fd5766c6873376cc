//! Width allocator — proportional scaling of ideal widths into a system's
//! assigned width.
//!
//! `actual_i = ideal_i × (width / Σ ideal)`, so every pairwise ratio
//! `actual_i / actual_j == ideal_i / ideal_j` holds exactly.

use num_traits::{One, Zero};

use crate::model::Stack;
use crate::rational::Rational;

/// `width / Σ ideal` for the stacks of one system (1 for an empty system).
pub fn scale_factor(stacks: &[Stack], width: &Rational) -> Rational {
    let total: Rational = stacks.iter().map(|s| &s.ideal_width).sum();
    if total.is_zero() {
        return Rational::one();
    }
    width / total
}

/// Final widths for the stacks of one system.
pub fn allocate(stacks: &[Stack], width: &Rational) -> Vec<Rational> {
    apply_scale(stacks, &scale_factor(stacks, width))
}

/// Multiply every ideal width by `scale`.
///
/// The `min_width` clamp never fires for a system that passed the break
/// optimizer's feasibility check; if it does, that check is broken.
pub fn apply_scale(stacks: &[Stack], scale: &Rational) -> Vec<Rational> {
    stacks
        .iter()
        .map(|stack| {
            let actual = &stack.ideal_width * scale;
            debug_assert!(
                actual >= stack.min_width,
                "clamp fired for stack {}: {actual} < {}",
                stack.source_index,
                stack.min_width
            );
            if actual < stack.min_width {
                log::error!(
                    "stack {}: scaled width {actual} fell below min width {}; clamping",
                    stack.source_index,
                    stack.min_width
                );
                stack.min_width.clone()
            } else {
                actual
            }
        })
        .collect()
}
