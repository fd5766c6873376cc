//! Distribution cache — the last computed result per stack, plus the DP
//! state needed to resume after an edit.
//!
//! The cache holds one immutable [`CacheSnapshot`] behind an
//! [`arc_swap::ArcSwapOption`]. Every recomputation builds a whole new
//! snapshot and swaps it in, so readers see either the old result or the
//! new one, never a mixture.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;

use super::breaker::DpTable;
use super::constraints::{Constraints, Unit};
use crate::model::{Layout, Outcome, Stack};
use crate::rational::{serde_str, Rational};

/// Last computed values for one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    #[serde(with = "serde_str")]
    pub min_width: Rational,
    #[serde(with = "serde_str")]
    pub ideal_width: Rational,
    #[serde(with = "serde_str")]
    pub actual_width: Rational,
    pub system_id: usize,
    pub page_id: usize,
}

/// DP state for one forced-break partition.
///
/// `table.reach[..=valid_prefix]` is known to match the current units.
#[derive(Debug, Clone)]
pub(crate) struct PartitionState {
    pub(crate) span: Range<usize>,
    pub(crate) units: Vec<Unit>,
    pub(crate) table: DpTable,
    pub(crate) valid_prefix: usize,
}

/// Everything one distribution pass produced.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    /// Stacks as supplied by the caller
    pub(crate) inputs: Vec<Stack>,
    /// Stacks after width overrides
    pub(crate) effective: Vec<Stack>,
    /// Constraints the cached partitions were built with
    pub(crate) constraints: Constraints,
    /// Constraints the next full re-optimization starts from
    pub(crate) base_constraints: Constraints,
    pub(crate) partitions: Vec<PartitionState>,
    pub(crate) outcome: Outcome,
    pub(crate) entries: HashMap<usize, CacheEntry>,
    pub(crate) reflows_used: usize,
}

impl CacheSnapshot {
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn entry(&self, source_index: usize) -> Option<&CacheEntry> {
        self.entries.get(&source_index)
    }

    pub fn entries(&self) -> &HashMap<usize, CacheEntry> {
        &self.entries
    }

    /// Stacks the snapshot was computed from.
    pub fn inputs(&self) -> &[Stack] {
        &self.inputs
    }

    pub fn reflows_used(&self) -> usize {
        self.reflows_used
    }
}

/// Per-stack entries keyed by `source_index`.
pub(crate) fn index_entries(effective: &[Stack], layout: &Layout) -> HashMap<usize, CacheEntry> {
    let mut entries = HashMap::with_capacity(effective.len());
    for system in &layout.systems {
        let page_id = layout.page_of(system.index).map_or(0, |p| p.index);
        for (position, actual) in system.stacks.clone().zip(&system.actual_widths) {
            let stack = &effective[position];
            let previous = entries.insert(
                stack.source_index,
                CacheEntry {
                    min_width: stack.min_width.clone(),
                    ideal_width: stack.ideal_width.clone(),
                    actual_width: actual.clone(),
                    system_id: system.index,
                    page_id,
                },
            );
            debug_assert!(previous.is_none(), "duplicate source_index {}", stack.source_index);
        }
    }
    entries
}

/// Atomic store for the current [`CacheSnapshot`].
#[derive(Debug, Default)]
pub struct DistributionCache {
    current: ArcSwapOption<CacheSnapshot>,
}

impl DistributionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, if any pass has completed.
    pub fn load(&self) -> Option<Arc<CacheSnapshot>> {
        self.current.load_full()
    }

    /// Cached values for one stack.
    pub fn entry(&self, source_index: usize) -> Option<CacheEntry> {
        let guard = self.current.load();
        Option::as_ref(&*guard).and_then(|snapshot| snapshot.entry(source_index).cloned())
    }

    /// Replace the current snapshot (e.g. to restore one taken earlier).
    pub fn store(&self, snapshot: Arc<CacheSnapshot>) {
        self.current.store(Some(snapshot));
    }

    /// Store `snapshot` only if the current snapshot is still `expected`.
    ///
    /// Returns `false` when another pass replaced it in the meantime; the
    /// cache is then left as that pass wrote it.
    pub fn compare_and_store(
        &self,
        expected: &Option<Arc<CacheSnapshot>>,
        snapshot: Arc<CacheSnapshot>,
    ) -> bool {
        let found = self.current.compare_and_swap(expected, Some(snapshot));
        match (&*found, expected) {
            (Some(found), Some(expected)) => Arc::ptr_eq(found, expected),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn clear(&self) {
        self.current.store(None);
    }
}
