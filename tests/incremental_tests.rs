//! Integration tests — incremental recomputation, reflow and the cache.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use scorelayout::rational::{int, ratio};
use scorelayout::{
    plan, CancelToken, Constraints, DistributionError, Distributor, Policies, RecomputePath,
    Stack, Uniform, WidthOverride,
};

/// Nine identical stacks, three per system at scale 1.
fn nine() -> Vec<Stack> {
    (0..9).map(|i| Stack::new(int(8), int(10), 100 + i)).collect()
}

fn distributor() -> Distributor {
    Distributor::new(Policies::new(Uniform(int(30))))
}

fn fresh(stacks: &[Stack]) -> scorelayout::Outcome {
    plan(stacks, &Policies::new(Uniform(int(30))), &Constraints::new()).unwrap()
}

// ─── Update paths ───────────────────────────────────────────────────

#[test]
fn identical_input_is_unchanged() {
    let d = distributor();
    let first = d.distribute(&nine()).unwrap();
    let update = d.update(&nine()).unwrap();

    assert_eq!(update.path, RecomputePath::Unchanged);
    assert!(update.changed.is_empty());
    assert_eq!(update.outcome, first);
}

#[test]
fn update_without_cache_runs_full() {
    let d = distributor();
    let update = d.update(&nine()).unwrap();
    assert_eq!(update.path, RecomputePath::Full);
    assert_eq!(update.outcome, fresh(&nine()));
}

#[test]
fn raising_min_within_actual_takes_fast_path() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let mut edited = nine();
    edited[4].min_width = int(9);
    let update = d.update(&edited).unwrap();

    assert_eq!(update.path, RecomputePath::FastPath);
    assert_eq!(update.changed, vec![4]);
    assert_eq!(update.outcome, fresh(&edited));

    let entry = d.cache().entry(104).unwrap();
    assert_eq!(entry.min_width, int(9));
    assert_eq!(entry.actual_width, int(10));
    assert_eq!(entry.system_id, 1);
}

#[test]
fn height_change_reruns_only_pages() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let mut edited = nine();
    edited[7] = edited[7].clone().with_height(int(64));
    let update = d.update(&edited).unwrap();

    assert_eq!(update.path, RecomputePath::FastPath);
    let layout = update.outcome.layout().unwrap();
    assert_eq!(layout.systems[2].height, int(64));
    assert_eq!(layout.pages[0].used, int(144));
    assert_eq!(update.outcome, fresh(&edited));
}

#[test]
fn ideal_change_ripples_but_stays_local() {
    let d = distributor();
    let before = d.distribute(&nine()).unwrap().into_layout().unwrap();

    let mut edited = nine();
    edited[4].ideal_width = int(11);
    let update = d.update(&edited).unwrap();
    assert_eq!(update.path, RecomputePath::Ripple);

    let after = update.outcome.layout().unwrap();
    assert_eq!(after.system_breaks.breaks, vec![0, 3, 6, 9]);
    assert_eq!(after.systems[0], before.systems[0]);
    assert_eq!(after.systems[2], before.systems[2]);
    assert_eq!(
        after.systems[1].actual_widths,
        vec![ratio(300, 31), ratio(330, 31), ratio(300, 31)]
    );
    assert_eq!(update.outcome, fresh(&edited));
}

#[test]
fn fast_path_then_ripple_matches_fresh_plan() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let mut edited = nine();
    edited[1].min_width = int(10);
    assert_eq!(d.update(&edited).unwrap().path, RecomputePath::FastPath);

    edited[6].ideal_width = int(13);
    edited[6].min_width = int(9);
    let update = d.update(&edited).unwrap();
    assert_eq!(update.path, RecomputePath::Ripple);
    assert_eq!(update.outcome, fresh(&edited));
}

#[test]
fn length_change_runs_full() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let mut edited = nine();
    edited.push(Stack::new(int(8), int(10), 109));
    let update = d.update(&edited).unwrap();

    assert_eq!(update.path, RecomputePath::Full);
    assert_eq!(update.changed, (0..10).collect::<Vec<_>>());
    assert_eq!(update.outcome, fresh(&edited));
}

// ─── Reflow ─────────────────────────────────────────────────────────

fn widen_stack_104() -> Vec<WidthOverride> {
    vec![WidthOverride {
        source_index: 104,
        min_width: Some(int(12)),
        ideal_width: None,
    }]
}

#[test]
fn reflow_reoptimizes_only_the_requested_systems() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let layout = d.reflow(1..2, widen_stack_104()).unwrap().into_layout().unwrap();

    // Stack 4 now needs 12 of its own 12 ideal: system 1 no longer fits.
    assert_eq!(layout.systems.len(), 4);
    for held in [0, 3, 6, 9] {
        assert!(layout.system_breaks.breaks.contains(&held));
    }
    assert_eq!(layout.systems[0].actual_widths, vec![int(10); 3]);
    assert_eq!(layout.systems[3].actual_widths, vec![int(10); 3]);
    assert!(layout.system_of(4).unwrap().actual_widths.iter().all(|w| w >= &int(8)));
    assert!(layout.actual_widths()[4] >= int(12));
    assert_eq!(d.cache().load().unwrap().reflows_used(), 1);
}

#[test]
fn reflow_limit_is_enforced_per_cycle() {
    let d = distributor().with_max_reflows(1);
    d.distribute(&nine()).unwrap();

    d.reflow(0..1, Vec::new()).unwrap();
    let err = d.reflow(0..1, Vec::new()).unwrap_err();
    assert!(matches!(err, DistributionError::ReflowLimit { limit: 1 }));

    // A new cycle starts with a full distribution.
    d.distribute(&nine()).unwrap();
    assert!(d.reflow(0..1, Vec::new()).is_ok());
}

#[test]
fn reflow_rejects_bad_ranges_and_missing_layouts() {
    let d = distributor();
    assert!(matches!(d.reflow(0..1, Vec::new()), Err(DistributionError::NoLayout)));

    d.distribute(&nine()).unwrap();
    assert!(matches!(
        d.reflow(2..5, Vec::new()),
        Err(DistributionError::InvalidReflowRange { start: 2, end: 5, count: 3 })
    ));
    assert!(matches!(
        d.reflow(1..1, Vec::new()),
        Err(DistributionError::InvalidReflowRange { .. })
    ));
}

#[test]
fn reflow_overrides_survive_later_edits() {
    let d = distributor();
    d.distribute(&nine()).unwrap();
    d.reflow(1..2, widen_stack_104()).unwrap();

    let mut edited = nine();
    edited[0].ideal_width = int(11);
    let update = d.update(&edited).unwrap();
    let layout = update.outcome.layout().unwrap();
    assert!(layout.actual_widths()[4] >= int(12));
}

#[test]
fn edits_do_not_reset_the_reflow_count() {
    let d = distributor().with_max_reflows(1);
    d.distribute(&nine()).unwrap();
    d.reflow(0..1, Vec::new()).unwrap();

    let mut edited = nine();
    edited[7].ideal_width = int(11);
    assert_eq!(d.update(&edited).unwrap().path, RecomputePath::Ripple);
    assert_eq!(d.cache().load().unwrap().reflows_used(), 1);
    assert!(matches!(
        d.reflow(0..1, Vec::new()),
        Err(DistributionError::ReflowLimit { limit: 1 })
    ));

    edited.push(Stack::new(int(8), int(10), 109));
    assert_eq!(d.update(&edited).unwrap().path, RecomputePath::Full);
    assert_eq!(d.cache().load().unwrap().reflows_used(), 1);
    assert!(matches!(
        d.reflow(0..1, Vec::new()),
        Err(DistributionError::ReflowLimit { limit: 1 })
    ));
}

#[test]
fn held_breaks_survive_every_update_path() {
    let d = distributor();
    d.distribute(&nine()).unwrap();
    let reflowed = d.reflow(1..2, widen_stack_104()).unwrap().into_layout().unwrap();
    assert_eq!(reflowed.system_breaks.breaks, vec![0, 3, 5, 6, 9]);

    let mut edited = nine();
    edited[0].min_width = int(9);
    let update = d.update(&edited).unwrap();
    assert_eq!(update.path, RecomputePath::FastPath);
    assert_eq!(update.outcome.layout().unwrap().system_breaks.breaks, vec![0, 3, 5, 6, 9]);

    edited[8].ideal_width = int(11);
    let update = d.update(&edited).unwrap();
    assert_eq!(update.path, RecomputePath::Ripple);
    assert_eq!(update.outcome.layout().unwrap().system_breaks.breaks, vec![0, 3, 5, 6, 9]);

    // A new cycle releases them.
    let fresh = d.distribute(&nine()).unwrap().into_layout().unwrap();
    assert_eq!(fresh.system_breaks.breaks, vec![0, 3, 6, 9]);
}

#[test]
fn concurrent_reflows_share_one_budget() {
    let d = distributor().with_max_reflows(1);
    d.distribute(&nine()).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| d.reflow(0..1, Vec::new())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let granted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(granted, 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                DistributionError::ReflowLimit { .. } | DistributionError::Superseded
            ));
        }
    }
    assert_eq!(d.cache().load().unwrap().reflows_used(), 1);
}

#[test]
fn racing_updates_never_store_a_stale_snapshot() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let edits: Vec<Vec<Stack>> = (0..6)
        .map(|i| {
            let mut edited = nine();
            edited[i].ideal_width = int(12);
            edited
        })
        .collect();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = edits
            .iter()
            .map(|edited| scope.spawn(|| d.update(edited)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut stored = Vec::new();
    for (edited, result) in edits.iter().zip(&results) {
        match result {
            Ok(_) => stored.push(edited),
            Err(err) => assert!(matches!(err, DistributionError::Superseded)),
        }
    }
    assert!(!stored.is_empty());

    let snapshot = d.cache().load().unwrap();
    assert!(stored.iter().any(|edited| snapshot.inputs() == edited.as_slice()));
    assert_eq!(snapshot.outcome(), &fresh(snapshot.inputs()));
}

// ─── Cancellation and the cache ─────────────────────────────────────

#[test]
fn cancelled_pass_leaves_cache_untouched() {
    let d = distributor();
    let first = d.distribute(&nine()).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut edited = nine();
    edited[0].ideal_width = int(12);
    let err = d.distribute_cancellable(&edited, &cancel).unwrap_err();

    assert!(matches!(err, DistributionError::Cancelled));
    let snapshot = d.cache().load().unwrap();
    assert_eq!(snapshot.outcome(), &first);
    assert_eq!(snapshot.inputs(), nine().as_slice());
}

#[test]
fn cache_entries_are_keyed_by_source_index() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    let entry = d.cache().entry(107).unwrap();
    assert_eq!(entry.system_id, 2);
    assert_eq!(entry.page_id, 0);
    assert_eq!(entry.actual_width, int(10));
    assert!(d.cache().entry(7).is_none());
    assert_eq!(d.cache().load().unwrap().entries().len(), 9);
}

#[test]
fn restoring_a_snapshot_and_clearing() {
    let d = distributor();
    d.distribute(&nine()).unwrap();
    let saved = d.cache().load().unwrap();

    let mut edited = nine();
    edited[2].ideal_width = int(14);
    d.distribute(&edited).unwrap();
    assert_ne!(d.cache().load().unwrap().outcome(), saved.outcome());

    d.cache().store(Arc::clone(&saved));
    assert_eq!(d.cache().load().unwrap().outcome(), saved.outcome());

    d.cache().clear();
    assert!(d.cache().load().is_none());
    assert!(d.cache().entry(100).is_none());
}

#[test]
fn readers_see_whole_snapshots_while_updates_run() {
    let d = distributor();
    d.distribute(&nine()).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let snapshot = d.cache().load().unwrap();
                    let layout = snapshot.outcome().layout().unwrap();
                    assert_eq!(layout.actual_widths().len(), snapshot.inputs().len());
                    assert_eq!(snapshot.entries().len(), snapshot.inputs().len());
                }
            });
        }
        for step in 0..20 {
            let mut edited = nine();
            edited[step % 9].ideal_width = int(10 + (step % 3) as i64);
            d.update(&edited).unwrap();
        }
    });
}
