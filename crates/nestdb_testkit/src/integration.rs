//! Cross-module scenario helpers.
//!
//! [`execute_plan`] drives a [`UnitPlan`] through real work units against a
//! store and reports which documents the plan should have made durable, so
//! tests can compare that against what the store actually holds.

use crate::generators::{Outcome, UnitPlan};
use nestdb_core::{
    AccessType, CollectionStore, CoreResult, Document, DocumentVariant, JournaledStore,
    TransactionContext, WorkUnit,
};

/// Executes `plan` as a top-level unit writing to `collection`.
///
/// Every saved document holds a distinct counter value. Returns the values
/// that must be durable afterwards, in commit order.
///
/// # Errors
///
/// Propagates the first error raised by any unit; the units opened so far
/// are rolled back as they are dropped.
pub fn execute_plan(
    ctx: &TransactionContext,
    collection: &str,
    plan: &UnitPlan,
) -> CoreResult<Vec<u32>> {
    let mut next = 0;
    run_unit(ctx, collection, plan, &mut next)
}

fn run_unit(
    ctx: &TransactionContext,
    collection: &str,
    plan: &UnitPlan,
    next: &mut u32,
) -> CoreResult<Vec<u32>> {
    let depth_before = ctx.current_depth();
    let mut unit = WorkUnit::new(ctx, false);
    assert_eq!(unit.level(), depth_before, "unit created at the wrong level");

    let docs = unit.add_collection(collection, AccessType::Write)?;
    unit.begin()?;

    let mut kept = Vec::with_capacity(plan.saves);
    for _ in 0..plan.saves {
        *next += 1;
        unit.save_document(&docs, Document::encode(&*next)?, DocumentVariant::Document)?;
        kept.push(*next);
    }
    for child in &plan.children {
        kept.extend(run_unit(ctx, collection, child, next)?);
    }

    match plan.outcome {
        Outcome::Commit => unit.commit(false)?,
        Outcome::Rollback => {
            unit.rollback()?;
            kept.clear();
        }
    }
    assert!(unit.is_done());
    assert_eq!(ctx.current_depth(), depth_before, "depth not restored");
    Ok(kept)
}

/// Returns the counter values committed to `collection`, or an empty list
/// if the collection does not exist.
pub fn committed_values(store: &JournaledStore, collection: &str) -> Vec<u32> {
    let Some(handle) = store.collections().into_iter().find(|h| h.name() == collection) else {
        return Vec::new();
    };
    store
        .documents(handle.id())
        .expect("collection listed but not readable")
        .iter()
        .map(|doc| doc.decode().expect("counter document"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;
    use crate::generators::{unit_plan_strategy, PropTestConfig};
    use nestdb_core::{
        CollectionKind, Config, ErrorCode, NestedFailurePolicy, WorkUnitState,
    };
    use proptest::prelude::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn nested_commit_then_top_level_commit() {
        let store = TestStore::memory();
        let ctx = store.context();
        assert_eq!(ctx.current_depth(), 0);

        let mut a = WorkUnit::new(&ctx, false);
        assert_eq!(a.level(), 0);
        let a_docs = a.add_collection("docs", AccessType::Write).unwrap();
        a.begin().unwrap();

        let mut b = WorkUnit::new(&ctx, false);
        assert_eq!(b.level(), 1);
        let b_docs = b.add_collection("docs", AccessType::Read).unwrap();
        assert_eq!(
            a.find_collection(a_docs.id()).unwrap().access(),
            AccessType::Write
        );
        b.add_collection("docs", AccessType::Write).unwrap();
        b.begin().unwrap();
        b.save_document(&b_docs, Document::encode(&7u32).unwrap(), DocumentVariant::Document)
            .unwrap();

        b.commit(false).unwrap();
        assert_eq!(b.state(), WorkUnitState::Committed);
        assert!(committed_values(&store, "docs").is_empty());

        a.commit(true).unwrap();
        assert!(a.is_done() && b.is_done());
        assert_eq!(ctx.current_depth(), 0);
        assert_eq!(committed_values(&store, "docs"), vec![7]);
    }

    #[test]
    fn top_level_rollback_discards_provisional_commit() {
        let store = TestStore::memory();
        let ctx = store.context();

        let mut a = WorkUnit::new(&ctx, false);
        a.add_collection("docs", AccessType::Write).unwrap();
        a.begin().unwrap();

        let mut b = WorkUnit::new(&ctx, false);
        let b_docs = b.add_collection("docs", AccessType::Write).unwrap();
        b.begin().unwrap();
        b.save_document(&b_docs, Document::encode(&7u32).unwrap(), DocumentVariant::Document)
            .unwrap();
        b.commit(false).unwrap();

        a.rollback().unwrap();
        assert_eq!(a.state(), WorkUnitState::RolledBack);
        assert_eq!(ctx.current_depth(), 0);
        assert!(committed_values(&store, "docs").is_empty());
        assert_eq!(store.locked_collections(), 0);
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let store = TestStore::file();
        {
            let ctx = store.context();
            let plan = UnitPlan::leaf(2, Outcome::Commit)
                .with_child(UnitPlan::leaf(1, Outcome::Commit))
                .with_child(UnitPlan::leaf(1, Outcome::Rollback));
            let expected = execute_plan(&ctx, "docs", &plan).unwrap();
            assert_eq!(expected, vec![1, 2, 3]);
        }

        let store = store.reopen();
        assert_eq!(committed_values(&store, "docs"), vec![1, 2, 3]);
    }

    #[test]
    fn journal_failure_fails_commit() {
        let (store, switch) = TestStore::failing();
        store.create_collection("docs", CollectionKind::Document).unwrap();
        let ctx = store.context();

        let mut unit = WorkUnit::new(&ctx, false);
        let docs = unit.add_collection("docs", AccessType::Write).unwrap();
        unit.begin().unwrap();
        unit.save_document(&docs, Document::encode(&1u32).unwrap(), DocumentVariant::Document)
            .unwrap();

        switch.fail_appends(true);
        let err = unit.commit(true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommitFailed);
        assert_eq!(unit.state(), WorkUnitState::RolledBack);
        assert!(unit.is_done());
        assert_eq!(switch.failures(), 1);
        assert!(committed_values(&store, "docs").is_empty());
        assert_eq!(store.locked_collections(), 0);
    }

    fn commit_value(ctx: &TransactionContext, value: u32) -> CoreResult<()> {
        let mut unit = WorkUnit::new(ctx, false);
        let docs = unit.add_collection("docs", AccessType::Write)?;
        unit.begin()?;
        unit.save_document(&docs, Document::encode(&value)?, DocumentVariant::Document)?;
        unit.commit(true)
    }

    #[test]
    fn failed_sync_is_not_replayed() {
        let (store, switch) = TestStore::failing();
        let ctx = store.context();
        commit_value(&ctx, 1).unwrap();

        switch.fail_syncs(true);
        let err = commit_value(&ctx, 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommitFailed);
        switch.fail_syncs(false);

        commit_value(&ctx, 3).unwrap();
        drop(ctx);

        let store = store.reopen();
        assert_eq!(committed_values(&store, "docs"), vec![1, 3]);
    }

    #[test]
    fn torn_append_does_not_hide_later_commits() {
        let (store, switch) = TestStore::failing();
        let ctx = store.context();
        commit_value(&ctx, 1).unwrap();

        switch.tear_appends(true);
        let err = commit_value(&ctx, 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommitFailed);
        switch.tear_appends(false);

        commit_value(&ctx, 3).unwrap();
        drop(ctx);

        let store = store.reopen();
        assert_eq!(committed_values(&store, "docs"), vec![1, 3]);
    }

    #[test]
    fn failed_journal_rollback_blocks_later_commits() {
        let (store, switch) = TestStore::failing();
        let ctx = store.context();
        commit_value(&ctx, 1).unwrap();

        switch.fail_syncs(true);
        switch.fail_truncates(true);
        assert!(commit_value(&ctx, 2).is_err());
        assert!(store.is_unusable());

        switch.fail_syncs(false);
        switch.fail_truncates(false);
        let err = commit_value(&ctx, 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommitFailed);
        assert_eq!(committed_values(&store, "docs"), vec![1]);
        assert_eq!(store.locked_collections(), 0);
    }

    #[test]
    fn abort_ancestors_policy_fails_whole_transaction() {
        let store = TestStore::memory();
        let ctx = store.context_with(
            Config::new()
                .max_pending_writes(2)
                .nested_failure_policy(NestedFailurePolicy::AbortAncestors),
        );
        let plan = UnitPlan::leaf(1, Outcome::Commit).with_child(UnitPlan::leaf(2, Outcome::Commit));

        let err = execute_plan(&ctx, "docs", &plan).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CommitFailed);
        assert_eq!(ctx.current_depth(), 0);
        assert!(!ctx.is_poisoned());
        assert!(committed_values(&store, "docs").is_empty());
    }

    #[test]
    fn waiting_writer_proceeds_after_release() {
        let store = TestStore::memory();
        let holder_ctx = store.context();
        let barrier = Barrier::new(2);

        let mut holder = WorkUnit::new(&holder_ctx, false);
        holder.add_collection("docs", AccessType::Exclusive).unwrap();
        holder.begin().unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let ctx = store.context_with(Config::new().lock_timeout(Duration::from_secs(10)));
                let mut unit = WorkUnit::new(&ctx, false);
                unit.add_collection("docs", AccessType::Read).unwrap();
                barrier.wait();
                unit.begin().unwrap();
                unit.commit(false).unwrap();
            });

            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            holder.commit(false).unwrap();
            waiter.join().unwrap();
        });

        assert_eq!(store.locked_collections(), 0);
    }

    #[test]
    fn opposite_registration_order_does_not_deadlock() {
        let store = TestStore::memory();
        store.create_collection("a", CollectionKind::Document).unwrap();
        store.create_collection("b", CollectionKind::Document).unwrap();

        thread::scope(|s| {
            for names in [["a", "b"], ["b", "a"]] {
                let store = &store;
                s.spawn(move || {
                    let ctx = store.context_with(Config::new().lock_timeout(Duration::from_secs(10)));
                    for _ in 0..50 {
                        let mut unit = WorkUnit::new(&ctx, false);
                        for name in names {
                            unit.add_collection(name, AccessType::Write).unwrap();
                        }
                        unit.begin().unwrap();
                        unit.commit(false).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.locked_collections(), 0);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn plans_restore_depth_and_apply_committed_chains(plan in unit_plan_strategy(4)) {
            let store = TestStore::memory();
            let ctx = store.context();

            let expected = execute_plan(&ctx, "docs", &plan).unwrap();

            prop_assert_eq!(ctx.current_depth(), 0);
            prop_assert_eq!(ctx.pending_writes(), 0);
            prop_assert_eq!(ctx.held_claims(), 0);
            prop_assert_eq!(store.locked_collections(), 0);
            prop_assert_eq!(committed_values(&store, "docs"), expected);
        }

        #[test]
        fn rolled_back_root_discards_everything(plan in unit_plan_strategy(3)) {
            let store = TestStore::memory();
            let ctx = store.context();
            let mut root = plan;
            root.outcome = Outcome::Rollback;

            let expected = execute_plan(&ctx, "docs", &root).unwrap();

            prop_assert!(expected.is_empty());
            prop_assert!(committed_values(&store, "docs").is_empty());
            prop_assert_eq!(ctx.current_depth(), 0);
        }
    }
}
