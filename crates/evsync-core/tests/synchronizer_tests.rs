// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
mod common;

use common::{global, on_scheduler, per, player, settle};
use evsync_core::{EntryId, SyncError};

#[tokio::test]
async fn modify_world_scenario() {
    on_scheduler(|sync| async move {
        let first = sync.enter_event(global(&["modify_world"]));
        assert!(first.is_ready(), "no active entries: fast path");
        let e1 = first.await.expect("e1");
        assert!(e1.wait_handle().is_none());
        assert_eq!(e1.wait_count(), 0);

        let second = sync.enter_event(global(&["modify_world"]));
        assert!(second.is_parked());
        assert!(!second.is_ready());
        let second = tokio::task::spawn_local(second);
        settle().await;
        assert!(!second.is_finished(), "must stay pending while e1 is active");

        sync.exit_event(e1).expect("exit e1");
        let e2 = second.await.expect("join").expect("e2");
        let handle = e2.wait_handle().expect("e2 suspended");
        assert_eq!(handle.blockers(), 1);
        assert_eq!(handle.reparks(), 0);
        assert_eq!(e2.wait_count(), 0);
        sync.exit_event(e2).expect("exit e2");
        assert_eq!(sync.active_len(), 0);
    })
    .await;
}

#[tokio::test]
async fn fast_path_completes_on_first_poll() {
    on_scheduler(|sync| async move {
        let p = player("p");
        let held = sync.enter_event(global(&["weather"])).await.expect("held");

        // Disjoint tags: already complete, no suspension point entered.
        let entry = futures_now(sync.enter_event(per(p, &["inventory"])))
            .expect("complete on first poll")
            .expect("entry");
        assert!(entry.wait_handle().is_none());
        assert_eq!(entry.wait_count(), 0);

        sync.exit_event(entry).expect("exit");
        sync.exit_event(held).expect("exit held");
    })
    .await;
}

#[tokio::test]
async fn global_entry_blocks_every_scope_sharing_a_tag() {
    on_scheduler(|sync| async move {
        let g = sync.enter_event(global(&["t"])).await.expect("g");

        let p = sync.enter_event(per(player("p"), &["t"]));
        let q = sync.enter_event(per(player("q"), &["t", "u"]));
        let unrelated = sync.enter_event(per(player("r"), &["u"]));
        assert!(p.is_parked());
        assert!(q.is_parked());
        assert!(unrelated.is_ready(), "no shared tag with the Global entry");
        let unrelated = unrelated.await.expect("unrelated");

        let p = tokio::task::spawn_local(p);
        let q = tokio::task::spawn_local(q);
        settle().await;
        assert!(!p.is_finished());
        assert!(!q.is_finished());
        assert_eq!(sync.waiting_len(), 2);

        // p and q are different subjects: both activate on the same exit.
        sync.exit_event(g).expect("exit g");
        let p = p.await.expect("join p").expect("p");
        let q = q.await.expect("join q").expect("q");
        for entry in [&p, &q] {
            assert_eq!(entry.wait_handle().map(|h| h.blockers()), Some(1));
            assert_eq!(entry.wait_count(), 0);
        }

        sync.exit_event(p).expect("exit p");
        sync.exit_event(q).expect("exit q");
        sync.exit_event(unrelated).expect("exit unrelated");
        assert_eq!(sync.active_len(), 0);
    })
    .await;
}

#[tokio::test]
async fn global_arrival_waits_for_running_subject_entry() {
    on_scheduler(|sync| async move {
        let p = player("p");
        let mine = sync.enter_event(per(p, &["t"])).await.expect("mine");

        // A Global arrival is excluded by the already running PerSubject entry.
        let world = sync.enter_event(global(&["t"]));
        assert!(world.is_parked());
        let world = tokio::task::spawn_local(world);
        settle().await;
        assert!(!world.is_finished());

        sync.exit_event(mine).expect("exit mine");
        let world = world.await.expect("join").expect("world");
        sync.exit_event(world).expect("exit world");
    })
    .await;
}

#[tokio::test]
async fn different_subjects_never_order_each_other() {
    on_scheduler(|sync| async move {
        let held = sync
            .enter_event(per(player("p"), &["inventory"]))
            .await
            .expect("p");
        let other = sync.enter_event(per(player("q"), &["inventory"]));
        assert!(other.is_ready());
        let other = other.await.expect("q");
        assert!(other.wait_handle().is_none());
        assert_eq!(sync.active_len(), 2);
        assert_eq!(sync.stats().subjects, 2);

        sync.exit_event(held).expect("exit p");
        sync.exit_event(other).expect("exit q");
        assert_eq!(sync.stats().subjects, 0);
    })
    .await;
}

#[tokio::test]
async fn same_subject_disjoint_tags_run_together() {
    on_scheduler(|sync| async move {
        let p = player("p");
        let a = sync.enter_event(per(p, &["inventory"])).await.expect("a");
        let b = sync.enter_event(per(p, &["quests"]));
        assert!(b.is_ready());
        let b = b.await.expect("b");
        sync.exit_event(a).expect("exit a");
        sync.exit_event(b).expect("exit b");
    })
    .await;
}

#[tokio::test]
async fn mutually_conflicting_waiters_activate_one_at_a_time_in_parking_order() {
    on_scheduler(|sync| async move {
        let held = sync.enter_event(global(&["t"])).await.expect("held");
        let first = tokio::task::spawn_local(sync.enter_event(global(&["t"])));
        let second = tokio::task::spawn_local(sync.enter_event(global(&["t"])));
        settle().await;

        sync.exit_event(held).expect("exit held");
        let first = first.await.expect("join").expect("first");
        settle().await;
        assert!(
            !second.is_finished(),
            "second conflicts with first, which activated in the same release"
        );
        assert_eq!(sync.active_len(), 1);

        sync.exit_event(first).expect("exit first");
        let second = second.await.expect("join").expect("second");
        assert_eq!(second.wait_handle().map(|h| h.reparks()), Some(1));
        assert_eq!(second.wait_count(), 0);
        sync.exit_event(second).expect("exit second");

        let stats = sync.stats();
        assert_eq!(stats.fast_path, 1);
        assert_eq!(stats.parked, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.reparked, 1);
        assert_eq!(stats.exited, 3);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.waiting, 0);
    })
    .await;
}

#[tokio::test]
async fn later_arrival_does_not_queue_behind_parked_callers() {
    on_scheduler(|sync| async move {
        let p = player("p");
        let held = sync.enter_event(per(p, &["inventory"])).await.expect("held");
        // Parked behind `held` on `inventory`, also names `quests`.
        let parked = tokio::task::spawn_local(sync.enter_event(per(p, &["inventory", "quests"])));
        settle().await;

        // Parked callers are invisible: `quests` is free right now.
        let later = sync.enter_event(per(p, &["quests"]));
        assert!(later.is_ready());
        let later = later.await.expect("later");

        // Releasing `held` re-checks the parked caller against `later`.
        sync.exit_event(held).expect("exit held");
        settle().await;
        assert!(!parked.is_finished());

        sync.exit_event(later).expect("exit later");
        let parked = parked.await.expect("join").expect("parked");
        assert_eq!(parked.wait_handle().map(|h| h.reparks()), Some(1));
        sync.exit_event(parked).expect("exit parked");
    })
    .await;
}

#[tokio::test]
async fn tag_order_and_duplicates_do_not_change_conflicts() {
    on_scheduler(|sync| async move {
        let p = player("p");
        let held = sync.enter_event(per(p, &["b", "a"])).await.expect("held");
        let same = sync.enter_event(per(p, &["a", "a", "b"]));
        assert!(same.is_parked());
        assert_eq!(same_tags(&held), vec!["a", "b"]);
        drop(same);
        sync.exit_event(held).expect("exit");
    })
    .await;
}

#[tokio::test]
async fn foreign_entries_are_rejected_and_state_is_untouched() {
    on_scheduler(|sync| async move {
        let other = evsync_core::Synchronizer::start(evsync_core::SyncConfig::default());
        let entry = other.enter_event(global(&["t"])).await.expect("entry");
        let id: EntryId = entry.id();

        let err = sync.exit_event(entry).expect_err("foreign");
        assert!(matches!(err, SyncError::ForeignEntry { entry, .. } if entry == id));
        assert_eq!(other.active_len(), 1, "owner still holds the entry");
        assert_eq!(sync.stats().rejected_exits, 1);
        assert_eq!(sync.stats().exited, 0);
    })
    .await;
}

#[tokio::test]
async fn malformed_classification_fails_at_enter() {
    on_scheduler(|sync| async move {
        let err = sync
            .enter(&common::DetachedPlayerEvent)
            .expect_err("missing subject");
        assert!(matches!(
            err,
            SyncError::Classification(evsync_core::ClassificationError::MissingSubject)
        ));
        assert_eq!(sync.stats(), evsync_core::SyncStats::default());
    })
    .await;
}

#[tokio::test]
async fn classify_trait_feeds_enter() {
    on_scheduler(|sync| async move {
        let steve = player("steve");
        let step = common::QuestStep {
            player: steve,
            quest: "dragon",
        };
        let a = sync.enter(&step).expect("classify").await.expect("a");
        let world = sync.enter(&common::WorldEdit).expect("classify");
        assert!(world.is_ready(), "quests and modify_world are disjoint");
        let world = world.await.expect("world");

        let again = sync.enter(&step).expect("classify");
        assert!(again.is_parked());
        drop(again);

        sync.exit_event(a).expect("exit a");
        sync.exit_event(world).expect("exit world");
    })
    .await;
}

fn same_tags(entry: &evsync_core::SyncEntry) -> Vec<&str> {
    entry
        .classification()
        .tags()
        .iter()
        .map(evsync_core::Tag::as_str)
        .collect()
}

/// Polls `fut` once with a no-op waker; `None` if it is pending.
fn futures_now<F: std::future::Future>(fut: F) -> Option<F::Output> {
    use std::task::{Context, Poll, Waker};
    let mut fut = std::pin::pin!(fut);
    let mut cx = Context::from_waker(Waker::noop());
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(out) => Some(out),
        Poll::Pending => None,
    }
}
