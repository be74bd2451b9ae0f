// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::future::Future;

use evsync_core::{
    make_subject_id, ClassificationError, Classify, EventClassification, ScopeKind, SubjectId,
    SyncConfig, Synchronizer,
};
use tokio::task::LocalSet;

/// Runs `body` on a fresh `LocalSet` with a synchronizer started on it.
///
/// The test thread is the scheduler thread for the duration of the call.
pub async fn on_scheduler<F, Fut>(body: F) -> Fut::Output
where
    F: FnOnce(Synchronizer) -> Fut,
    Fut: Future,
{
    LocalSet::new()
        .run_until(async move {
            let sync = Synchronizer::start(SyncConfig::default());
            body(sync).await
        })
        .await
}

/// Lets every runnable local task take a turn.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

pub fn player(label: &str) -> SubjectId {
    make_subject_id(label)
}

pub fn global(tags: &[&str]) -> EventClassification {
    EventClassification::global(tags.iter().copied())
}

pub fn per(subject: SubjectId, tags: &[&str]) -> EventClassification {
    EventClassification::per_subject(subject, tags.iter().copied())
}

/// A quest step for one player, the way the dispatch layer models it.
pub struct QuestStep {
    pub player: SubjectId,
    pub quest: &'static str,
}

impl Classify for QuestStep {
    fn classify(&self) -> Result<EventClassification, ClassificationError> {
        Ok(EventClassification::per_subject(
            self.player,
            ["quests", self.quest],
        ))
    }
}

/// A world mutation (block change, weather) affecting every player.
pub struct WorldEdit;

impl Classify for WorldEdit {
    fn classify(&self) -> Result<EventClassification, ClassificationError> {
        Ok(EventClassification::global(["modify_world"]))
    }
}

/// An event whose resolver reports a per-player scope but no player.
pub struct DetachedPlayerEvent;

impl Classify for DetachedPlayerEvent {
    fn classify(&self) -> Result<EventClassification, ClassificationError> {
        EventClassification::from_parts(ScopeKind::PerSubject, None, ["inventory"])
    }
}
