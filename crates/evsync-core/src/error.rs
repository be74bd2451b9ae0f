// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types surfaced by the synchronizer.

use thiserror::Error;

use crate::ident::{EntryId, SubjectId};

/// Malformed classification reported by a metadata resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// A `PerSubject` classification did not name its subject.
    #[error("per-subject classification is missing its subject")]
    MissingSubject,
    /// A `Global` classification carried a subject.
    #[error("global classification carries subject {0}")]
    UnexpectedSubject(SubjectId),
}

/// Errors emitted by the synchronizer.
///
/// All variants are caller bugs or teardown conditions; none is recoverable
/// inside the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The event could not be classified.
    #[error("invalid classification: {0}")]
    Classification(#[from] ClassificationError),
    /// Exit of an entry that is not active. Registry state was left untouched.
    #[error("entry {0} is not active")]
    UnknownEntry(EntryId),
    /// Exit of an entry issued by a different synchronizer instance.
    #[error("entry {entry} belongs to synchronizer #{owner}, not #{this}")]
    ForeignEntry {
        /// The rejected entry.
        entry: EntryId,
        /// Instance that issued it.
        owner: u64,
        /// Instance the exit was attempted on.
        this: u64,
    },
    /// Synchronizer state was dropped while the caller was parked.
    #[error("synchronizer dropped while waiting for activation")]
    Abandoned,
    /// An `Enter` future was polled again after it completed.
    #[error("enter future polled after completion")]
    PolledAfterCompletion,
    /// The exit pump on the scheduler thread is no longer running.
    #[error("scheduler thread is gone; exit of entry {0} was not delivered")]
    SchedulerGone(EntryId),
}
