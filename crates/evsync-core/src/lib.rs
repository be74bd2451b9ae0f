// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! evsync-core: event synchronization engine.
//!
//! Serializes overlapping asynchronous event executions so two pieces of logic
//! that mutate the same shared state never run concurrently, while logic
//! touching disjoint state runs in parallel on one cooperative scheduler
//! thread.
//!
//! ```text
//! dispatch layer ──classify──▶ Synchronizer::enter_event ──┬─ no conflict ─▶ active
//!                                                          └─ conflict ────▶ wait ladder
//! exit_event / RemoteExit ───▶ remove from registry ───▶ countdown ───▶ activate next
//! ```
//!
//! The engine is bound to a `tokio::task::LocalSet`: build it with
//! [`Synchronizer::start`] inside one, or with [`Synchronizer::new`] and drive
//! the returned [`ExitPump`] yourself.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod affinity;
mod classification;
mod config;
mod error;
mod ident;
mod ladder;
mod registry;
mod synchronizer;
mod telemetry;

// Re-exports for stable public API
/// Scheduler thread identity.
pub use affinity::SchedulerAffinity;
/// Classifications, tags, and the dispatch-layer classification seam.
pub use classification::{Classify, EventClassification, Scope, ScopeKind, Tag, TagSet};
/// Diagnostic tunables.
pub use config::SyncConfig;
/// Error types.
pub use error::{ClassificationError, SyncError};
/// Identifier types and constructors.
pub use ident::{make_subject_id, EntryId, Hash, SubjectId, WaiterId};
/// Entry/exit API.
pub use synchronizer::{Enter, ExitPump, RemoteExit, SyncEntry, Synchronizer, WaitHandle};
/// Counters snapshot.
pub use telemetry::SyncStats;
