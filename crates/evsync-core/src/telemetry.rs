// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

// Telemetry helpers: structured `tracing` events for admissions, parks,
// releases, and a counters snapshot exposed through `Synchronizer::stats`.

use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::classification::EventClassification;
use crate::ident::{EntryId, WaiterId};

/// Counters accumulated by one synchronizer instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Entries admitted without waiting.
    pub fast_path: u64,
    /// Enter calls that had to park.
    pub parked: u64,
    /// Parked callers activated after their blockers exited.
    pub released: u64,
    /// Released callers that found new blockers and parked again.
    pub reparked: u64,
    /// Successful exits (local and remote).
    pub exited: u64,
    /// Exits delivered through a [`RemoteExit`](crate::RemoteExit).
    pub remote_exits: u64,
    /// Parked or activated-but-unclaimed callers whose future was dropped.
    pub abandoned: u64,
    /// Exit attempts rejected as unknown or foreign.
    pub rejected_exits: u64,
    /// Entries currently active.
    pub active: usize,
    /// Callers currently parked.
    pub waiting: usize,
    /// Subjects with at least one active entry.
    pub subjects: usize,
}

pub(crate) fn admitted(entry: EntryId, classification: &EventClassification) {
    trace!(entry = entry.value(), %classification, "admitted on fast path");
}

pub(crate) fn parked(waiter: WaiterId, classification: &EventClassification, blockers: usize) {
    debug!(
        waiter = waiter.value(),
        %classification,
        blockers,
        "parked behind active entries"
    );
}

pub(crate) fn released(waiter: WaiterId, entry: EntryId) {
    debug!(waiter = waiter.value(), entry = entry.value(), "released");
}

pub(crate) fn reparked(waiter: WaiterId, blockers: usize, reparks: u32, warn_at: u32) {
    if reparks >= warn_at {
        warn!(
            waiter = waiter.value(),
            blockers, reparks, "waiter keeps finding new blockers on release"
        );
    } else {
        debug!(waiter = waiter.value(), blockers, reparks, "reparked");
    }
}

pub(crate) fn resumed(entry: EntryId, waited: Duration, slow_after: Duration) {
    if waited >= slow_after {
        warn!(
            entry = entry.value(),
            waited_ms = waited.as_millis(),
            "slow activation"
        );
    } else {
        trace!(entry = entry.value(), waited_us = waited.as_micros(), "resumed");
    }
}

pub(crate) fn exited(entry: EntryId, released: usize, remote: bool) {
    trace!(entry = entry.value(), released, remote, "exited");
}

pub(crate) fn abandoned(waiter: WaiterId, activated: bool) {
    debug!(waiter = waiter.value(), activated, "enter future dropped");
}

pub(crate) fn remote_exit_failed(err: &crate::SyncError) {
    error!(%err, "remote exit rejected");
}
