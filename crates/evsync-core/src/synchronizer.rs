// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entry/exit API over the active registry and wait ladder.
//!
//! Admission contract:
//! - `enter_event` computes conflicts and registers-or-parks in one call; no
//!   other admission can interleave between the check and the insert.
//! - Only *active* entries block. Parked callers are invisible to arrivals.
//! - A released caller is activated inside the exit that released it, after a
//!   re-check against the registry as it stands at that moment (which already
//!   holds callers activated earlier in the same pass, in parking order). New
//!   blockers re-park it. An entry therefore never activates while a
//!   tag-overlapping predecessor is active.
//! - All of the above runs on the scheduler thread. Worker threads reach it
//!   only through [`RemoteExit`], drained by [`ExitPump`].

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{instrument, warn};

use crate::affinity::{Inbox, Mailbox, SchedulerAffinity};
use crate::classification::{Classify, EventClassification};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::ident::{EntryId, IdSequence, WaiterId};
use crate::ladder::{Activation, WaitLadder};
use crate::registry::ActiveRegistry;
use crate::telemetry::{self, SyncStats};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Diagnostic record of the suspension a slow-path entry went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitHandle {
    waiter: WaiterId,
    blockers: usize,
    reparks: u32,
    parked_at: Instant,
    released_at: Instant,
    resumed_at: Instant,
}

impl WaitHandle {
    /// Ladder slot the caller occupied.
    #[must_use]
    pub fn waiter(&self) -> WaiterId {
        self.waiter
    }

    /// Active entries that blocked the caller when it first parked.
    #[must_use]
    pub fn blockers(&self) -> usize {
        self.blockers
    }

    /// Times the caller was released but found new blockers.
    #[must_use]
    pub fn reparks(&self) -> u32 {
        self.reparks
    }

    /// Parking to resumption on the scheduler thread.
    #[must_use]
    pub fn waited(&self) -> Duration {
        self.resumed_at.saturating_duration_since(self.parked_at)
    }

    /// Release (last blocker exit) to resumption; the wakeup chain latency.
    #[must_use]
    pub fn resume_lag(&self) -> Duration {
        self.resumed_at.saturating_duration_since(self.released_at)
    }
}

/// An admitted event. Hand it back to [`Synchronizer::exit_event`] or
/// [`RemoteExit::exit`] exactly once.
#[must_use = "an admitted entry blocks conflicting events until it is exited"]
#[derive(Debug)]
pub struct SyncEntry {
    id: EntryId,
    owner: u64,
    classification: EventClassification,
    wait_handle: Option<WaitHandle>,
    wait_count: usize,
}

impl SyncEntry {
    /// Registry id of this entry.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Classification the entry was admitted with.
    #[must_use]
    pub fn classification(&self) -> &EventClassification {
        &self.classification
    }

    /// `None` when the entry was admitted without suspending.
    #[must_use]
    pub fn wait_handle(&self) -> Option<&WaitHandle> {
        self.wait_handle.as_ref()
    }

    /// Unresolved predecessors at completion; always zero.
    #[must_use]
    pub fn wait_count(&self) -> usize {
        self.wait_count
    }
}

enum Admission {
    Ready(EntryId),
    Parked(WaiterId, oneshot::Receiver<Activation>),
}

#[derive(Debug)]
struct SyncState {
    registry: ActiveRegistry,
    ladder: WaitLadder,
    entry_ids: IdSequence,
    stats: SyncStats,
    repark_warn_threshold: u32,
}

impl SyncState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            registry: ActiveRegistry::default(),
            ladder: WaitLadder::default(),
            entry_ids: IdSequence::new(),
            stats: SyncStats::default(),
            repark_warn_threshold: config.repark_warn_threshold,
        }
    }

    fn next_entry(&mut self) -> EntryId {
        EntryId::from_raw(self.entry_ids.next())
    }

    fn enter(&mut self, classification: &EventClassification) -> Admission {
        let blockers = self.registry.conflicts(classification);
        if blockers.is_empty() {
            let id = self.next_entry();
            self.registry.insert(id, classification.clone());
            self.stats.fast_path += 1;
            telemetry::admitted(id, classification);
            return Admission::Ready(id);
        }

        let (tx, rx) = oneshot::channel();
        let count = blockers.len();
        let waiter = self.ladder.park(classification.clone(), blockers.clone(), tx);
        for blocker in blockers {
            self.registry.add_dependent(blocker, waiter);
        }
        self.stats.parked += 1;
        telemetry::parked(waiter, classification, count);
        Admission::Parked(waiter, rx)
    }

    fn exit(&mut self, id: EntryId, remote: bool) -> Result<(), SyncError> {
        let Some(active) = self.registry.remove(id) else {
            self.stats.rejected_exits += 1;
            return Err(SyncError::UnknownEntry(id));
        };
        self.stats.exited += 1;
        if remote {
            self.stats.remote_exits += 1;
        }
        let released = self.release_from(id, active.dependents);
        telemetry::exited(id, released, remote);
        Ok(())
    }

    /// Decrements every dependent of the departed `blocker` and activates the
    /// ones that reached zero. Entries activated for callers that are no
    /// longer listening are retired in turn. Returns the number of callers
    /// handed an activation.
    fn release_from(&mut self, blocker: EntryId, dependents: Vec<WaiterId>) -> usize {
        let mut delivered = 0;
        let mut pending = vec![(blocker, dependents)];
        while let Some((blocker, dependents)) = pending.pop() {
            let mut ready: Vec<WaiterId> = dependents
                .into_iter()
                .filter(|waiter| self.ladder.decrement(*waiter, blocker))
                .collect();
            ready.sort_unstable();

            for waiter in ready {
                let blockers = match self.ladder.get(waiter) {
                    Some(node) => self.registry.conflicts(&node.classification),
                    None => continue,
                };
                if !blockers.is_empty() {
                    self.repark(waiter, blockers);
                    continue;
                }
                let Some(node) = self.ladder.take(waiter) else {
                    continue;
                };
                let entry = self.next_entry();
                self.registry.insert(entry, node.classification);
                self.stats.released += 1;
                telemetry::released(waiter, entry);

                let activation = Activation {
                    entry,
                    parked_at: node.parked_at,
                    released_at: Instant::now(),
                    seeded: node.seeded,
                    remaining: node.remaining,
                    reparks: node.reparks,
                };
                if node.signal.send(activation).is_ok() {
                    delivered += 1;
                } else if let Some(orphan) = self.registry.remove(entry) {
                    self.stats.abandoned += 1;
                    telemetry::abandoned(waiter, true);
                    pending.push((entry, orphan.dependents));
                }
            }
        }
        delivered
    }

    fn repark(&mut self, waiter: WaiterId, blockers: Vec<EntryId>) {
        let count = blockers.len();
        for blocker in &blockers {
            self.registry.add_dependent(*blocker, waiter);
        }
        if let Some(reparks) = self.ladder.repark(waiter, blockers) {
            self.stats.reparked += 1;
            telemetry::reparked(waiter, count, reparks, self.repark_warn_threshold);
        }
    }

    /// Cleans up after an `Enter` dropped before completing.
    fn abandon(&mut self, waiter: WaiterId, rx: &mut oneshot::Receiver<Activation>) {
        if let Some(node) = self.ladder.take(waiter) {
            for blocker in &node.blockers {
                self.registry.remove_dependent(*blocker, waiter);
            }
            self.stats.abandoned += 1;
            telemetry::abandoned(waiter, false);
            return;
        }
        // Activated but never claimed: the entry is active with no owner.
        if let Ok(activation) = rx.try_recv() {
            self.stats.abandoned += 1;
            telemetry::abandoned(waiter, true);
            if let Some(active) = self.registry.remove(activation.entry) {
                self.release_from(activation.entry, active.dependents);
            }
        }
    }

    fn snapshot(&self) -> SyncStats {
        SyncStats {
            active: self.registry.len(),
            waiting: self.ladder.len(),
            subjects: self.registry.subject_buckets(),
            ..self.stats
        }
    }
}

/// Serializes conflicting event executions on the cooperative scheduler thread.
///
/// Cloning yields another handle to the same instance. The handle is `!Send`:
/// it can only be used on the scheduler thread that created it. Worker threads
/// use [`Synchronizer::remote_exit`].
#[derive(Clone)]
pub struct Synchronizer {
    shared: Rc<RefCell<SyncState>>,
    exits: Mailbox<SyncEntry>,
    affinity: SchedulerAffinity,
    instance: u64,
    config: SyncConfig,
}

impl core::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("instance", &self.instance)
            .field("affinity", &self.affinity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Builds a synchronizer bound to `affinity` and returns the [`ExitPump`]
    /// that must be driven on that scheduler thread for remote exits to land.
    ///
    /// Call this on the scheduler thread itself.
    pub fn new(affinity: SchedulerAffinity, config: SyncConfig) -> (Self, ExitPump) {
        debug_assert!(
            affinity.is_current(),
            "synchronizer must be built on its scheduler thread"
        );
        let shared = Rc::new(RefCell::new(SyncState::new(&config)));
        let (exits, inbox) = affinity.mailbox();
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let pump = ExitPump {
            inbox,
            shared: Rc::downgrade(&shared),
        };
        let sync = Self {
            shared,
            exits,
            affinity,
            instance,
            config,
        };
        (sync, pump)
    }

    /// Builds a synchronizer on the current thread and spawns its [`ExitPump`]
    /// onto the current `LocalSet`.
    ///
    /// # Panics
    /// Panics when called outside a `tokio::task::LocalSet` context.
    pub fn start(config: SyncConfig) -> Self {
        let (sync, pump) = Self::new(SchedulerAffinity::current(), config);
        drop(tokio::task::spawn_local(pump.run()));
        sync
    }

    /// Classifies `event` and enters it. See [`Synchronizer::enter_event`].
    ///
    /// # Errors
    /// [`SyncError::Classification`] when the event cannot be classified; no
    /// state is touched in that case.
    pub fn enter<E: Classify + ?Sized>(&self, event: &E) -> Result<Enter, SyncError> {
        let classification = event.classify()?;
        Ok(self.enter_event(classification))
    }

    /// Enters an event with an explicit classification.
    ///
    /// With no active conflict the entry is registered immediately and the
    /// returned future is already complete. Otherwise the caller is parked
    /// behind the conflicting active entries and the future completes, on this
    /// scheduler thread, once the last of them exits.
    pub fn enter_event(&self, classification: EventClassification) -> Enter {
        let admission = self.shared.borrow_mut().enter(&classification);
        let state = match admission {
            Admission::Ready(id) => EnterState::Ready(SyncEntry {
                id,
                owner: self.instance,
                classification,
                wait_handle: None,
                wait_count: 0,
            }),
            Admission::Parked(waiter, rx) => EnterState::Parked {
                waiter,
                rx,
                shared: Rc::downgrade(&self.shared),
                classification,
            },
        };
        Enter {
            state,
            owner: self.instance,
            slow_after: self.config.slow_wait_warn(),
        }
    }

    /// Removes `entry` from the registry and activates every waiter whose last
    /// blocker it was. Never suspends.
    ///
    /// # Errors
    /// - [`SyncError::ForeignEntry`] when `entry` came from another instance.
    /// - [`SyncError::UnknownEntry`] when `entry` is not active.
    ///
    /// State is untouched on error.
    pub fn exit_event(&self, entry: SyncEntry) -> Result<(), SyncError> {
        self.check_owner(&entry)?;
        self.shared.borrow_mut().exit(entry.id, false)
    }

    /// Thread-safe handle for exiting entries from worker threads.
    pub fn remote_exit(&self) -> RemoteExit {
        RemoteExit {
            mailbox: self.exits.clone(),
            instance: self.instance,
        }
    }

    /// Enters `event`, runs `work`, and exits. The entry is also exited if
    /// `work` is dropped before completing.
    ///
    /// # Errors
    /// Classification and exit errors; `work`'s own output is returned as is.
    #[instrument(level = "debug", skip_all, fields(instance = self.instance))]
    pub async fn run_exclusive<E, F>(&self, event: &E, work: F) -> Result<F::Output, SyncError>
    where
        E: Classify + ?Sized,
        F: Future,
    {
        let entry = self.enter(event)?.await?;
        let guard = ExitOnDrop {
            sync: self,
            entry: Some(entry),
        };
        let output = work.await;
        guard.finish()?;
        Ok(output)
    }

    /// Counters plus current registry/ladder sizes.
    pub fn stats(&self) -> SyncStats {
        self.shared
            .try_borrow()
            .map(|state| state.snapshot())
            .unwrap_or_default()
    }

    /// Entries currently active.
    pub fn active_len(&self) -> usize {
        self.stats().active
    }

    /// Callers currently parked.
    pub fn waiting_len(&self) -> usize {
        self.stats().waiting
    }

    /// The scheduler thread this instance is bound to.
    pub fn affinity(&self) -> &SchedulerAffinity {
        &self.affinity
    }

    /// Configuration this instance was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn check_owner(&self, entry: &SyncEntry) -> Result<(), SyncError> {
        if entry.owner == self.instance {
            return Ok(());
        }
        self.shared.borrow_mut().stats.rejected_exits += 1;
        Err(SyncError::ForeignEntry {
            entry: entry.id,
            owner: entry.owner,
            this: self.instance,
        })
    }
}

struct ExitOnDrop<'a> {
    sync: &'a Synchronizer,
    entry: Option<SyncEntry>,
}

impl ExitOnDrop<'_> {
    fn finish(mut self) -> Result<(), SyncError> {
        match self.entry.take() {
            Some(entry) => self.sync.exit_event(entry),
            None => Ok(()),
        }
    }
}

impl Drop for ExitOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Err(err) = self.sync.exit_event(entry) {
                warn!(%err, "exit after interrupted exclusive run failed");
            }
        }
    }
}

enum EnterState {
    Ready(SyncEntry),
    Parked {
        waiter: WaiterId,
        rx: oneshot::Receiver<Activation>,
        shared: Weak<RefCell<SyncState>>,
        classification: EventClassification,
    },
    Done,
}

/// Future returned by [`Synchronizer::enter_event`].
///
/// Dropping it before completion withdraws the caller: a parked caller leaves
/// the ladder, and an activation that was delivered but never observed is
/// exited on the spot.
#[must_use = "dropping an Enter withdraws the event"]
pub struct Enter {
    state: EnterState,
    owner: u64,
    slow_after: Duration,
}

impl core::fmt::Debug for Enter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match &self.state {
            EnterState::Ready(_) => "ready",
            EnterState::Parked { .. } => "parked",
            EnterState::Done => "done",
        };
        f.debug_struct("Enter")
            .field("state", &state)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Enter {
    /// `true` when awaiting would complete without suspending: the fast path,
    /// or a parked caller whose activation has already been delivered.
    pub fn is_ready(&self) -> bool {
        match &self.state {
            EnterState::Ready(_) | EnterState::Done => true,
            EnterState::Parked { waiter, shared, .. } => shared.upgrade().map_or(true, |shared| {
                shared
                    .try_borrow()
                    .is_ok_and(|state| !state.ladder.contains(*waiter))
            }),
        }
    }

    /// `true` when the call had to park.
    pub fn is_parked(&self) -> bool {
        matches!(self.state, EnterState::Parked { .. })
    }
}

impl Future for Enter {
    type Output = Result<SyncEntry, SyncError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let activation = match &mut this.state {
            EnterState::Ready(_) => None,
            EnterState::Parked { rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => Some(result),
            },
            EnterState::Done => return Poll::Ready(Err(SyncError::PolledAfterCompletion)),
        };

        match (core::mem::replace(&mut this.state, EnterState::Done), activation) {
            (EnterState::Ready(entry), _) => Poll::Ready(Ok(entry)),
            (
                EnterState::Parked {
                    waiter,
                    classification,
                    ..
                },
                Some(Ok(activation)),
            ) => {
                let resumed_at = Instant::now();
                let handle = WaitHandle {
                    waiter,
                    blockers: activation.seeded,
                    reparks: activation.reparks,
                    parked_at: activation.parked_at,
                    released_at: activation.released_at,
                    resumed_at,
                };
                telemetry::resumed(activation.entry, handle.waited(), this.slow_after);
                Poll::Ready(Ok(SyncEntry {
                    id: activation.entry,
                    owner: this.owner,
                    classification,
                    wait_handle: Some(handle),
                    wait_count: activation.remaining,
                }))
            }
            _ => Poll::Ready(Err(SyncError::Abandoned)),
        }
    }
}

impl Drop for Enter {
    fn drop(&mut self) {
        let EnterState::Parked {
            waiter, rx, shared, ..
        } = &mut self.state
        else {
            return;
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if let Ok(mut state) = shared.try_borrow_mut() {
            state.abandon(*waiter, rx);
        };
    }
}

/// `Send + Sync` handle that posts exits to the scheduler thread.
///
/// The exit is applied by the [`ExitPump`] on the scheduler thread; the
/// calling worker never touches registry state. Posting from the scheduler
/// thread itself is allowed and is applied on the pump's next turn.
#[derive(Debug, Clone)]
pub struct RemoteExit {
    mailbox: Mailbox<SyncEntry>,
    instance: u64,
}

impl RemoteExit {
    /// Posts `entry` for exit on the scheduler thread.
    ///
    /// # Errors
    /// - [`SyncError::ForeignEntry`] when `entry` came from another instance.
    /// - [`SyncError::SchedulerGone`] when the pump has stopped.
    ///
    /// Unknown entries are detected when the pump applies the exit and are
    /// logged there.
    pub fn exit(&self, entry: SyncEntry) -> Result<(), SyncError> {
        if entry.owner != self.instance {
            return Err(SyncError::ForeignEntry {
                entry: entry.id,
                owner: entry.owner,
                this: self.instance,
            });
        }
        let id = entry.id;
        self.mailbox
            .post(entry)
            .map_err(|_| SyncError::SchedulerGone(id))
    }

    /// `true` when called on the scheduler thread.
    pub fn on_scheduler(&self) -> bool {
        self.mailbox.on_scheduler()
    }
}

/// Applies remote exits on the scheduler thread.
///
/// Runs until every [`Synchronizer`] handle and [`RemoteExit`] is dropped, or
/// the synchronizer state is gone.
#[must_use = "remote exits are never applied unless the pump runs"]
pub struct ExitPump {
    inbox: Inbox<SyncEntry>,
    shared: Weak<RefCell<SyncState>>,
}

impl core::fmt::Debug for ExitPump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExitPump").finish_non_exhaustive()
    }
}

impl ExitPump {
    /// Drains posted exits until the synchronizer goes away.
    #[instrument(name = "exit_pump", level = "debug", skip_all)]
    pub async fn run(mut self) {
        while let Some(entry) = self.inbox.recv().await {
            let Some(shared) = self.shared.upgrade() else {
                break;
            };
            let result = shared.borrow_mut().exit(entry.id, true);
            if let Err(err) = result {
                telemetry::remote_exit_failed(&err);
            }
        }
    }
}
