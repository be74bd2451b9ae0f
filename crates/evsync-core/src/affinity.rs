// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler thread affinity.
//!
//! All registry and ladder mutation happens on the cooperative scheduler
//! thread. The synchronizer state is `Rc<RefCell<..>>`, so the compiler keeps
//! it there; this module provides the two pieces that cross the boundary:
//!
//! - [`SchedulerAffinity`]: the identity of the scheduler thread, captured
//!   where the synchronizer is built.
//! - a mailbox pair: `Mailbox<T>` is `Send + Sync` and only *posts* messages;
//!   `Inbox<T>` is drained by a task on the scheduler thread, which applies
//!   them.
//!
//! Waiters never need a hop of their own: they await a signal from a task
//! owned by the scheduler's `LocalSet`, so their continuation is polled there
//! regardless of which thread fired the signal.

use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

/// Identity of the single cooperative scheduler thread.
#[derive(Debug, Clone)]
pub struct SchedulerAffinity {
    thread: ThreadId,
    name: Option<String>,
}

impl SchedulerAffinity {
    /// Captures the calling thread as the scheduler thread.
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            thread: current.id(),
            name: current.name().map(ToOwned::to_owned),
        }
    }

    /// The scheduler thread's id.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// The scheduler thread's name, if it has one.
    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns `true` when called on the scheduler thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Creates a mailbox whose messages are consumed on this scheduler thread.
    pub(crate) fn mailbox<T>(&self) -> (Mailbox<T>, Inbox<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Mailbox {
                tx,
                scheduler: self.thread,
            },
            Inbox { rx },
        )
    }
}

/// Posting half; callable from any thread.
#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    tx: mpsc::UnboundedSender<T>,
    scheduler: ThreadId,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            scheduler: self.scheduler,
        }
    }
}

impl<T> Mailbox<T> {
    /// Posts `msg` for the scheduler thread. Hands the message back when the
    /// consuming task has stopped.
    pub(crate) fn post(&self, msg: T) -> Result<(), T> {
        self.tx.send(msg).map_err(|e| e.0)
    }

    /// Returns `true` when the caller is already on the scheduler thread.
    pub(crate) fn on_scheduler(&self) -> bool {
        thread::current().id() == self.scheduler
    }
}

/// Consuming half; lives on the scheduler thread.
#[derive(Debug)]
pub(crate) struct Inbox<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Inbox<T> {
    /// Next posted message; `None` once every mailbox is dropped.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
