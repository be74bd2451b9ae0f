// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Wait ladder: parked callers and their outstanding-predecessor countdowns.
//!
//! Each node is seeded with the number of active entries that blocked it at
//! parking time. Every blocker exit decrements the node once; at zero the node
//! is handed back to the synchronizer for activation. Nodes are kept in a
//! `BTreeMap` keyed by [`WaiterId`], so iteration follows parking order.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::classification::EventClassification;
use crate::ident::{EntryId, IdSequence, WaiterId};

/// Delivered through a node's signal once its entry is active.
#[derive(Debug)]
pub(crate) struct Activation {
    pub(crate) entry: EntryId,
    pub(crate) parked_at: Instant,
    pub(crate) released_at: Instant,
    pub(crate) seeded: usize,
    pub(crate) remaining: usize,
    pub(crate) reparks: u32,
}

#[derive(Debug)]
pub(crate) struct WaitNode {
    pub(crate) classification: EventClassification,
    /// Blockers still active; reaches zero exactly when `blockers` drains.
    pub(crate) remaining: usize,
    pub(crate) blockers: Vec<EntryId>,
    /// Size of the first blocker set, kept for diagnostics.
    pub(crate) seeded: usize,
    pub(crate) reparks: u32,
    pub(crate) parked_at: Instant,
    pub(crate) signal: oneshot::Sender<Activation>,
}

#[derive(Debug)]
pub(crate) struct WaitLadder {
    nodes: BTreeMap<WaiterId, WaitNode>,
    ids: IdSequence,
}

impl Default for WaitLadder {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            ids: IdSequence::new(),
        }
    }
}

impl WaitLadder {
    /// Parks a caller behind `blockers`; `blockers` must be non-empty.
    pub(crate) fn park(
        &mut self,
        classification: EventClassification,
        blockers: Vec<EntryId>,
        signal: oneshot::Sender<Activation>,
    ) -> WaiterId {
        debug_assert!(!blockers.is_empty(), "parking without blockers");
        let id = WaiterId::from_raw(self.ids.next());
        let seeded = blockers.len();
        self.nodes.insert(
            id,
            WaitNode {
                classification,
                remaining: seeded,
                blockers,
                seeded,
                reparks: 0,
                parked_at: Instant::now(),
                signal,
            },
        );
        id
    }

    /// Records that `blocker` exited. Returns `true` when the node's counter
    /// just reached zero. Unknown waiters and non-blockers are ignored.
    pub(crate) fn decrement(&mut self, waiter: WaiterId, blocker: EntryId) -> bool {
        let Some(node) = self.nodes.get_mut(&waiter) else {
            return false;
        };
        let Some(pos) = node.blockers.iter().position(|b| *b == blocker) else {
            return false;
        };
        node.blockers.swap_remove(pos);
        node.remaining = node.remaining.saturating_sub(1);
        node.remaining == 0
    }

    /// Re-seeds a released node that found new blockers at activation time.
    pub(crate) fn repark(&mut self, waiter: WaiterId, blockers: Vec<EntryId>) -> Option<u32> {
        let node = self.nodes.get_mut(&waiter)?;
        node.remaining = blockers.len();
        node.blockers = blockers;
        node.reparks += 1;
        Some(node.reparks)
    }

    pub(crate) fn get(&self, waiter: WaiterId) -> Option<&WaitNode> {
        self.nodes.get(&waiter)
    }

    pub(crate) fn take(&mut self, waiter: WaiterId) -> Option<WaitNode> {
        self.nodes.remove(&waiter)
    }

    pub(crate) fn contains(&self, waiter: WaiterId) -> bool {
        self.nodes.contains_key(&waiter)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ladder: &mut WaitLadder, blockers: &[u64]) -> (WaiterId, oneshot::Receiver<Activation>) {
        let (tx, rx) = oneshot::channel();
        let blockers = blockers.iter().map(|b| EntryId::from_raw(*b)).collect();
        let id = ladder.park(EventClassification::global(["t"]), blockers, tx);
        (id, rx)
    }

    #[test]
    fn counter_reaches_zero_after_every_blocker_exits() {
        let mut ladder = WaitLadder::default();
        let (w, _rx) = node(&mut ladder, &[1, 2]);
        assert!(!ladder.decrement(w, EntryId::from_raw(1)));
        assert!(ladder.decrement(w, EntryId::from_raw(2)));
        assert_eq!(ladder.get(w).map(|n| n.remaining), Some(0));
    }

    #[test]
    fn foreign_blockers_do_not_decrement() {
        let mut ladder = WaitLadder::default();
        let (w, _rx) = node(&mut ladder, &[1]);
        assert!(!ladder.decrement(w, EntryId::from_raw(5)));
        assert!(!ladder.decrement(WaiterId::from_raw(99), EntryId::from_raw(1)));
        assert_eq!(ladder.get(w).map(|n| n.remaining), Some(1));
    }

    #[test]
    fn waiter_ids_follow_parking_order() {
        let mut ladder = WaitLadder::default();
        let (a, _ra) = node(&mut ladder, &[1]);
        let (b, _rb) = node(&mut ladder, &[1]);
        assert!(a < b);
        assert_eq!(ladder.len(), 2);
    }

    #[test]
    fn repark_reseeds_the_counter() {
        let mut ladder = WaitLadder::default();
        let (w, _rx) = node(&mut ladder, &[1]);
        assert!(ladder.decrement(w, EntryId::from_raw(1)));
        assert_eq!(ladder.repark(w, vec![EntryId::from_raw(3)]), Some(1));
        let n = ladder.get(w);
        assert_eq!(n.map(|n| (n.remaining, n.seeded)), Some((1, 1)));
        assert!(ladder.decrement(w, EntryId::from_raw(3)));
        assert!(ladder.take(w).is_some());
        assert!(!ladder.contains(w));
    }
}
