// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Active registry: entries currently permitted to run.
//!
//! Entries are partitioned into a Global bucket and one bucket per subject, so
//! conflict computation for a `PerSubject(P)` arrival only walks the Global
//! bucket and P's bucket. A Global arrival walks everything.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::classification::{EventClassification, Scope};
use crate::ident::{EntryId, SubjectId, WaiterId};

/// An admitted entry plus the waiters counting down on its exit.
#[derive(Debug)]
pub(crate) struct ActiveEntry {
    pub(crate) classification: EventClassification,
    /// Parked waiters that listed this entry as a blocker, in parking order.
    pub(crate) dependents: Vec<WaiterId>,
}

#[derive(Debug, Default)]
pub(crate) struct ActiveRegistry {
    entries: FxHashMap<EntryId, ActiveEntry>,
    global: BTreeSet<EntryId>,
    by_subject: FxHashMap<SubjectId, BTreeSet<EntryId>>,
}

impl ActiveRegistry {
    /// Active entries that must exit before `classification` may activate,
    /// in ascending id (admission) order.
    pub(crate) fn conflicts(&self, classification: &EventClassification) -> Vec<EntryId> {
        if classification.tags().is_empty() {
            return Vec::new();
        }
        let mut out: Vec<EntryId> = Vec::new();
        self.collect_bucket(&self.global, classification, &mut out);
        match classification.scope() {
            Scope::Global => {
                for bucket in self.by_subject.values() {
                    self.collect_bucket(bucket, classification, &mut out);
                }
            }
            Scope::PerSubject(subject) => {
                if let Some(bucket) = self.by_subject.get(&subject) {
                    self.collect_bucket(bucket, classification, &mut out);
                }
            }
        }
        out.sort_unstable();
        out
    }

    fn collect_bucket(
        &self,
        bucket: &BTreeSet<EntryId>,
        classification: &EventClassification,
        out: &mut Vec<EntryId>,
    ) {
        for id in bucket {
            let Some(active) = self.entries.get(id) else {
                continue;
            };
            if active.classification.tags().intersects(classification.tags()) {
                out.push(*id);
            }
        }
    }

    pub(crate) fn insert(&mut self, id: EntryId, classification: EventClassification) {
        match classification.scope() {
            Scope::Global => {
                self.global.insert(id);
            }
            Scope::PerSubject(subject) => {
                self.by_subject.entry(subject).or_default().insert(id);
            }
        }
        self.entries.insert(
            id,
            ActiveEntry {
                classification,
                dependents: Vec::new(),
            },
        );
    }

    /// Removes an entry, returning it with its dependents. Empty subject
    /// buckets are dropped so long-running servers do not accumulate one per
    /// player ever seen.
    pub(crate) fn remove(&mut self, id: EntryId) -> Option<ActiveEntry> {
        let active = self.entries.remove(&id)?;
        match active.classification.scope() {
            Scope::Global => {
                self.global.remove(&id);
            }
            Scope::PerSubject(subject) => {
                if let Some(bucket) = self.by_subject.get_mut(&subject) {
                    bucket.remove(&id);
                    if bucket.is_empty() {
                        self.by_subject.remove(&subject);
                    }
                }
            }
        }
        Some(active)
    }

    pub(crate) fn add_dependent(&mut self, id: EntryId, waiter: WaiterId) {
        if let Some(active) = self.entries.get_mut(&id) {
            active.dependents.push(waiter);
        }
    }

    pub(crate) fn remove_dependent(&mut self, id: EntryId, waiter: WaiterId) {
        if let Some(active) = self.entries.get_mut(&id) {
            active.dependents.retain(|w| *w != waiter);
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn subject_buckets(&self) -> usize {
        self.by_subject.len()
    }
}
