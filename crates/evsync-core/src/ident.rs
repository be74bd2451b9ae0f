// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for subjects, active entries, and parked waiters.
use blake3::Hasher;

/// Canonical 256-bit hash used to address subjects.
pub type Hash = [u8; 32];

/// Strongly typed identifier for the subject (player, entity) a
/// [`Scope::PerSubject`](crate::Scope::PerSubject) event concerns.
///
/// `SubjectId` is opaque. Label-derived ids come from [`make_subject_id`]
/// (`blake3("subject:" || label)`); callers that already hold a stable 32-byte
/// identity (for example a player UUID widened by the dispatch layer) use
/// [`SubjectId::from_raw`]. The engine only relies on equality and hashing.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubjectId(pub Hash);

impl SubjectId {
    /// Wraps an existing 32-byte identity.
    #[must_use]
    pub const fn from_raw(bytes: Hash) -> Self {
        Self(bytes)
    }

    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl core::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Produces a stable, domain-separated subject identifier (prefix `b"subject:"`)
/// using BLAKE3.
pub fn make_subject_id(label: &str) -> SubjectId {
    let mut hasher = Hasher::new();
    hasher.update(b"subject:");
    hasher.update(label.as_bytes());
    SubjectId(hasher.finalize().into())
}

/// Identifier of an entry admitted into the active registry.
///
/// Issued monotonically per [`Synchronizer`](crate::Synchronizer); zero is
/// never issued.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct EntryId(u64);

impl EntryId {
    /// Constructs an `EntryId` from a raw `u64` value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a parked caller on the wait ladder.
///
/// Ordering follows parking order, which is the order released waiters are
/// activated in.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct WaiterId(u64);

impl WaiterId {
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for WaiterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source that skips zero.
#[derive(Debug)]
pub(crate) struct IdSequence(u64);

impl IdSequence {
    pub(crate) const fn new() -> Self {
        Self(0)
    }

    pub(crate) fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        self.0
    }
}
