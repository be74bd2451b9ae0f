// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event classifications and tag-set overlap checks.
//!
//! A classification summarises which shared state an event occurrence may
//! touch: a [`Scope`] saying *who* a collision applies to, and a [`TagSet`]
//! naming the resources themselves. Tags are the sole resource-identity
//! mechanism; scope only narrows which active entries a tag collision is
//! checked against.
//!
//! ```text
//! Global{modify_world}        vs PerSubject(p){modify_world}  -> conflict
//! PerSubject(p){inventory}    vs PerSubject(q){inventory}     -> independent
//! PerSubject(p){inventory}    vs PerSubject(p){quests}        -> independent
//! ```
//!
//! Classifications are explicit data produced by the dispatch layer through
//! [`Classify`]; nothing here inspects event types at runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ClassificationError;
use crate::ident::SubjectId;

/// Early-exit intersection check for two ordered `BTreeSet`s.
///
/// Merge walk over both sorted iterators: O(n+m), exits on the first match.
fn intersects_btree<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> bool {
    let mut it_a = a.iter();
    let mut it_b = b.iter();
    let mut va = it_a.next();
    let mut vb = it_b.next();
    while let (Some(x), Some(y)) = (va, vb) {
        match x.cmp(y) {
            core::cmp::Ordering::Less => va = it_a.next(),
            core::cmp::Ordering::Greater => vb = it_b.next(),
            core::cmp::Ordering::Equal => return true,
        }
    }
    false
}

/// Opaque label naming a piece of shared state an event may mutate.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tag(Arc<str>);

impl Tag {
    /// Creates a tag from any string-like label.
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(Arc::from(label.as_ref()))
    }

    /// Returns the tag label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, duplicate-free set of tags.
///
/// Equality and overlap depend only on set membership, never on the order or
/// multiplicity tags were supplied in.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    /// Inserts a tag. Returns `false` if it was already present.
    pub fn insert(&mut self, tag: impl Into<Tag>) -> bool {
        self.0.insert(tag.into())
    }

    /// Returns true if `tag` is a member.
    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t.as_str() == tag)
    }

    /// Returns an iterator over the tags in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Returns true if any tag is shared with `other`.
    pub fn intersects(&self, other: &Self) -> bool {
        intersects_btree(&self.0, &other.0)
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of distinct tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<T: Into<Tag>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Tag>> Extend<T> for TagSet {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl core::fmt::Display for TagSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("{")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(tag.as_str())?;
        }
        f.write_str("}")
    }
}

/// Who a tag collision applies to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Scope {
    /// Mutation visible to every subject (world state). Collides with any
    /// tag-overlapping entry regardless of that entry's scope.
    Global,
    /// Mutation confined to one subject's state. Collides with Global entries
    /// and with entries for the same subject only.
    PerSubject(SubjectId),
}

impl Scope {
    /// Returns the subject for [`Scope::PerSubject`], `None` for [`Scope::Global`].
    #[must_use]
    pub const fn subject(&self) -> Option<SubjectId> {
        match self {
            Self::Global => None,
            Self::PerSubject(subject) => Some(*subject),
        }
    }

    /// Returns the payload-free scope kind.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match self {
            Self::Global => ScopeKind::Global,
            Self::PerSubject(_) => ScopeKind::PerSubject,
        }
    }
}

/// Scope discriminant as reported by metadata resolvers, before the subject is
/// attached. See [`EventClassification::from_parts`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ScopeKind {
    /// See [`Scope::Global`].
    Global,
    /// See [`Scope::PerSubject`].
    PerSubject,
}

/// Immutable description of one event occurrence: scope plus touched tags.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EventClassification {
    scope: Scope,
    tags: TagSet,
}

impl EventClassification {
    /// Classification for a world-wide event touching `tags`.
    pub fn global<T: Into<Tag>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self {
            scope: Scope::Global,
            tags: tags.into_iter().collect(),
        }
    }

    /// Classification for an event confined to `subject`, touching `tags`.
    pub fn per_subject<T: Into<Tag>>(subject: SubjectId, tags: impl IntoIterator<Item = T>) -> Self {
        Self {
            scope: Scope::PerSubject(subject),
            tags: tags.into_iter().collect(),
        }
    }

    /// Builds a classification from the raw parts a metadata resolver reports.
    ///
    /// # Errors
    /// - [`ClassificationError::MissingSubject`] for `PerSubject` without a subject.
    /// - [`ClassificationError::UnexpectedSubject`] for `Global` with a subject.
    pub fn from_parts<T: Into<Tag>>(
        kind: ScopeKind,
        subject: Option<SubjectId>,
        tags: impl IntoIterator<Item = T>,
    ) -> Result<Self, ClassificationError> {
        let scope = match (kind, subject) {
            (ScopeKind::Global, None) => Scope::Global,
            (ScopeKind::Global, Some(subject)) => {
                return Err(ClassificationError::UnexpectedSubject(subject))
            }
            (ScopeKind::PerSubject, Some(subject)) => Scope::PerSubject(subject),
            (ScopeKind::PerSubject, None) => return Err(ClassificationError::MissingSubject),
        };
        Ok(Self {
            scope,
            tags: tags.into_iter().collect(),
        })
    }

    /// Scope of the event.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Subject of a `PerSubject` event.
    #[must_use]
    pub const fn subject(&self) -> Option<SubjectId> {
        self.scope.subject()
    }

    /// Tags the event may touch.
    #[must_use]
    pub const fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns `true` when `self` and `other` must not be active together.
    ///
    /// Symmetric. Disjoint tags never conflict; with overlapping tags, two
    /// `PerSubject` classifications conflict only for the same subject, and
    /// any pairing involving `Global` conflicts.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        let scoped_together = match (self.scope, other.scope) {
            (Scope::PerSubject(a), Scope::PerSubject(b)) => a == b,
            _ => true,
        };
        scoped_together && self.tags.intersects(&other.tags)
    }
}

impl core::fmt::Display for EventClassification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.scope {
            Scope::Global => write!(f, "global{}", self.tags),
            Scope::PerSubject(subject) => write!(f, "subject[{subject}]{}", self.tags),
        }
    }
}

/// Maps an event-model value to its classification.
///
/// Implemented by the dispatch layer's event types so the synchronizer never
/// resolves metadata on the hot path. Resolution may fail when the event value
/// cannot name its subject.
pub trait Classify {
    /// Returns the classification for this occurrence.
    ///
    /// # Errors
    /// A [`ClassificationError`] when the scope and subject disagree.
    fn classify(&self) -> Result<EventClassification, ClassificationError>;
}

impl Classify for EventClassification {
    fn classify(&self) -> Result<EventClassification, ClassificationError> {
        Ok(self.clone())
    }
}
