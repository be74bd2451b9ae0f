// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use evsync_core::{make_subject_id, EventClassification, TagSet};
use proptest::prelude::*;

const ALPHABET: [&str; 6] = ["inventory", "quests", "stats", "modify_world", "weather", "chat"];

fn tags() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(ALPHABET.to_vec()), 0..8)
}

fn share_a_tag(a: &[&str], b: &[&str]) -> bool {
    a.iter().any(|t| b.contains(t))
}

proptest! {
    #[test]
    fn order_and_duplicates_are_ignored(
        raw in tags(),
        shuffled in tags().prop_shuffle(),
        extra in 0usize..4,
    ) {
        let mut noisy = raw.clone();
        noisy.extend(raw.iter().take(extra).copied());
        noisy.reverse();
        let a: TagSet = raw.iter().copied().collect();
        let b: TagSet = noisy.iter().copied().collect();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.to_string(), b.to_string());

        let other: TagSet = shuffled.iter().copied().collect();
        prop_assert_eq!(a.intersects(&other), b.intersects(&other));
    }

    #[test]
    fn conflicts_follow_scope_and_tag_overlap(
        a in tags(),
        b in tags(),
        same_subject in any::<bool>(),
        a_global in any::<bool>(),
        b_global in any::<bool>(),
    ) {
        let p = make_subject_id("p");
        let q = if same_subject { p } else { make_subject_id("q") };
        let left = if a_global {
            EventClassification::global(a.iter().copied())
        } else {
            EventClassification::per_subject(p, a.iter().copied())
        };
        let right = if b_global {
            EventClassification::global(b.iter().copied())
        } else {
            EventClassification::per_subject(q, b.iter().copied())
        };

        let scopes_meet = a_global || b_global || same_subject;
        let expected = scopes_meet && share_a_tag(&a, &b);
        prop_assert_eq!(left.conflicts_with(&right), expected);
        prop_assert_eq!(right.conflicts_with(&left), expected);
    }
}
