//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that stays inside the attribute domains of the sample records.

use crate::records::{Contact, Sample};
use itemdb_core::StoreId;
use proptest::prelude::*;

/// Strategy for generating valid type and attribute names.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("oid is reserved", |s| s != "oid" && s != "storeid")
}

/// Strategy for generating contact names, narrow enough to collide.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Ann", "Bo", "Cy", "Di", "Ed"]).prop_map(str::to_string)
}

/// Strategy for generating contacts.
pub fn contact_strategy() -> impl Strategy<Value = Contact> {
    (name_strategy(), "[0-9]{3,10}").prop_map(|(name, number)| Contact { name, number })
}

/// Strategy for sort ranks with heavy ties and occasional nulls.
pub fn rank_strategy() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        1 => Just(None),
        6 => (0i64..4).prop_map(Some),
    ]
}

/// Strategy for a column of ranks.
pub fn ranks_strategy(max_len: usize) -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(rank_strategy(), 0..max_len)
}

/// Strategy for reals that survive storage unchanged.
pub fn real_strategy() -> impl Strategy<Value = f64> {
    prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL
}

/// Strategy for sample records covering every attribute kind.
pub fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        any::<i64>(),
        prop::option::of(real_strategy()),
        "\\PC{0,32}",
        prop::option::of("\\PC{0,16}"),
        prop::collection::vec(any::<u8>(), 0..64),
        any::<bool>(),
        prop::option::of(any::<i64>()),
        prop::option::of((1i64..i64::MAX).prop_map(StoreId::new)),
    )
        .prop_map(|(whole, ratio, label, note, blob, flag, at, link)| Sample {
            whole,
            ratio,
            label,
            note,
            blob,
            flag,
            at,
            link,
        })
}
