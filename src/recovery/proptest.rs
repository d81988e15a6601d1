//! Property-Based Tests for Recovery Records
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: persist then decode reproduces every entry
//! 2. **Tamper Detection**: changing any entry value breaks validation
//! 3. **Order Independence**: the digest ignores insertion order

#![cfg(test)]

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proptest::prelude::*;

use super::codec::decode;
use super::{Artifact, RecordStore, RecordType};

// =============================================================================
// Property Strategies
// =============================================================================

fn record_type_strategy() -> impl Strategy<Value = RecordType> {
    prop_oneof![
        Just(RecordType::Encryption),
        Just(RecordType::Partition),
        "[a-z]{3,10}".prop_map(|t| RecordType::from_tag(&t)),
    ]
}

/// Drive key -> wire value, including quotes, escapes and non-ASCII text.
fn entries_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("/dev/[a-z0-9]{1,12}", "\\PC{0,40}", 1..8)
}

fn build_store(
    record_type: &RecordType,
    entries: impl IntoIterator<Item = (String, String)>,
) -> RecordStore {
    let mut store = RecordStore::new();
    store.create(record_type.clone(), "bryck", None, "/unused");
    for (key, value) in entries {
        store
            .put(record_type, key, Artifact::from_wire(record_type, value))
            .unwrap();
    }
    store
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: encoding then decoding returns the same entries.
    #[test]
    fn prop_roundtrip(record_type in record_type_strategy(), entries in entries_strategy()) {
        let store = build_store(&record_type, entries.clone());
        let encoded = store.encode(&record_type)?;

        let decoded = decode(&encoded, Path::new("prop.bin"))?;
        prop_assert_eq!(&decoded.record_type, &record_type);

        let (_, record) = &decoded.records[0];
        let wire: BTreeMap<String, String> = record
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_wire()))
            .collect();
        prop_assert_eq!(wire, entries);
    }

    /// Property: altering one entry value without re-checksumming is detected.
    #[test]
    fn prop_tamper_detected(
        entries in prop::collection::btree_map("/dev/[a-z]{1,8}", "[a-z]{4,16}", 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let store = build_store(&RecordType::Partition, entries.clone());
        let encoded = store.encode(&RecordType::Partition)?;
        let text = String::from_utf8(STANDARD.decode(&encoded).unwrap()).unwrap();

        let (_, victim) = entries.iter().nth(pick.index(entries.len())).unwrap();
        let altered = format!("\"{}Z\"", victim);
        let tampered = text.replacen(&format!("\"{}\"", victim), &altered, 1);
        prop_assume!(tampered != text);

        let result = decode(&STANDARD.encode(tampered), Path::new("prop.bin"));
        prop_assert!(result.is_err());
    }

    /// Property: the digest does not depend on insertion order.
    #[test]
    fn prop_checksum_order_independent(entries in entries_strategy()) {
        let forward = build_store(&RecordType::Partition, entries.clone());
        let reverse = build_store(&RecordType::Partition, entries.into_iter().rev());

        prop_assert_eq!(forward.checksum()?, reverse.checksum()?);
        prop_assert_eq!(forward.checksum()?, forward.checksum()?);
    }
}
