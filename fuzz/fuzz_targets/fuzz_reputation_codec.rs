//! Fuzz target for reputation key and value decoding.
//!
//! Decoding arbitrary bytes must never panic, and anything that decodes
//! must encode back to the same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use repminer_types::{ReputationKey, ReputationValue};

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = ReputationKey::decode(data) {
        assert_eq!(key.encode().as_ref(), data);
    }
    if let Ok(value) = ReputationValue::decode(data) {
        assert_eq!(value.encode().as_ref(), data);
    }
});
