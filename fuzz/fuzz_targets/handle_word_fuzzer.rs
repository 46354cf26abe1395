//! Fuzz target for handle and status word decoding
//!
//! Every word the secure side writes into an output vector is untrusted.
//!
//! # Invariants
//!
//! - Decoding never panics
//! - A decoded handle re-encodes to the exact word it came from
//! - A decoded handle is accepted for its own family and no other
//! - Handles without reserved bits rebuild from their fields
//! - Status words survive the round trip

#![no_main]

use libfuzzer_sys::fuzz_target;
use nsbridge_proto::{FamilyId, HandleId, Status};

const RESERVED_MASK: u32 = 0x00FF_0000;

fuzz_target!(|input: (u32, u8)| {
    let (word, other_family) = input;

    let status = Status::from_word(word);
    assert_eq!(status.to_word(), word);

    let Ok(handle) = HandleId::from_word(word) else {
        assert!(word == 0 || word >> 24 == 0, "valid word {word:#010x} rejected");
        return;
    };
    assert_eq!(handle.to_word(), word);
    assert!(handle.index() < 256);
    assert_eq!(HandleId::from_word_for(word, handle.family()), Ok(handle));

    if let Some(other) = FamilyId::new(other_family) {
        if other != handle.family() {
            assert!(HandleId::from_word_for(word, other).is_err());
        }
    }

    if word & RESERVED_MASK == 0 {
        let index = u8::try_from(handle.index()).unwrap();
        let rebuilt = HandleId::new(handle.family(), handle.generation(), index);
        assert_eq!(rebuilt, handle);
    }
});
