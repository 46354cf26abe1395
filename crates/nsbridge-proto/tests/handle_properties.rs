//! Property tests for handle word encoding.
//!
//! - Handles built from fields decode back to the same fields
//! - Any word with a non-zero family byte is a valid handle
//! - Handles differing only in generation never compare equal

use nsbridge_proto::{FamilyId, HandleId, ProtoError, Status};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_fields_decode(family in 1u8.., generation: u8, index: u8) {
        let family = FamilyId::new(family).unwrap();
        let handle = HandleId::new(family, generation, index);

        let decoded = HandleId::from_word(handle.to_word()).unwrap();

        prop_assert_eq!(decoded.family(), family);
        prop_assert_eq!(decoded.generation(), generation);
        prop_assert_eq!(decoded.index(), index as usize);
    }

    #[test]
    fn prop_family_byte_decides_validity(word: u32) {
        let result = HandleId::from_word(word);

        if word == 0 {
            prop_assert_eq!(result, Err(ProtoError::NullHandle));
        } else if word >> 24 == 0 {
            prop_assert_eq!(result, Err(ProtoError::MissingFamily(word)));
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn prop_generation_distinguishes_reuse(index: u8, a: u8, b: u8) {
        prop_assume!(a != b);

        let first = HandleId::new(FamilyId::AES_CTR, a, index);
        let second = HandleId::new(FamilyId::AES_CTR, b, index);

        prop_assert_eq!(first.index(), second.index());
        prop_assert_ne!(first, second);
    }

    #[test]
    fn prop_status_word_is_lossless(code: i32) {
        let status = Status::from_code(code);
        prop_assert_eq!(Status::from_word(status.to_word()), status);
    }
}
