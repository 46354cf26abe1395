//! Handle words issued by the secure partition.
//!
//! A handle is one 32-bit word. The secure side builds it from the family id
//! of the driver, a slot generation, and the slot index:
//!
//! ```text
//!  31        24 23        16 15         8 7          0
//! ┌────────────┬────────────┬────────────┬────────────┐
//! │ family id  │  reserved  │ generation │   index    │
//! └────────────┴────────────┴────────────┴────────────┘
//! ```
//!
//! # Invariants
//!
//! - The family id is never zero, so a valid handle is never the NULL word.
//! - Two handles for the same slot differ in generation once the slot has been
//!   closed and reused.

use std::fmt;

use crate::error::ProtoError;

const INDEX_MASK: u32 = 0x0000_00FF;
const GENERATION_SHIFT: u32 = 8;
const FAMILY_SHIFT: u32 = 24;

/// Identifier of an algorithm family on the secure side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(u8);

impl FamilyId {
    /// AES-CCM
    pub const AES_CCM: Self = Self(0x01);
    /// AES-CBC
    pub const AES_CBC: Self = Self(0x02);
    /// AES-CMAC and AES-CBC-MAC
    pub const AES_CMAC: Self = Self(0x03);
    /// AES-CTR
    pub const AES_CTR: Self = Self(0x04);
    /// AES-ECB
    pub const AES_ECB: Self = Self(0x05);
    /// AES-GCM
    pub const AES_GCM: Self = Self(0x06);
    /// AES-CTR-DRBG
    pub const AES_CTR_DRBG: Self = Self(0x07);
    /// Elliptic-curve Diffie-Hellman
    pub const ECDH: Self = Self(0x08);
    /// ECDSA
    pub const ECDSA: Self = Self(0x09);
    /// `EdDSA`
    pub const EDDSA: Self = Self(0x0A);
    /// EC-JPAKE
    pub const ECJPAKE: Self = Self(0x0B);
    /// SHA-2 and HMAC
    pub const SHA2: Self = Self(0x0C);
    /// True random number generator
    pub const TRNG: Self = Self(0x0D);

    /// Build a family id from its raw byte.
    ///
    /// Returns `None` for zero, which is reserved for the NULL handle.
    pub const fn new(raw: u8) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Raw byte value.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Opaque handle word naming one secure-side driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u32);

impl HandleId {
    /// Compose a handle from its fields.
    pub const fn new(family: FamilyId, generation: u8, index: u8) -> Self {
        Self(
            ((family.get() as u32) << FAMILY_SHIFT)
                | ((generation as u32) << GENERATION_SHIFT)
                | index as u32,
        )
    }

    /// Decode a handle word written by the secure side.
    ///
    /// # Errors
    ///
    /// - `ProtoError::NullHandle` for the zero word
    /// - `ProtoError::MissingFamily` if the family byte is zero
    pub fn from_word(word: u32) -> Result<Self, ProtoError> {
        if word == 0 {
            return Err(ProtoError::NullHandle);
        }
        if word >> FAMILY_SHIFT == 0 {
            return Err(ProtoError::MissingFamily(word));
        }
        Ok(Self(word))
    }

    /// Decode a handle word and require it to belong to `family`.
    pub fn from_word_for(word: u32, family: FamilyId) -> Result<Self, ProtoError> {
        let handle = Self::from_word(word)?;
        if handle.family() != family {
            return Err(ProtoError::FamilyMismatch {
                expected: family.get(),
                actual: handle.family().get(),
            });
        }
        Ok(handle)
    }

    /// Raw word as written into the output vector.
    pub const fn to_word(self) -> u32 {
        self.0
    }

    /// Slot index in the handle table.
    pub const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    /// Slot generation.
    pub const fn generation(self) -> u8 {
        (self.0 >> GENERATION_SHIFT) as u8
    }

    /// Family that issued the handle.
    pub const fn family(self) -> FamilyId {
        FamilyId((self.0 >> FAMILY_SHIFT) as u8)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.family(), self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_survive_composition() {
        let handle = HandleId::new(FamilyId::AES_CTR, 7, 3);

        assert_eq!(handle.family(), FamilyId::AES_CTR);
        assert_eq!(handle.generation(), 7);
        assert_eq!(handle.index(), 3);
        assert_eq!(handle.to_word(), 0x0400_0703);
    }

    #[test]
    fn null_word_is_rejected() {
        assert_eq!(HandleId::from_word(0), Err(ProtoError::NullHandle));
    }

    #[test]
    fn familyless_word_is_rejected() {
        assert_eq!(HandleId::from_word(0x0000_0101), Err(ProtoError::MissingFamily(0x0000_0101)));
    }

    #[test]
    fn foreign_family_is_rejected() {
        let word = HandleId::new(FamilyId::SHA2, 0, 0).to_word();

        let result = HandleId::from_word_for(word, FamilyId::TRNG);

        assert_eq!(
            result,
            Err(ProtoError::FamilyMismatch {
                expected: FamilyId::TRNG.get(),
                actual: FamilyId::SHA2.get()
            })
        );
    }

    #[test]
    fn zero_family_id_is_reserved() {
        assert!(FamilyId::new(0).is_none());
        assert_eq!(FamilyId::new(0x0D), Some(FamilyId::TRNG));
    }

    #[test]
    fn display_names_all_fields() {
        let handle = HandleId::new(FamilyId::ECDH, 2, 5);
        assert_eq!(handle.to_string(), "0x08:5#2");
    }
}
