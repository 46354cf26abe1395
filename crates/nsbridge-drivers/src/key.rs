//! Key material handed to the secure side.

use thiserror::Error;

/// Key validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key length not accepted by the algorithm
    #[error("invalid key length {len}, expected one of {expected:?}")]
    InvalidLength {
        /// Provided length in bytes
        len: usize,
        /// Accepted lengths in bytes
        expected: &'static [usize],
    },
}

/// AES key lengths in bytes.
pub const AES_KEY_LENGTHS: &[usize] = &[16, 24, 32];

/// Key material, either in the clear or held by the secure key store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CryptoKey {
    /// No key; placeholder in default-constructed operations
    #[default]
    Empty,
    /// Plaintext key bytes
    Plaintext(Vec<u8>),
    /// Key held by the secure key store
    KeyStore {
        /// Key store identifier
        id: u32,
        /// Key length in bytes
        len: usize,
    },
    /// Output slot of the given length for generated keys
    Blank {
        /// Requested length in bytes
        len: usize,
    },
}

impl CryptoKey {
    /// Plaintext AES key.
    ///
    /// # Errors
    ///
    /// `KeyError::InvalidLength` unless the key is 16, 24, or 32 bytes.
    pub fn aes(material: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let material = material.into();
        if !AES_KEY_LENGTHS.contains(&material.len()) {
            return Err(KeyError::InvalidLength { len: material.len(), expected: AES_KEY_LENGTHS });
        }
        Ok(Self::Plaintext(material))
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Plaintext(material) => material.len(),
            Self::KeyStore { len, .. } | Self::Blank { len } => *len,
        }
    }

    /// True for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
