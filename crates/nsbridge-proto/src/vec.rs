//! The one-in/one-out vector pair of a secure call.
//!
//! Every call carries exactly one input block and at most one output word.
//! Both borrow stack storage of the calling thread for the duration of the
//! call only; nothing reachable through them outlives the call.

use std::mem;

/// One machine word, the unit the output vector carries.
pub type Word = u32;

/// Size in bytes of the output word.
pub const WORD_LEN: usize = mem::size_of::<Word>();

/// Input vector: the message block and its declared length.
///
/// The block is borrowed mutably: operation messages carry the caller's
/// operation struct, and the secure side writes results (output buffers,
/// generated keys) through it.
#[derive(Debug)]
pub struct InVec<'a, M: ?Sized> {
    base: &'a mut M,
    len: usize,
}

impl<'a, M> InVec<'a, M> {
    /// Input vector whose length is the in-memory size of `base`.
    pub fn of(base: &'a mut M) -> Self {
        Self { base, len: mem::size_of::<M>() }
    }
}

impl<'a, M: ?Sized> InVec<'a, M> {
    /// Input vector with an explicit declared length.
    ///
    /// Used when `base` is a wrapper around the concrete message struct and
    /// the declared length must be that of the inner struct.
    pub fn with_len(base: &'a mut M, len: usize) -> Self {
        Self { base, len }
    }

    /// Message block.
    pub fn base(&self) -> &M {
        self.base
    }

    /// Message block, for the secure side to write results through.
    pub fn base_mut(&mut self) -> &mut M {
        self.base
    }

    /// Consume the vector, keeping the borrow of the message block.
    pub fn into_base(self) -> &'a mut M {
        self.base
    }

    /// Declared length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Output vector: an optional slot for one result word.
#[derive(Debug)]
pub struct OutVec<'a> {
    base: Option<&'a mut Word>,
    len: usize,
}

impl<'a> OutVec<'a> {
    /// Output vector writing into `slot`.
    pub fn word(slot: &'a mut Word) -> Self {
        Self { base: Some(slot), len: WORD_LEN }
    }

    /// Output vector for fire-and-forget messages: `{NULL, 0}`.
    pub fn none() -> Self {
        Self { base: None, len: 0 }
    }

    /// Declared length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for the `{NULL, 0}` vector.
    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// Write the result word. Returns false if the vector has no slot.
    pub fn write(&mut self, word: Word) -> bool {
        match self.base.as_deref_mut() {
            Some(slot) => {
                *slot = word;
                true
            },
            None => false,
        }
    }

    /// Current value of the slot, if any.
    pub fn peek(&self) -> Option<Word> {
        self.base.as_deref().copied()
    }
}
