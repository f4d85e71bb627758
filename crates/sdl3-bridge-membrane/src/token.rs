//! Generation-tagged opaque tokens.
//!
//! A token packs a slot index and the slot's generation into one machine
//! word so it can ride through a native `void *userdata` parameter. When a
//! slot is released its generation moves on, so a token that native code
//! kept past removal no longer matches the slot's next occupant.
//!
//! Layout (low to high bits): `index + 1` in `INDEX_BITS`, generation in the
//! remaining bits. The `+ 1` keeps every token non-zero, so a null context
//! pointer is never mistaken for a live registration.

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;

#[cfg(target_pointer_width = "64")]
pub(crate) const INDEX_BITS: u32 = 32;
#[cfg(not(target_pointer_width = "64"))]
pub(crate) const INDEX_BITS: u32 = 20;

const INDEX_MASK: usize = (1usize << INDEX_BITS) - 1;

/// Number of generation bits available on this target.
pub(crate) const GENERATION_BITS: u32 = usize::BITS - INDEX_BITS;

/// Largest slot index a token can encode.
pub(crate) const MAX_INDEX: usize = INDEX_MASK - 1;

/// Opaque, non-zero handle identifying one registration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Token(NonZeroUsize);

impl Token {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        debug_assert!(index <= MAX_INDEX);
        let generation = mask_generation(generation) as usize;
        let raw = generation.checked_shl(INDEX_BITS).unwrap_or(0) | (index + 1);
        // index + 1 >= 1, so raw is never zero.
        match NonZeroUsize::new(raw) {
            Some(raw) => Self(raw),
            None => unreachable!("token index bits are never zero"),
        }
    }

    /// Slot index encoded in this token.
    ///
    /// A forged word with empty index bits yields `usize::MAX`, which no slot
    /// ever has.
    #[must_use]
    pub(crate) fn index(self) -> usize {
        (self.0.get() & INDEX_MASK).wrapping_sub(1)
    }

    /// Generation encoded in this token.
    #[must_use]
    pub(crate) fn generation(self) -> u32 {
        self.0.get().checked_shr(INDEX_BITS).unwrap_or(0) as u32
    }

    /// The raw machine word handed to native code.
    #[must_use]
    pub const fn to_raw(self) -> usize {
        self.0.get()
    }

    /// Rebuild a token from a raw word. Zero is never a token.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Encode as a native `void *userdata` value.
    ///
    /// The pointer carries no provenance and must never be dereferenced.
    #[must_use]
    pub fn as_ptr(self) -> *mut c_void {
        std::ptr::without_provenance_mut(self.0.get())
    }

    /// Decode a native `void *userdata` value. Null yields `None`.
    #[must_use]
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        Self::from_raw(ptr.addr())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Truncate a generation counter to the bits a token can carry.
#[must_use]
pub(crate) fn mask_generation(generation: u32) -> u32 {
    if GENERATION_BITS >= u32::BITS {
        generation
    } else {
        generation & ((1u32 << GENERATION_BITS) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_generation_survive_encoding() {
        let token = Token::new(41, 7);
        assert_eq!(token.index(), 41);
        assert_eq!(token.generation(), 7);
    }

    #[test]
    fn slot_zero_generation_zero_is_not_null() {
        let token = Token::new(0, 0);
        assert_ne!(token.to_raw(), 0);
        assert!(!token.as_ptr().is_null());
    }

    #[test]
    fn pointer_round_trip() {
        let token = Token::new(1234, 99);
        let back = Token::from_ptr(token.as_ptr()).expect("non-null");
        assert_eq!(back, token);
    }

    #[test]
    fn null_and_zero_are_not_tokens() {
        assert!(Token::from_ptr(std::ptr::null()).is_none());
        assert!(Token::from_raw(0).is_none());
    }

    #[test]
    fn forged_word_without_index_bits_decodes_safely() {
        let forged = Token::from_raw(1usize << INDEX_BITS).expect("non-zero");
        assert_eq!(forged.index(), usize::MAX);
        assert_eq!(forged.generation(), 1);
    }

    #[test]
    fn different_generations_give_different_tokens() {
        assert_ne!(Token::new(5, 1), Token::new(5, 2));
    }

    #[test]
    fn generation_wraps_within_its_bits() {
        let max = mask_generation(u32::MAX);
        let token = Token::new(3, u32::MAX);
        assert_eq!(token.generation(), max);
        assert_eq!(token.index(), 3);
    }
}
