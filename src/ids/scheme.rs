//! The id scheme: how an internal counter state becomes a public id.
//!
//! A state is XORed with a fixed inverter, its bits are scattered over a
//! wider word according to a seeded swizzle table (the remaining positions
//! are filled with fresh random noise), and the word is written out in a
//! shuffled alphabet, least-significant digit first.
//!
//! ```text
//! state ──xor inverter──▶ masked ──swizzle + noise──▶ word ──radix──▶ "k3Xa9…"
//! ```
//!
//! Everything except the noise is derived from the configured seed, so every
//! server process sharing a database builds the same scheme.

use super::IdError;
use rand::rngs::{OsRng, StdRng};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashSet;
use thiserror::Error;

/// Upper bound on `bits_state + bits_noise`; the swizzled word is a `u64`.
pub const MAX_TOTAL_BITS: u32 = 63;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemeError {
    #[error("bits_state must be greater than zero")]
    NoStateBits,
    #[error("bits_state + bits_noise = {0} exceeds {MAX_TOTAL_BITS}")]
    TooManyBits(u32),
    #[error("at least two symbols are required, got {0}")]
    TooFewSymbols(usize),
    #[error("symbol {0:?} appears more than once")]
    DuplicateSymbol(char),
}

/// What one output bit of the swizzled word carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleBit {
    /// Copy of the given bit of the masked state.
    State(u32),
    /// Fresh random bit, drawn per encode.
    Noise,
}

/// Immutable id scheme, built once at startup and passed to every operation.
#[derive(Debug, Clone)]
pub struct IdScheme {
    alphabet: Vec<char>,
    swizzle: Vec<SwizzleBit>,
    inverter: u64,
    length: usize,
    bits_state: u32,
}

impl IdScheme {
    /// Derive the scheme from a seed, a symbol set and the bit widths.
    pub fn new(
        seed: u64,
        symbols: &str,
        bits_state: u32,
        bits_noise: u32,
    ) -> Result<Self, SchemeError> {
        if bits_state == 0 {
            return Err(SchemeError::NoStateBits);
        }
        let total = bits_state
            .checked_add(bits_noise)
            .filter(|t| *t <= MAX_TOTAL_BITS)
            .ok_or(SchemeError::TooManyBits(bits_state.saturating_add(bits_noise)))?;

        let mut alphabet: Vec<char> = symbols.chars().collect();
        if alphabet.len() < 2 {
            return Err(SchemeError::TooFewSymbols(alphabet.len()));
        }
        let mut seen = HashSet::new();
        for &c in &alphabet {
            if !seen.insert(c) {
                return Err(SchemeError::DuplicateSymbol(c));
            }
        }

        let mut swizzle: Vec<SwizzleBit> = (0..bits_state)
            .map(SwizzleBit::State)
            .chain((0..bits_noise).map(|_| SwizzleBit::Noise))
            .collect();

        let mut generator = StdRng::seed_from_u64(seed);
        swizzle.shuffle(&mut generator);
        alphabet.shuffle(&mut generator);
        let inverter = generator.gen_range(0..1u64 << bits_state);

        let length = digits_needed(alphabet.len() as u128, total);

        Ok(Self {
            alphabet,
            swizzle,
            inverter,
            length,
            bits_state,
        })
    }

    /// Length of every id produced by this scheme.
    pub fn length(&self) -> usize {
        self.length
    }

    /// First state that can no longer be encoded (`2^bits_state`).
    pub fn limit(&self) -> u64 {
        1u64 << self.bits_state
    }

    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }

    pub fn swizzle(&self) -> &[SwizzleBit] {
        &self.swizzle
    }

    /// Encode a state, drawing noise from the OS random source.
    pub fn encode(&self, state: u64) -> Result<String, IdError> {
        self.encode_with(state, &mut OsRng)
    }

    /// Encode a state with an explicit noise source.
    ///
    /// Passing a seeded generator makes the output reproducible; in
    /// production use [`encode`](Self::encode).
    pub fn encode_with<R: RngCore + ?Sized>(
        &self,
        state: u64,
        noise: &mut R,
    ) -> Result<String, IdError> {
        if state >= self.limit() {
            return Err(IdError::Exhausted {
                limit: self.limit(),
            });
        }

        let masked = state ^ self.inverter;
        let mut noise_word = noise.next_u64();
        let mut word = 0u64;
        for (i, bit) in self.swizzle.iter().enumerate() {
            let value = match *bit {
                SwizzleBit::State(b) => (masked >> b) & 1,
                SwizzleBit::Noise => {
                    let v = noise_word & 1;
                    noise_word >>= 1;
                    v
                }
            };
            word |= value << i;
        }

        let radix = self.alphabet.len() as u64;
        let mut id = String::with_capacity(self.length);
        for _ in 0..self.length {
            id.push(self.alphabet[(word % radix) as usize]);
            word /= radix;
        }
        Ok(id)
    }

    /// Syntactic check only: right length, every character in the alphabet.
    ///
    /// A valid id may still be unknown or expired; that takes a store lookup.
    pub fn validate(&self, id: &str) -> bool {
        let mut count = 0;
        for c in id.chars() {
            if !self.alphabet.contains(&c) {
                return false;
            }
            count += 1;
        }
        count == self.length
    }

    /// Recover the state an id was encoded from, ignoring its noise bits.
    ///
    /// Returns `None` for ids that fail [`validate`](Self::validate) or whose
    /// digits overflow the swizzled word.
    pub fn decode(&self, id: &str) -> Option<u64> {
        if !self.validate(id) {
            return None;
        }
        let radix = self.alphabet.len() as u128;
        let mut word = 0u128;
        for c in id.chars().rev() {
            let digit = self.alphabet.iter().position(|&a| a == c)? as u128;
            word = word * radix + digit;
        }
        if word >> self.swizzle.len() != 0 {
            return None;
        }

        let mut masked = 0u64;
        for (i, bit) in self.swizzle.iter().enumerate() {
            if let SwizzleBit::State(b) = *bit {
                masked |= (((word >> i) & 1) as u64) << b;
            }
        }
        Some(masked ^ self.inverter)
    }
}

/// Smallest `n` such that `radix^n >= 2^bits`.
fn digits_needed(radix: u128, bits: u32) -> usize {
    let target = 1u128 << bits;
    let mut span = 1u128;
    let mut digits = 0;
    while span < target {
        span *= radix;
        digits += 1;
    }
    digits
}
