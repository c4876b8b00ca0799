//! # Token Generation
//!
//! Collision-resistant pickup tokens from OS randomness. Two shapes exist:
//! a short human-typed code and a long identifier. Both are opaque lookup
//! keys to the rest of the store; uniqueness is enforced at creation time,
//! not here.
//!
//! ## Invariants
//! - Tokens are drawn from a cryptographically strong random source
//! - The generator holds no state, so it can never hand out "the next" token

use rand::rngs::OsRng;
use rand::Rng;
use uuid::Uuid;

/// Token shape requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStyle {
    /// Short fixed-length code from a configured alphabet, easy to type
    PickupCode,
    /// UUID-shaped identifier (122 random bits; dash grouping is cosmetic)
    LongId,
}

/// Stateless token generator
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl TokenGenerator {
    /// Create a generator for the given pickup-code alphabet and length
    pub fn new(alphabet: &str, length: usize) -> Self {
        Self {
            alphabet: alphabet.chars().collect(),
            length,
        }
    }

    /// Generate a token of the requested style
    pub fn generate(&self, style: TokenStyle) -> String {
        match style {
            TokenStyle::PickupCode => self.pickup_code(),
            TokenStyle::LongId => Self::long_id(),
        }
    }

    /// Fixed-length code drawn uniformly from the alphabet
    fn pickup_code(&self) -> String {
        let mut code = String::with_capacity(self.length);
        for _ in 0..self.length {
            let idx = OsRng.gen_range(0..self.alphabet.len());
            code.push(self.alphabet[idx]);
        }
        code
    }

    /// Randomized identifier, unique with overwhelming probability
    fn long_id() -> String {
        Uuid::new_v4().to_string()
    }
}
