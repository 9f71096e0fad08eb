//! State Hashing for Verification
//!
//! Provides deterministic hashing of game state for:
//! - Replay validation (recorded turns must reproduce the same hashes)
//! - Viewers checking that they saw every update
//!
//! The hash of a universe is computed by `Universe::state_hash()`, which feeds
//! its fields into a [`StateHasher`] in a fixed order.

use sha2::{Digest, Sha256};

use super::position::Position;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for game state.
///
/// Wraps SHA-256 with helpers for grid types.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for universe state.
    pub fn for_universe() -> Self {
        Self::new(b"MAZE_CTF_UNIVERSE_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a grid position.
    #[inline]
    pub fn update_position(&mut self, pos: Position) {
        self.update_i32(pos.x);
        self.update_i32(pos.y);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hex string of a state hash, for logs and wire messages.
pub fn hash_hex(hash: &StateHash) -> String {
    hex::encode(hash)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_universe();
            hasher.update_u32(100);
            hasher.update_position(Position::new(3, 4));
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_position(Position::new(1, 2));
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_position(Position::new(2, 1));
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let hash = |domain: &[u8]| {
            let mut h = StateHasher::new(domain);
            h.update_u32(7);
            h.finalize()
        };

        let hash1 = hash(b"DOMAIN_A");
        let hash2 = hash(b"DOMAIN_B");

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_hash_hex_length() {
        let hash = StateHasher::for_universe().finalize();
        let text = hash_hex(&hash);
        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
