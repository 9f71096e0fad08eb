//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms.
//!
//! There is no global generator. Every random decision in a match draws from a
//! generator whose seed is derived from the match seed plus the indices that
//! identify the decision (round, team, bot), see [`derive_seed`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separator for noise seeds.
pub const NOISE_DOMAIN: &[u8] = b"MAZE_CTF_NOISE_V1";
/// Domain separator for per-team seeds handed to player processes.
pub const TEAM_DOMAIN: &[u8] = b"MAZE_CTF_TEAM_V1";
/// Domain separator for the referee's fallback-move generator.
pub const FALLBACK_DOMAIN: &[u8] = b"MAZE_CTF_FALLBACK_V1";

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform.
///
/// # Example
///
/// ```
/// use maze_ctf::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541); // Always the same!
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the generator used to noise one enemy bot.
    pub fn for_noise(match_seed: u64, round_index: u32, team_id: usize, bot_id: usize) -> Self {
        Self::new(derive_seed(
            NOISE_DOMAIN,
            match_seed,
            &[round_index as u64, team_id as u64, bot_id as u64],
        ))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a sub-seed from the match seed.
///
/// `domain` separates independent uses of the same match seed, `parts` are
/// the indices identifying the decision (hashed little-endian, in order).
pub fn derive_seed(domain: &[u8], match_seed: u64, parts: &[u64]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(match_seed.to_le_bytes());
    for part in parts {
        hasher.update(part.to_le_bytes());
    }
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

/// Seed handed to a team's player process in `SET_INITIAL`.
pub fn team_seed(match_seed: u64, team_id: usize) -> u64 {
    derive_seed(TEAM_DOMAIN, match_seed, &[team_id as u64])
}

// =============================================================================
// TESTS
// =============================================================================
