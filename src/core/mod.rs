//! Core deterministic primitives.
//!
//! All types in this module are designed for perfect cross-platform determinism.
//! Replays and noise depend on them producing identical results everywhere.

pub mod hash;
pub mod position;
pub mod rng;

// Re-export core types
pub use hash::{hash_hex, StateHash, StateHasher};
pub use position::{Move, Position};
pub use rng::DeterministicRng;
