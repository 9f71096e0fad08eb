//! # Maze CTF Referee
//!
//! Turn-based two-team capture-the-flag in a maze, refereed for bot
//! programs that run in their own processes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MAZE CTF REFEREE                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── position.rs - Grid positions and moves                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for replay checks           │
//! │                                                              │
//! │  game/           - Game logic                                │
//! │  ├── maze.rs     - Walls and layout parser                   │
//! │  ├── universe.rs - Match snapshot, eat and kill rules        │
//! │  ├── graph.rs    - Shortest paths                            │
//! │  ├── noise.rs    - Noised enemy positions                    │
//! │  ├── events.rs   - Per-turn events                           │
//! │  ├── config.rs   - Match parameters and validation           │
//! │  ├── master.rs   - Round/turn state machine                  │
//! │  └── players.rs  - Reference players                         │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── transport.rs- WebSocket links and connection registry   │
//! │  ├── protocol.rs - Envelope and message types                │
//! │  ├── agent.rs    - Remote team proxies                       │
//! │  ├── viewer.rs   - Publish channel to viewers                │
//! │  ├── client.rs   - Player-process and viewer clients         │
//! │  └── server.rs   - Referee server                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Given the same layout, seed and player logic, a match produces the same
//! sequence of universes:
//! - Noise is drawn from `(seed, round, team, bot)`
//! - Fallback moves come from a seeded generator
//! - Every applied move is recorded with the resulting state hash
//!
//! Only the timing of remote replies is outside the referee's control.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::position::{Move, Position};
pub use core::rng::DeterministicRng;
pub use game::config::MatchConfig;
pub use game::master::{GameMaster, MatchOutcome, MatchRecord};
pub use game::maze::{parse_layout, Layout};
pub use game::universe::Universe;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
