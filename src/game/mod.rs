//! Game Logic Module
//!
//! Maze, universe rules, noise and the match state machine. Everything
//! except the [`master`] is deterministic and free of I/O.
//!
//! ## Module Structure
//!
//! - `maze`: Wall grid and layout text parser
//! - `universe`: Immutable match snapshot, legality, eat/kill rules
//! - `graph`: Shortest paths over the maze
//! - `noise`: Noised enemy positions
//! - `events`: Per-turn event records
//! - `config`: Match parameters
//! - `players`: Reference player logic
//! - `master`: Round/turn state machine driving remote teams

pub mod config;
pub mod events;
pub mod graph;
pub mod master;
pub mod maze;
pub mod noise;
pub mod players;
pub mod universe;

// Re-export key types
pub use config::{ConfigError, FallbackPolicy, MatchConfig, NoiseConfig};
pub use events::{GameEvent, GameEventData};
pub use master::{EndReason, GameMaster, MatchOutcome, MatchPhase, MatchRecord, TeamStats};
pub use maze::{parse_layout, Layout, LayoutError, Maze};
pub use noise::Noiser;
pub use universe::{Bot, Team, Universe, UniverseError};
