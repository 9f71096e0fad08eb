//! Match Configuration
//!
//! Every tunable of a match lives in [`MatchConfig`]. It is serialized into
//! `SET_INITIAL` so both player processes know the deadlines and timeout
//! budget they are held to, and it can be loaded from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::universe::Scoring;

/// Fatal configuration errors. Raised before a match leaves `INITIALIZING`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_rounds` is zero.
    #[error("max_rounds must be at least 1")]
    ZeroRounds,

    /// A timeout or budget is zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// Bot count of the layout does not fit two teams.
    #[error("bot count {0} cannot be split into two equal teams")]
    BotCount(usize),

    /// Wrong number of agents handed to the game master.
    #[error("expected {expected} team agents, got {found}")]
    AgentCount {
        /// Always 2.
        expected: usize,
        /// What was supplied.
        found: usize,
    },

    /// Noise radius or sight distance reaches past every cell of the maze.
    #[error("noise {field} {value} exceeds the maze span {span}")]
    NoiseRange {
        /// `radius` or `sight_distance`.
        field: &'static str,
        /// Configured value.
        value: u32,
        /// Width plus height of the maze.
        span: u32,
    },

    /// Agents do not cover teams 0 and 1 exactly once.
    #[error("team agents must be assigned to teams 0 and 1")]
    TeamAssignment,

    /// Layout could not be parsed.
    #[error("invalid layout: {0}")]
    Layout(#[from] crate::game::maze::LayoutError),

    /// Config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `MatchConfig`.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What the referee does when a bot times out or sends an illegal move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Keep the bot where it is.
    Stay,
    /// Pick uniformly among legal moves, `Stay` only if nothing else is legal.
    #[default]
    #[value(alias = "random")]
    RandomLegal,
}

/// Distance used by the noiser.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// |dx| + |dy|
    #[default]
    Manhattan,
    /// sqrt(dx² + dy²)
    Euclidean,
}

impl DistanceMetric {
    /// Whether `a` and `b` are within `radius` of each other.
    #[inline]
    pub fn within(
        self,
        a: crate::core::position::Position,
        b: crate::core::position::Position,
        radius: u32,
    ) -> bool {
        match self {
            DistanceMetric::Manhattan => a.manhattan(b) <= radius,
            DistanceMetric::Euclidean => a.euclidean_sq(b) <= u64::from(radius) * u64::from(radius),
        }
    }
}

/// Noise parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Whether enemy positions are perturbed at all.
    pub enabled: bool,
    /// Maximum displacement of a noised position.
    pub radius: u32,
    /// Enemies within this distance of a friendly bot are reported exactly.
    pub sight_distance: u32,
    /// Distance metric for both radius and sight checks.
    pub metric: DistanceMetric,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 5,
            sight_distance: 5,
            metric: DistanceMetric::Manhattan,
        }
    }
}

/// Match parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Number of rounds before the match ends by score.
    pub max_rounds: u32,

    /// Per-move deadline.
    #[serde(with = "duration_ms")]
    pub move_timeout: Duration,

    /// Deadline for the `SET_INITIAL` / `READY` exchange.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Consecutive timeouts of one bot that forfeit its team.
    pub max_consecutive_timeouts: u32,

    /// Total timeouts of one team that forfeit it.
    pub max_total_timeouts: u32,

    /// Replacement move for timeouts and illegal moves.
    pub fallback: FallbackPolicy,

    /// Points for eating one enemy pellet.
    pub food_points: u32,

    /// Points for destroying an enemy bot.
    pub kill_points: u32,

    /// Match seed. Every random decision derives from it.
    pub seed: u64,

    /// Noise parameters.
    pub noise: NoiseConfig,

    /// How long a slow viewer may block the broadcaster.
    #[serde(with = "duration_ms")]
    pub viewer_grace: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 300,
            move_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(10),
            max_consecutive_timeouts: 3,
            max_total_timeouts: 5,
            fallback: FallbackPolicy::RandomLegal,
            food_points: 1,
            kill_points: 5,
            seed: 0,
            noise: NoiseConfig::default(),
            viewer_grace: Duration::from_secs(1),
        }
    }
}

impl MatchConfig {
    /// Load from a JSON file. Missing fields take their default.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: MatchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.move_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("move_timeout"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("handshake_timeout"));
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(ConfigError::ZeroValue("max_consecutive_timeouts"));
        }
        if self.max_total_timeouts == 0 {
            return Err(ConfigError::ZeroValue("max_total_timeouts"));
        }
        Ok(())
    }

    /// Check the noise ranges against a maze of `width` x `height` cells.
    ///
    /// No two cells are further apart than `width + height` under either
    /// metric, so larger values only cost scan time.
    pub fn validate_for_maze(&self, width: usize, height: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if !self.noise.enabled {
            return Ok(());
        }
        let span = u32::try_from(width.saturating_add(height)).unwrap_or(u32::MAX);
        for (field, value) in [
            ("radius", self.noise.radius),
            ("sight_distance", self.noise.sight_distance),
        ] {
            if value > span {
                return Err(ConfigError::NoiseRange { field, value, span });
            }
        }
        Ok(())
    }

    /// Point awards for the universe.
    pub fn scoring(&self) -> Scoring {
        Scoring {
            food_points: self.food_points,
            kill_points: self.kill_points,
        }
    }

    /// Set the match seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the round limit.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Set the per-move deadline.
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// Set the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set both timeout budgets.
    pub fn with_timeout_budget(mut self, consecutive: u32, total: u32) -> Self {
        self.max_consecutive_timeouts = consecutive;
        self.max_total_timeouts = total;
        self
    }

    /// Set the fallback policy.
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Set the noise parameters.
    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    /// Set the viewer grace period.
    pub fn with_viewer_grace(mut self, grace: Duration) -> Self {
        self.viewer_grace = grace;
        self
    }
}

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
