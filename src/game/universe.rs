//! Universe: the complete state of a match at one point in time.
//!
//! A `Universe` is an immutable snapshot. [`Universe::move_bot`] returns a
//! new snapshot instead of mutating, so the game master can hand copies to
//! the noiser and to viewers without locking. The maze is shared behind an
//! `Arc`, so cloning a universe copies only food, bots and scores.
//!
//! ## Rules
//!
//! - A bot moves one cell per turn (or stays); walls block.
//! - Landing on enemy food (food outside the mover's home zone) eats it.
//! - If opposing bots share a cell, every one of them standing outside its
//!   own home zone is destroyed: it respawns at its initial position and the
//!   other team receives the kill award.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::position::{Move, Position};
use crate::game::events::GameEventData;
use crate::game::maze::{Layout, Maze};

/// Number of teams in a match.
pub const TEAM_COUNT: usize = 2;

/// Rule violations reported by the universe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniverseError {
    /// Bot id out of range.
    #[error("no bot with id {0}")]
    NoSuchBot(usize),

    /// Team id out of range.
    #[error("no team with id {0}")]
    NoSuchTeam(usize),

    /// The move would end on a wall.
    #[error("bot {bot_id} at {position} cannot move {mv}")]
    IllegalMove {
        /// Moving bot.
        bot_id: usize,
        /// Its position before the move.
        position: Position,
        /// Rejected move.
        mv: Move,
    },
}

/// Point awards applied by [`Universe::move_bot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoring {
    /// Points per eaten pellet.
    pub food_points: u32,
    /// Points per destroyed enemy.
    pub kill_points: u32,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            food_points: 1,
            kill_points: 5,
        }
    }
}

/// A bot on the grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    /// Index in turn order.
    pub id: usize,
    /// Owning team (`id % 2`).
    pub team_id: usize,
    /// Current cell.
    pub position: Position,
    /// Respawn cell.
    pub initial_position: Position,
    /// Set when the position was perturbed by the noiser.
    #[serde(default)]
    pub noisy: bool,
}

/// A team and its score.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// 0 or 1.
    pub id: usize,
    /// Inclusive x range of the home zone.
    pub zone: (i32, i32),
    /// Current score.
    pub score: u32,
}

impl Team {
    /// Whether column `x` is in this team's home zone.
    #[inline]
    pub fn owns(&self, x: i32) -> bool {
        x >= self.zone.0 && x <= self.zone.1
    }
}

/// Result of applying one move.
#[derive(Clone, Debug)]
pub struct MoveResult {
    /// The next snapshot.
    pub universe: Universe,
    /// What happened, in processing order.
    pub events: Vec<GameEventData>,
}

/// Immutable match snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Universe {
    maze: Arc<Maze>,
    food: BTreeSet<Position>,
    bots: Vec<Bot>,
    teams: [Team; TEAM_COUNT],
    scoring: Scoring,
}

impl Universe {
    /// Build the initial universe from a parsed layout.
    ///
    /// Bot `i` joins team `i % 2`; team 0 owns the western half.
    pub fn from_layout(layout: &Layout, scoring: Scoring) -> Self {
        let maze = Arc::new(layout.maze.clone());
        let mid = maze.midline();
        let teams = [
            Team {
                id: 0,
                zone: (0, mid - 1),
                score: 0,
            },
            Team {
                id: 1,
                zone: (mid, maze.width() as i32 - 1),
                score: 0,
            },
        ];
        let bots = layout
            .bot_positions
            .iter()
            .enumerate()
            .map(|(id, pos)| Bot {
                id,
                team_id: id % TEAM_COUNT,
                position: *pos,
                initial_position: *pos,
                noisy: false,
            })
            .collect();

        Self {
            maze,
            food: layout.food.clone(),
            bots,
            teams,
            scoring,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Wall grid.
    pub fn maze(&self) -> &Maze {
        &self.maze
    }

    /// Remaining food.
    pub fn food(&self) -> &BTreeSet<Position> {
        &self.food
    }

    /// All bots in turn order.
    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    /// Both teams.
    pub fn teams(&self) -> &[Team; TEAM_COUNT] {
        &self.teams
    }

    /// Point awards.
    pub fn scoring(&self) -> Scoring {
        self.scoring
    }

    /// Look up a bot.
    pub fn bot(&self, bot_id: usize) -> Result<&Bot, UniverseError> {
        self.bots.get(bot_id).ok_or(UniverseError::NoSuchBot(bot_id))
    }

    /// Look up a team.
    pub fn team(&self, team_id: usize) -> Result<&Team, UniverseError> {
        self.teams.get(team_id).ok_or(UniverseError::NoSuchTeam(team_id))
    }

    /// Scores as `[team0, team1]`.
    pub fn scores(&self) -> [u32; TEAM_COUNT] {
        [self.teams[0].score, self.teams[1].score]
    }

    /// Bots of `team_id`.
    pub fn team_bots(&self, team_id: usize) -> impl Iterator<Item = &Bot> {
        self.bots.iter().filter(move |b| b.team_id == team_id)
    }

    /// Bots not on `team_id`.
    pub fn enemy_bots(&self, team_id: usize) -> impl Iterator<Item = &Bot> {
        self.bots.iter().filter(move |b| b.team_id != team_id)
    }

    /// Whether `position` is inside the home zone of `team_id`.
    pub fn in_home_zone(&self, position: Position, team_id: usize) -> bool {
        self.teams
            .get(team_id)
            .map(|team| team.owns(position.x))
            .unwrap_or(false)
    }

    /// Food inside `team_id`'s home zone (what the team defends).
    pub fn team_food(&self, team_id: usize) -> Vec<Position> {
        self.food
            .iter()
            .filter(|pos| self.in_home_zone(**pos, team_id))
            .copied()
            .collect()
    }

    /// Food `team_id` may eat.
    pub fn enemy_food(&self, team_id: usize) -> Vec<Position> {
        self.food
            .iter()
            .filter(|pos| !self.in_home_zone(**pos, team_id))
            .copied()
            .collect()
    }

    // =========================================================================
    // MOVES
    // =========================================================================

    /// Legal moves of a bot: `Stay` plus each cardinal step not into a wall.
    pub fn legal_moves(&self, bot_id: usize) -> Result<Vec<Move>, UniverseError> {
        let bot = self.bot(bot_id)?;
        Ok(self.maze.legal_moves(bot.position))
    }

    /// Whether `mv` is legal for `bot_id`.
    pub fn is_legal(&self, bot_id: usize, mv: Move) -> bool {
        self.bot(bot_id)
            .map(|bot| self.maze.is_passable(bot.position.step(mv)))
            .unwrap_or(false)
    }

    /// Apply a move and return the next snapshot.
    ///
    /// Order: move, eat, destroy. `self` is left untouched.
    pub fn move_bot(&self, bot_id: usize, mv: Move) -> Result<MoveResult, UniverseError> {
        let bot = self.bot(bot_id)?;
        let from = bot.position;
        let to = from.step(mv);
        if !self.maze.is_passable(to) {
            return Err(UniverseError::IllegalMove {
                bot_id,
                position: from,
                mv,
            });
        }

        let mut next = self.clone();
        let mut events = Vec::new();
        let team_id = bot.team_id;

        next.bots[bot_id].position = to;
        events.push(GameEventData::BotMoved {
            bot_id,
            from,
            to,
            mv,
        });

        // Eat
        if !next.in_home_zone(to, team_id) && next.food.remove(&to) {
            next.teams[team_id].score += next.scoring.food_points;
            events.push(GameEventData::FoodEaten {
                bot_id,
                team_id,
                position: to,
                points: next.scoring.food_points,
            });
        }

        // Destroy
        let victims: Vec<usize> = next
            .bots
            .iter()
            .filter(|b| !next.in_home_zone(b.position, b.team_id))
            .filter(|b| {
                next.bots
                    .iter()
                    .any(|other| other.team_id != b.team_id && other.position == b.position)
            })
            .map(|b| b.id)
            .collect();

        for victim_id in victims {
            let victim = &mut next.bots[victim_id];
            let at = victim.position;
            let victim_team = victim.team_id;
            victim.position = victim.initial_position;
            let respawn = victim.initial_position;

            let other = 1 - victim_team;
            next.teams[other].score += next.scoring.kill_points;
            events.push(GameEventData::BotDestroyed {
                victim_id,
                victim_team,
                at,
                respawn,
                points: next.scoring.kill_points,
            });
        }

        Ok(MoveResult {
            universe: next,
            events,
        })
    }

    /// Report a bot at a noised position. Used by the noiser.
    ///
    /// The bot is flagged `noisy` even when the drawn cell is its true one.
    pub(crate) fn set_noised_position(&mut self, bot_id: usize, position: Position) {
        if let Some(bot) = self.bots.get_mut(bot_id) {
            bot.position = position;
            bot.noisy = true;
        }
    }

    // =========================================================================
    // HASHING
    // =========================================================================

    /// Compute deterministic state hash.
    ///
    /// Covers food, bot positions and scores. The maze never changes within
    /// a match, so only its dimensions are included.
    pub fn state_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_universe();

        hasher.update_u32(self.maze.width() as u32);
        hasher.update_u32(self.maze.height() as u32);

        // BTreeSet iterates in sorted order
        hasher.update_u32(self.food.len() as u32);
        for pos in &self.food {
            hasher.update_position(*pos);
        }

        hasher.update_u32(self.bots.len() as u32);
        for bot in &self.bots {
            hasher.update_position(bot.position);
        }

        for team in &self.teams {
            hasher.update_u32(team.score);
        }

        hasher.finalize()
    }
}

// =============================================================================
// TESTS
// =============================================================================
