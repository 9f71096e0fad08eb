//! Game Master
//!
//! Drives one match from handshake to final summary:
//!
//! ```text
//! INITIALIZING ──both READY──► IN_PROGRESS ──terminal condition──► FINISHED
//!       │                                                             ▲
//!       └──────────────── handshake failure (forfeit / error) ────────┘
//! ```
//!
//! Each turn asks exactly one bot for its move, in bot-id order. Turns never
//! overlap: the universe is replaced wholesale after every move and handed
//! out only as copies.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::hash::{hash_hex, StateHash};
use crate::core::position::Move;
use crate::core::rng::{derive_seed, team_seed, DeterministicRng, FALLBACK_DOMAIN};
use crate::game::config::{ConfigError, FallbackPolicy, MatchConfig};
use crate::game::events::{GameEvent, GameEventData, ReplacementReason};
use crate::game::maze::{parse_layout, Layout, LayoutError};
use crate::game::noise::Noiser;
use crate::game::universe::{Universe, UniverseError, TEAM_COUNT};
use crate::network::agent::{HandshakeOutcome, MoveOutcome, TeamAgent};
use crate::network::protocol::{GetMove, MatchEnd, Message, Notification, SetInitial, StateUpdate};
use crate::network::viewer::{Viewer, ViewerHub};

/// The match cannot do what was asked in its current phase.
#[derive(Debug, Error)]
pub enum MatchError {
    /// `start` or `play_turn` called in the wrong phase.
    #[error("match is {0:?}")]
    WrongPhase(MatchPhase),
}

/// Replay failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Recorded layout does not parse.
    #[error("recorded layout is invalid: {0}")]
    Layout(#[from] LayoutError),

    /// A recorded move is not legal in the replayed universe.
    #[error("recorded move rejected: {0}")]
    Universe(#[from] UniverseError),

    /// The replayed universe diverged from the recording.
    #[error("state hash mismatch at round {round_index} turn {turn_index}")]
    HashMismatch {
        /// Round of the diverging turn.
        round_index: u32,
        /// Diverging turn.
        turn_index: u32,
    },

    /// Record could not be decoded.
    #[error("cannot decode match record: {0}")]
    Decode(#[from] bincode::Error),
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Current phase of the match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    /// Handshake not finished.
    #[default]
    Initializing,
    /// Turns are being played.
    InProgress,
    /// Final summary sent.
    Finished,
}

/// Why a team forfeited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForfeitCause {
    /// Consecutive or total timeout budget used up.
    Timeouts,
    /// Connection lost or protocol broken.
    Disconnected,
}

/// Why the match ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A team has no enemy food left to eat. Decided by score.
    AllFoodEaten,
    /// `max_rounds` rounds were played. Decided by score.
    RoundLimit,
    /// `team_id` gave up the match.
    Forfeit {
        /// Forfeiting team.
        team_id: usize,
        /// Cause.
        cause: ForfeitCause,
    },
    /// The match could not be played.
    Error {
        /// Cause.
        message: String,
    },
}

impl EndReason {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            EndReason::AllFoodEaten => "score",
            EndReason::RoundLimit => "round_limit",
            EndReason::Forfeit { .. } => "forfeit",
            EndReason::Error { .. } => "error",
        }
    }
}

/// Final result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winning team, `None` on a tie or error.
    pub winner: Option<usize>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Final scores.
    pub scores: [u32; TEAM_COUNT],
    /// Completed rounds.
    pub rounds_played: u32,
}

impl MatchOutcome {
    /// Whether nobody won.
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// Per-team statistics published with every state update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStats {
    /// Enemy pellets eaten.
    pub food_eaten: u32,
    /// Enemy bots destroyed.
    pub kills: u32,
    /// Own bots destroyed.
    pub times_killed: u32,
    /// Moves not answered in time.
    pub timeouts: u32,
    /// Moves into walls.
    pub illegal_moves: u32,
    /// Time spent waiting for this team's replies.
    pub think_time_ms: u64,
}

// =============================================================================
// RECORDING
// =============================================================================

/// One applied move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Round of the turn.
    pub round_index: u32,
    /// Turn within the round.
    pub turn_index: u32,
    /// Bot that moved.
    pub bot_id: usize,
    /// Move actually applied, after fallback substitution.
    pub mv: Move,
    /// Universe hash after the move.
    pub state_hash: StateHash,
}

/// Everything needed to replay a finished match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match identifier.
    pub match_id: Uuid,
    /// Parameters the match ran with.
    pub config: MatchConfig,
    /// Layout text of the initial universe.
    pub layout_text: String,
    /// Team names.
    pub team_names: [String; TEAM_COUNT],
    /// Applied moves in order.
    pub turns: Vec<TurnRecord>,
    /// Final result.
    pub outcome: MatchOutcome,
}

impl MatchRecord {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from bincode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplayError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Rebuild the initial universe and re-apply every turn.
    pub fn replay(&self) -> Result<Universe, ReplayError> {
        let layout = parse_layout(&self.layout_text)?;
        let initial = Universe::from_layout(&layout, self.config.scoring());
        replay(&initial, &self.turns)
    }
}

/// Re-apply recorded turns to `initial`, checking every state hash.
pub fn replay(initial: &Universe, turns: &[TurnRecord]) -> Result<Universe, ReplayError> {
    let mut universe = initial.clone();
    for record in turns {
        universe = universe.move_bot(record.bot_id, record.mv)?.universe;
        if universe.state_hash() != record.state_hash {
            return Err(ReplayError::HashMismatch {
                round_index: record.round_index,
                turn_index: record.turn_index,
            });
        }
    }
    Ok(universe)
}

// =============================================================================
// GAME MASTER
// =============================================================================

/// Round/turn state machine of one match.
pub struct GameMaster {
    match_id: Uuid,
    config: MatchConfig,
    layout_text: String,
    initial: Universe,
    universe: Universe,
    noiser: Noiser,
    agents: Vec<Box<dyn TeamAgent>>,
    hub: ViewerHub,
    phase: MatchPhase,
    round_index: u32,
    turn_index: u32,
    team_names: [String; TEAM_COUNT],
    stats: [TeamStats; TEAM_COUNT],
    consecutive_timeouts: Vec<u32>,
    say: Vec<String>,
    fallback_rng: DeterministicRng,
    turns: Vec<TurnRecord>,
    outcome: Option<MatchOutcome>,
}

impl GameMaster {
    /// Set up a match. Fails on any configuration problem, before any
    /// message is sent.
    pub fn new(
        layout: &Layout,
        config: MatchConfig,
        mut agents: Vec<Box<dyn TeamAgent>>,
    ) -> Result<Self, ConfigError> {
        let (width, height) = layout.dimensions();
        config.validate_for_maze(width, height)?;

        let bot_count = layout.bot_positions.len();
        if bot_count == 0 || bot_count % TEAM_COUNT != 0 {
            return Err(ConfigError::BotCount(bot_count));
        }
        if agents.len() != TEAM_COUNT {
            return Err(ConfigError::AgentCount {
                expected: TEAM_COUNT,
                found: agents.len(),
            });
        }
        agents.sort_by_key(|agent| agent.team_id());
        if agents.iter().enumerate().any(|(i, agent)| agent.team_id() != i) {
            return Err(ConfigError::TeamAssignment);
        }

        let universe = Universe::from_layout(layout, config.scoring());
        let fallback_rng = DeterministicRng::new(derive_seed(FALLBACK_DOMAIN, config.seed, &[]));

        Ok(Self {
            match_id: Uuid::new_v4(),
            noiser: Noiser::new(config.noise.clone(), config.seed),
            hub: ViewerHub::new(config.viewer_grace),
            layout_text: layout.to_text(),
            initial: universe.clone(),
            universe,
            agents,
            phase: MatchPhase::Initializing,
            round_index: 0,
            turn_index: 0,
            team_names: [String::new(), String::new()],
            stats: Default::default(),
            consecutive_timeouts: vec![0; bot_count],
            say: vec![String::new(); bot_count],
            fallback_rng,
            turns: Vec::new(),
            outcome: None,
            config,
        })
    }

    /// Use a fixed match id.
    pub fn with_match_id(mut self, match_id: Uuid) -> Self {
        self.match_id = match_id;
        self
    }

    /// Attach a viewer.
    pub fn add_viewer(&mut self, viewer: Box<dyn Viewer>) {
        self.hub.add(viewer);
    }

    /// Accept viewers that connect while the match runs.
    pub fn set_viewer_joiners(&mut self, joiners: mpsc::Receiver<Box<dyn Viewer>>) {
        self.hub.set_joiners(joiners);
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Match identifier.
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Match parameters.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// True current universe.
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Universe before the first move.
    pub fn initial_universe(&self) -> &Universe {
        &self.initial
    }

    /// Current round.
    pub fn round_index(&self) -> u32 {
        self.round_index
    }

    /// Index of the bot that moves next.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    /// Names reported in `READY`.
    pub fn team_names(&self) -> &[String; TEAM_COUNT] {
        &self.team_names
    }

    /// Per-team statistics.
    pub fn stats(&self) -> &[TeamStats; TEAM_COUNT] {
        &self.stats
    }

    /// Applied moves so far.
    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    /// Final result once finished.
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    /// Replay record, once the match is finished.
    pub fn match_record(&self) -> Option<MatchRecord> {
        let outcome = self.outcome.clone()?;
        Some(MatchRecord {
            match_id: self.match_id,
            config: self.config.clone(),
            layout_text: self.layout_text.clone(),
            team_names: self.team_names.clone(),
            turns: self.turns.clone(),
            outcome,
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Run the match to completion.
    pub async fn play(&mut self) -> Result<MatchOutcome, MatchError> {
        self.start().await?;
        loop {
            if let Some(outcome) = &self.outcome {
                return Ok(outcome.clone());
            }
            if let Some(outcome) = self.play_turn().await? {
                return Ok(outcome);
            }
        }
    }

    /// Send `SET_INITIAL` to both teams and wait for `READY`.
    ///
    /// A team that fails the handshake forfeits; if both fail the match ends
    /// with an error. Either way the match is then `FINISHED`.
    pub async fn start(&mut self) -> Result<(), MatchError> {
        if self.phase != MatchPhase::Initializing {
            return Err(MatchError::WrongPhase(self.phase));
        }

        let (width, height) = (self.universe.maze().width(), self.universe.maze().height());
        info!(
            "Match {} starting: {}x{} maze, {} bots, seed {}",
            self.match_id,
            width,
            height,
            self.universe.bots().len(),
            self.config.seed
        );

        let initials: Vec<SetInitial> = (0..TEAM_COUNT).map(|team_id| self.set_initial_for(team_id)).collect();
        let deadline = Instant::now() + self.config.handshake_timeout;
        let results = join_all(
            self.agents
                .iter_mut()
                .zip(initials)
                .map(|(agent, initial)| agent.set_initial(initial, deadline)),
        )
        .await;

        let mut failed = Vec::new();
        for (team_id, result) in results.into_iter().enumerate() {
            match result {
                HandshakeOutcome::Ready { team_name } => self.team_names[team_id] = team_name,
                HandshakeOutcome::TimedOut => {
                    warn!("Team {} missed the handshake deadline", team_id);
                    failed.push((team_id, ForfeitCause::Timeouts));
                }
                HandshakeOutcome::Disconnected { reason } => {
                    warn!("Team {} failed the handshake: {}", team_id, reason);
                    self.hub
                        .publish(&Message::Notify(Notification::Disconnected { team_id, reason }))
                        .await;
                    failed.push((team_id, ForfeitCause::Disconnected));
                }
            }
        }

        match failed.as_slice() {
            [] => {}
            [(team_id, cause)] => {
                self.forfeit(*team_id, *cause).await;
                return Ok(());
            }
            _ => {
                let outcome = self.outcome_for(EndReason::Error {
                    message: "no team completed the handshake".to_string(),
                });
                self.finish(outcome).await;
                return Ok(());
            }
        }

        self.phase = MatchPhase::InProgress;
        info!(
            "Match {}: {:?} vs {:?}",
            self.match_id, self.team_names[0], self.team_names[1]
        );

        let viewer_initial = SetInitial {
            match_id: self.match_id,
            team_id: None,
            bot_ids: (0..self.universe.bots().len()).collect(),
            team_seed: None,
            config: self.config.clone(),
            universe: self.universe.clone(),
        };
        self.hub.publish(&Message::SetInitial(viewer_initial)).await;
        self.publish_state(None, Vec::new(), false).await;
        Ok(())
    }

    /// Play one bot's move.
    ///
    /// Returns the outcome if this turn ended the match.
    pub async fn play_turn(&mut self) -> Result<Option<MatchOutcome>, MatchError> {
        if self.phase != MatchPhase::InProgress {
            return Err(MatchError::WrongPhase(self.phase));
        }

        let round_index = self.round_index;
        let turn_index = self.turn_index;
        let bot_id = turn_index as usize;
        let team_id = bot_id % TEAM_COUNT;

        let snapshot = self.noiser.noisy_snapshot(&self.universe, team_id, round_index);
        self.hub
            .publish(&Message::Notify(Notification::MoveRequested {
                bot_id,
                round_index,
                turn_index,
            }))
            .await;

        let request = GetMove {
            bot_id,
            round_index,
            turn_index,
            universe: snapshot,
            deadline_ms: self.config.move_timeout.as_millis() as u64,
        };
        let started = Instant::now();
        let reply = self.agents[team_id]
            .request_move(request, started + self.config.move_timeout)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.stats[team_id].think_time_ms += elapsed_ms;

        let mut replaced = None;
        let applied = match reply {
            MoveOutcome::Move { mv, say } => {
                self.consecutive_timeouts[bot_id] = 0;
                self.say[bot_id] = say.unwrap_or_default();
                self.hub
                    .publish(&Message::Notify(Notification::MoveReceived { bot_id, mv, elapsed_ms }))
                    .await;

                if self.universe.is_legal(bot_id, mv) {
                    mv
                } else {
                    warn!("Bot {} requested illegal move {}", bot_id, mv);
                    self.stats[team_id].illegal_moves += 1;
                    self.hub
                        .publish(&Message::Notify(Notification::IllegalMove { bot_id, mv }))
                        .await;
                    let applied = self.fallback_move(bot_id);
                    replaced = Some((Some(mv), applied, ReplacementReason::IllegalMove));
                    applied
                }
            }
            MoveOutcome::TimedOut => {
                self.consecutive_timeouts[bot_id] += 1;
                self.stats[team_id].timeouts += 1;
                let consecutive = self.consecutive_timeouts[bot_id];
                let total = self.stats[team_id].timeouts;
                warn!(
                    "Bot {} timed out ({} consecutive, {} for team {})",
                    bot_id, consecutive, total, team_id
                );
                self.hub
                    .publish(&Message::Notify(Notification::TimedOut {
                        bot_id,
                        team_id,
                        consecutive,
                        total,
                    }))
                    .await;

                if consecutive >= self.config.max_consecutive_timeouts || total >= self.config.max_total_timeouts {
                    return Ok(Some(self.forfeit(team_id, ForfeitCause::Timeouts).await));
                }
                let applied = self.fallback_move(bot_id);
                replaced = Some((None, applied, ReplacementReason::Timeout));
                applied
            }
            MoveOutcome::Disconnected { reason } => {
                self.hub
                    .publish(&Message::Notify(Notification::Disconnected { team_id, reason }))
                    .await;
                return Ok(Some(self.forfeit(team_id, ForfeitCause::Disconnected).await));
            }
        };

        let result = match self.universe.move_bot(bot_id, applied) {
            Ok(result) => result,
            Err(e) => {
                let outcome = self.outcome_for(EndReason::Error { message: e.to_string() });
                self.publish_state(None, Vec::new(), true).await;
                return Ok(Some(self.finish(outcome).await));
            }
        };
        self.universe = result.universe;

        for event in &result.events {
            match event {
                GameEventData::FoodEaten { team_id, .. } => self.stats[*team_id].food_eaten += 1,
                GameEventData::BotDestroyed { victim_team, .. } => {
                    self.stats[*victim_team].times_killed += 1;
                    self.stats[1 - *victim_team].kills += 1;
                }
                _ => {}
            }
        }

        let mut events: Vec<GameEvent> = result
            .events
            .into_iter()
            .chain(replaced.map(|(requested, applied, reason)| GameEventData::MoveReplaced {
                bot_id,
                requested,
                applied,
                reason,
            }))
            .map(|data| GameEvent::at(round_index, turn_index, data))
            .collect();
        events.sort();

        let state_hash = self.universe.state_hash();
        debug!(
            "Round {} turn {}: bot {} {} -> {}",
            round_index,
            turn_index,
            bot_id,
            applied,
            hash_hex(&state_hash)
        );
        #[cfg(feature = "debug-tracing")]
        trace!("Turn events: {:?}", events);

        self.turns.push(TurnRecord {
            round_index,
            turn_index,
            bot_id,
            mv: applied,
            state_hash,
        });

        self.turn_index += 1;
        if self.turn_index as usize == self.universe.bots().len() {
            self.turn_index = 0;
            self.round_index += 1;
        }

        let reason = if (0..TEAM_COUNT).any(|team| self.universe.enemy_food(team).is_empty()) {
            Some(EndReason::AllFoodEaten)
        } else if self.round_index >= self.config.max_rounds {
            Some(EndReason::RoundLimit)
        } else {
            None
        };

        let finished = reason.is_some();
        self.publish_state_at(round_index, turn_index, Some(bot_id), events, finished)
            .await;

        match reason {
            Some(reason) => {
                let outcome = self.outcome_for(reason);
                Ok(Some(self.finish(outcome).await))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn set_initial_for(&self, team_id: usize) -> SetInitial {
        SetInitial {
            match_id: self.match_id,
            team_id: Some(team_id),
            bot_ids: self.universe.team_bots(team_id).map(|bot| bot.id).collect(),
            team_seed: Some(team_seed(self.config.seed, team_id)),
            config: self.config.clone(),
            universe: self.noiser.noisy_snapshot(&self.universe, team_id, 0),
        }
    }

    /// Replacement for a timed-out or illegal move.
    fn fallback_move(&mut self, bot_id: usize) -> Move {
        match self.config.fallback {
            FallbackPolicy::Stay => Move::Stay,
            FallbackPolicy::RandomLegal => {
                let moves: Vec<Move> = self
                    .universe
                    .legal_moves(bot_id)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|mv| *mv != Move::Stay)
                    .collect();
                self.fallback_rng.choose(&moves).copied().unwrap_or(Move::Stay)
            }
        }
    }

    fn outcome_for(&self, reason: EndReason) -> MatchOutcome {
        let scores = self.universe.scores();
        let winner = match &reason {
            EndReason::Forfeit { team_id, .. } => Some(1 - *team_id),
            EndReason::Error { .. } => None,
            EndReason::AllFoodEaten | EndReason::RoundLimit => match scores[0].cmp(&scores[1]) {
                std::cmp::Ordering::Greater => Some(0),
                std::cmp::Ordering::Less => Some(1),
                std::cmp::Ordering::Equal => None,
            },
        };
        MatchOutcome {
            winner,
            reason,
            scores,
            rounds_played: self.round_index,
        }
    }

    async fn forfeit(&mut self, team_id: usize, cause: ForfeitCause) -> MatchOutcome {
        info!("Team {} forfeits ({:?})", team_id, cause);
        let outcome = self.outcome_for(EndReason::Forfeit { team_id, cause });
        self.publish_state(None, Vec::new(), true).await;
        self.finish(outcome).await
    }

    async fn publish_state(&mut self, bot_id: Option<usize>, events: Vec<GameEvent>, finished: bool) {
        self.publish_state_at(self.round_index, self.turn_index, bot_id, events, finished)
            .await;
    }

    async fn publish_state_at(
        &mut self,
        round_index: u32,
        turn_index: u32,
        bot_id: Option<usize>,
        events: Vec<GameEvent>,
        finished: bool,
    ) {
        let update = StateUpdate {
            match_id: self.match_id,
            round_index,
            turn_index,
            bot_id,
            universe: self.universe.clone(),
            events,
            team_names: self.team_names.clone(),
            stats: self.stats.clone(),
            say: self.say.clone(),
            state_hash: hash_hex(&self.universe.state_hash()),
            finished,
        };
        self.hub.publish(&Message::StateUpdate(update)).await;
    }

    /// Publish the summary, tell both teams, release every connection.
    async fn finish(&mut self, outcome: MatchOutcome) -> MatchOutcome {
        self.phase = MatchPhase::Finished;
        let final_state_hash = hash_hex(&self.universe.state_hash());
        info!(
            "Match {} finished ({}): winner {:?}, scores {:?}, hash {}",
            self.match_id,
            outcome.reason.code(),
            outcome.winner,
            outcome.scores,
            final_state_hash
        );

        let end = MatchEnd {
            match_id: self.match_id,
            outcome: outcome.clone(),
            team_names: self.team_names.clone(),
            stats: self.stats.clone(),
            final_state_hash,
        };
        self.hub.publish(&Message::MatchEnd(end.clone())).await;
        let deadline = Instant::now() + self.config.move_timeout;
        join_all(
            self.agents
                .iter_mut()
                .map(|agent| agent.notify_end(end.clone(), deadline)),
        )
        .await;
        self.hub.close().await;

        self.outcome = Some(outcome.clone());
        outcome
    }
}
