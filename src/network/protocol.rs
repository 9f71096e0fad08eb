//! Protocol Messages
//!
//! Wire format between the referee, the player processes and viewers.
//! Every frame is a JSON text frame holding one [`Envelope`]:
//!
//! ```json
//! {"type": "GET_MOVE", "payload": {...}, "sequence": 17}
//! ```
//!
//! `sequence` is chosen by the sender of a request and echoed by the reply.
//! On the publish channel it increases by one per message so viewers can
//! detect gaps.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::position::Move;
use crate::game::config::MatchConfig;
use crate::game::events::GameEvent;
use crate::game::master::{MatchOutcome, TeamStats};
use crate::game::universe::{Universe, TEAM_COUNT};

/// Longest `say` text forwarded to viewers, in characters.
pub const MAX_SAY_LEN: usize = 100;

/// Errors while decoding a frame. Treated as a disconnect by the referee.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or the payload does not fit its type.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame was not a text frame.
    #[error("unexpected binary or control frame")]
    NotText,

    /// A well-formed message arrived where another kind was expected.
    #[error("expected {expected:?}, got {found:?}")]
    UnexpectedKind {
        /// What the state machine waited for.
        expected: MessageKind,
        /// What arrived.
        found: MessageKind,
    },
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Referee → bot process (and viewers): match parameters and initial state.
    SetInitial,
    /// Bot process → referee: reply to `SET_INITIAL`.
    Ready,
    /// Referee → bot process: ask for one bot's move.
    GetMove,
    /// Bot process → referee: reply to `GET_MOVE`.
    MoveReply,
    /// Referee → viewers: state after a turn.
    StateUpdate,
    /// Referee → everyone: final summary.
    MatchEnd,
    /// Referee → viewers: mirror of requests, replies and failures.
    Notify,
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Type-specific payload.
    pub payload: serde_json::Value,
    /// Request/reply correlation or publish counter.
    pub sequence: u64,
}

impl Envelope {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Decode the payload according to `kind`.
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        let payload = self.payload;
        let message = match self.kind {
            MessageKind::SetInitial => Message::SetInitial(serde_json::from_value(payload)?),
            MessageKind::Ready => Message::Ready(serde_json::from_value(payload)?),
            MessageKind::GetMove => Message::GetMove(serde_json::from_value(payload)?),
            MessageKind::MoveReply => Message::MoveReply(serde_json::from_value(payload)?),
            MessageKind::StateUpdate => Message::StateUpdate(serde_json::from_value(payload)?),
            MessageKind::MatchEnd => Message::MatchEnd(serde_json::from_value(payload)?),
            MessageKind::Notify => Message::Notify(serde_json::from_value(payload)?),
        };
        Ok(message)
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Decoded message.
#[derive(Debug, Clone)]
pub enum Message {
    /// Match parameters and initial state.
    SetInitial(SetInitial),
    /// Team is ready.
    Ready(Ready),
    /// Move request.
    GetMove(GetMove),
    /// Move reply.
    MoveReply(MoveReply),
    /// Post-turn state.
    StateUpdate(StateUpdate),
    /// Final summary.
    MatchEnd(MatchEnd),
    /// Mirrored traffic.
    Notify(Notification),
}

impl Message {
    /// Type tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::SetInitial(_) => MessageKind::SetInitial,
            Message::Ready(_) => MessageKind::Ready,
            Message::GetMove(_) => MessageKind::GetMove,
            Message::MoveReply(_) => MessageKind::MoveReply,
            Message::StateUpdate(_) => MessageKind::StateUpdate,
            Message::MatchEnd(_) => MessageKind::MatchEnd,
            Message::Notify(_) => MessageKind::Notify,
        }
    }

    /// Wrap into an envelope.
    pub fn to_envelope(&self, sequence: u64) -> Result<Envelope, serde_json::Error> {
        let payload = match self {
            Message::SetInitial(p) => serde_json::to_value(p)?,
            Message::Ready(p) => serde_json::to_value(p)?,
            Message::GetMove(p) => serde_json::to_value(p)?,
            Message::MoveReply(p) => serde_json::to_value(p)?,
            Message::StateUpdate(p) => serde_json::to_value(p)?,
            Message::MatchEnd(p) => serde_json::to_value(p)?,
            Message::Notify(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope {
            kind: self.kind(),
            payload,
            sequence,
        })
    }
}

/// `SET_INITIAL` payload.
///
/// Sent to each team (with its own `team_id` and `team_seed`) and, with
/// `team_id = None`, to viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetInitial {
    /// Match identifier.
    pub match_id: Uuid,
    /// Receiving team, `None` for viewers.
    pub team_id: Option<usize>,
    /// Bots the team controls.
    pub bot_ids: Vec<usize>,
    /// Seed for the team's own random decisions.
    pub team_seed: Option<u64>,
    /// Deadlines, timeout budget, scoring.
    pub config: MatchConfig,
    /// Initial universe (noised for teams).
    pub universe: Universe,
}

/// `READY` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    /// Display name of the team.
    pub team_name: String,
}

/// `GET_MOVE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMove {
    /// Bot to move.
    pub bot_id: usize,
    /// Current round.
    pub round_index: u32,
    /// Current turn.
    pub turn_index: u32,
    /// Universe as seen by the bot's team.
    pub universe: Universe,
    /// Milliseconds the bot has to answer.
    pub deadline_ms: u64,
}

/// `MOVE_REPLY` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveReply {
    /// Chosen move.
    #[serde(rename = "move")]
    pub mv: Move,
    /// Optional text shown by viewers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
}

/// `STATE_UPDATE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Match identifier.
    pub match_id: Uuid,
    /// Round of the turn just played.
    pub round_index: u32,
    /// Turn just played.
    pub turn_index: u32,
    /// Bot that moved, `None` for the initial state.
    pub bot_id: Option<usize>,
    /// True universe after the turn.
    pub universe: Universe,
    /// Events of the turn.
    pub events: Vec<GameEvent>,
    /// Team names.
    pub team_names: [String; TEAM_COUNT],
    /// Per-team statistics.
    pub stats: [TeamStats; TEAM_COUNT],
    /// Last `say` text of each bot.
    pub say: Vec<String>,
    /// Hex SHA-256 of the universe.
    pub state_hash: String,
    /// Set on the last update of the match.
    pub finished: bool,
}

/// `MATCH_END` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEnd {
    /// Match identifier.
    pub match_id: Uuid,
    /// Winner, reason and final score.
    pub outcome: MatchOutcome,
    /// Team names.
    pub team_names: [String; TEAM_COUNT],
    /// Per-team statistics.
    pub stats: [TeamStats; TEAM_COUNT],
    /// Hex SHA-256 of the final universe.
    pub final_state_hash: String,
}

/// `NOTIFY` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// `GET_MOVE` sent.
    MoveRequested {
        /// Bot asked.
        bot_id: usize,
        /// Round.
        round_index: u32,
        /// Turn.
        turn_index: u32,
    },
    /// `MOVE_REPLY` received in time.
    MoveReceived {
        /// Bot that answered.
        bot_id: usize,
        /// Requested move.
        #[serde(rename = "move")]
        mv: Move,
        /// Reply latency.
        elapsed_ms: u64,
    },
    /// No reply before the deadline.
    TimedOut {
        /// Bot that timed out.
        bot_id: usize,
        /// Its team.
        team_id: usize,
        /// Consecutive timeouts of this bot.
        consecutive: u32,
        /// Timeouts of the whole team.
        total: u32,
    },
    /// Move into a wall, replaced by the fallback.
    IllegalMove {
        /// Offending bot.
        bot_id: usize,
        /// Requested move.
        #[serde(rename = "move")]
        mv: Move,
    },
    /// Team connection lost or protocol broken.
    Disconnected {
        /// Team that left.
        team_id: usize,
        /// Cause as logged by the proxy.
        reason: String,
    },
}

/// Cut `text` to at most [`MAX_SAY_LEN`] characters.
pub fn truncate_say(text: &str) -> String {
    text.chars().take(MAX_SAY_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let msg = Message::MoveReply(MoveReply {
            mv: Move::North,
            say: Some("hi".to_string()),
        });
        let json = msg.to_envelope(7).unwrap().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "MOVE_REPLY");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["payload"]["move"], "north");
        assert_eq!(value["payload"]["say"], "hi");
    }

    #[test]
    fn test_envelope_decodes_by_kind() {
        let json = r#"{"type":"MOVE_REPLY","payload":{"move":"stay"},"sequence":3}"#;
        let envelope = Envelope::from_json(json).unwrap();
        assert_eq!(envelope.sequence, 3);
        match envelope.into_message().unwrap() {
            Message::MoveReply(reply) => {
                assert_eq!(reply.mv, Move::Stay);
                assert!(reply.say.is_none());
            }
            other => panic!("Wrong message type: {:?}", other.kind()),
        }
    }

    #[test]
    fn test_payload_mismatch_is_malformed() {
        let json = r#"{"type":"MOVE_REPLY","payload":{"team_name":"x"},"sequence":1}"#;
        let envelope = Envelope::from_json(json).unwrap();
        assert!(matches!(envelope.into_message(), Err(ProtocolError::Malformed(_))));

        assert!(Envelope::from_json(r#"{"type":"HELLO","payload":{},"sequence":1}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn test_notification_tagged() {
        let msg = Message::Notify(Notification::TimedOut {
            bot_id: 2,
            team_id: 0,
            consecutive: 1,
            total: 3,
        });
        let envelope = msg.to_envelope(0).unwrap();
        assert_eq!(envelope.kind, MessageKind::Notify);
        assert_eq!(envelope.payload["event"], "timed_out");
        assert_eq!(envelope.payload["total"], 3);
    }

    #[test]
    fn test_truncate_say() {
        let long = "x".repeat(250);
        assert_eq!(truncate_say(&long).chars().count(), MAX_SAY_LEN);
        assert_eq!(truncate_say("short"), "short");
    }
}
