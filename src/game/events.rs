//! Game Events
//!
//! Events generated while applying a move, for viewers and replay.

use serde::{Deserialize, Serialize};

use crate::core::position::{Move, Position};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// The move itself
    BotMoved = 0,
    /// Then food pickups
    FoodEaten = 1,
    /// Then kills
    BotDestroyed = 2,
    /// Lowest priority
    Other = 255,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventData {
    /// A bot executed a move
    BotMoved {
        bot_id: usize,
        from: Position,
        to: Position,
        mv: Move,
    },

    /// A bot ate an enemy pellet
    FoodEaten {
        bot_id: usize,
        team_id: usize,
        position: Position,
        points: u32,
    },

    /// A bot outside its home zone was sent back to its start cell
    BotDestroyed {
        victim_id: usize,
        victim_team: usize,
        at: Position,
        respawn: Position,
        points: u32,
    },

    /// The referee replaced the bot's move
    MoveReplaced {
        bot_id: usize,
        requested: Option<Move>,
        applied: Move,
        reason: ReplacementReason,
    },
}

impl GameEventData {
    /// Processing priority of this kind of event.
    pub fn priority(&self) -> EventPriority {
        match self {
            GameEventData::BotMoved { .. } => EventPriority::BotMoved,
            GameEventData::FoodEaten { .. } => EventPriority::FoodEaten,
            GameEventData::BotDestroyed { .. } => EventPriority::BotDestroyed,
            GameEventData::MoveReplaced { .. } => EventPriority::Other,
        }
    }
}

/// Why a move was substituted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementReason {
    /// The bot did not answer in time.
    Timeout,
    /// The bot asked for a move into a wall.
    IllegalMove,
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Round the event occurred in
    pub round_index: u32,

    /// Turn within the round
    pub turn_index: u32,

    /// Processing priority
    pub priority: EventPriority,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(round_index: u32, turn_index: u32, priority: EventPriority, data: GameEventData) -> Self {
        Self {
            round_index,
            turn_index,
            priority,
            data,
        }
    }

    /// Stamp event data with the turn it happened in.
    pub fn at(round_index: u32, turn_index: u32, data: GameEventData) -> Self {
        Self::new(round_index, turn_index, data.priority(), data)
    }

    /// Bot the event is about.
    pub fn bot_id(&self) -> usize {
        match &self.data {
            GameEventData::BotMoved { bot_id, .. } => *bot_id,
            GameEventData::FoodEaten { bot_id, .. } => *bot_id,
            GameEventData::BotDestroyed { victim_id, .. } => *victim_id,
            GameEventData::MoveReplaced { bot_id, .. } => *bot_id,
        }
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.round_index == other.round_index
            && self.turn_index == other.turn_index
            && self.priority == other.priority
            && self.bot_id() == other.bot_id()
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: round, turn, then priority, then bot id
        self.round_index
            .cmp(&other.round_index)
            .then(self.turn_index.cmp(&other.turn_index))
            .then(self.priority.cmp(&other.priority))
            .then(self.bot_id().cmp(&other.bot_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let moved = GameEvent::at(
            3,
            1,
            GameEventData::BotMoved {
                bot_id: 1,
                from: Position::new(2, 2),
                to: Position::new(3, 2),
                mv: Move::East,
            },
        );
        let eaten = GameEvent::at(
            3,
            1,
            GameEventData::FoodEaten {
                bot_id: 1,
                team_id: 1,
                position: Position::new(3, 2),
                points: 1,
            },
        );
        let killed = GameEvent::at(
            3,
            1,
            GameEventData::BotDestroyed {
                victim_id: 0,
                victim_team: 0,
                at: Position::new(3, 2),
                respawn: Position::new(1, 1),
                points: 5,
            },
        );
        let later = GameEvent::at(
            3,
            2,
            GameEventData::BotMoved {
                bot_id: 2,
                from: Position::new(1, 2),
                to: Position::new(1, 2),
                mv: Move::Stay,
            },
        );

        // Same turn: move < eat < kill
        assert!(moved < eaten);
        assert!(eaten < killed);

        // Later turn sorts after everything in the earlier one
        assert!(killed < later);
    }

    #[test]
    fn test_event_json_names() {
        let event = GameEvent::at(
            0,
            0,
            GameEventData::FoodEaten {
                bot_id: 1,
                team_id: 1,
                position: Position::new(3, 2),
                points: 1,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["food_eaten"]["points"], 1);
        assert_eq!(json["priority"], "FoodEaten");
    }
}
