//! Reference players.
//!
//! A [`Player`] holds the decision logic of one team. It runs inside the
//! player process (`ctf-bot`) or in-process through
//! [`LocalTeam`](crate::network::agent::LocalTeam) and only ever sees the
//! (noised) universe handed to it.

use std::collections::BTreeSet;

use crate::core::position::{Move, Position};
use crate::core::rng::DeterministicRng;
use crate::game::graph::AdjacencyGraph;
use crate::game::universe::Universe;

/// Decision logic of one team.
pub trait Player: Send {
    /// Name reported in `READY`.
    fn team_name(&self) -> String;

    /// Called once with the team id, the team's seed and the initial universe.
    fn set_initial(&mut self, _team_id: usize, _seed: u64, _universe: &Universe) {}

    /// Move for `bot_id` given the team's view of the universe.
    fn choose_move(&mut self, bot_id: usize, universe: &Universe) -> Move;

    /// Text to publish with the last move.
    fn say(&self) -> Option<String> {
        None
    }
}

/// Build a reference player by name: `random`, `stopping` or `food_eater`.
pub fn player_by_name(name: &str) -> Option<Box<dyn Player>> {
    match name {
        "random" => Some(Box::new(RandomPlayer::default())),
        "stopping" | "stop" => Some(Box::new(StoppingPlayer::default())),
        "food_eater" | "food-eater" => Some(Box::new(FoodEaterPlayer::default())),
        _ => None,
    }
}

/// Names accepted by [`player_by_name`].
pub const PLAYER_NAMES: &[&str] = &["random", "stopping", "food_eater"];

/// Never moves.
#[derive(Debug, Default)]
pub struct StoppingPlayer;

impl Player for StoppingPlayer {
    fn team_name(&self) -> String {
        "Stopping Players".to_string()
    }

    fn choose_move(&mut self, _bot_id: usize, _universe: &Universe) -> Move {
        Move::Stay
    }
}

/// Picks uniformly among legal moves, `Stay` included.
#[derive(Debug, Default)]
pub struct RandomPlayer {
    rng: DeterministicRng,
}

impl Player for RandomPlayer {
    fn team_name(&self) -> String {
        "Random Players".to_string()
    }

    fn set_initial(&mut self, _team_id: usize, seed: u64, _universe: &Universe) {
        self.rng = DeterministicRng::new(seed);
    }

    fn choose_move(&mut self, bot_id: usize, universe: &Universe) -> Move {
        let moves = universe.legal_moves(bot_id).unwrap_or_default();
        self.rng.choose(&moves).copied().unwrap_or(Move::Stay)
    }
}

/// Walks the shortest path to the nearest enemy food.
///
/// Ignores enemies entirely, so noise never changes its decisions.
#[derive(Debug, Default)]
pub struct FoodEaterPlayer {
    team_id: usize,
    graph: Option<AdjacencyGraph>,
    last_say: Option<String>,
}

impl FoodEaterPlayer {
    fn graph(&mut self, universe: &Universe) -> &AdjacencyGraph {
        self.graph
            .get_or_insert_with(|| AdjacencyGraph::from_maze(universe.maze()))
    }
}

impl Player for FoodEaterPlayer {
    fn team_name(&self) -> String {
        "Food Eaters".to_string()
    }

    fn set_initial(&mut self, team_id: usize, _seed: u64, universe: &Universe) {
        self.team_id = team_id;
        self.graph = Some(AdjacencyGraph::from_maze(universe.maze()));
    }

    fn choose_move(&mut self, bot_id: usize, universe: &Universe) -> Move {
        self.last_say = None;
        let Ok(bot) = universe.bot(bot_id) else {
            return Move::Stay;
        };
        let from = bot.position;
        let targets: BTreeSet<Position> = universe.enemy_food(bot.team_id).into_iter().collect();
        if targets.is_empty() {
            return Move::Stay;
        }

        let path = match self.graph(universe).shortest_path_to_any(from, &targets) {
            Ok(path) => path,
            Err(_) => return Move::Stay,
        };
        let Some(next) = path.first() else {
            return Move::Stay;
        };
        if path.len() == 1 {
            self.last_say = Some("nom".to_string());
        }
        from.move_towards(*next).unwrap_or(Move::Stay)
    }

    fn say(&self) -> Option<String> {
        self.last_say.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::maze::parse_layout;
    use crate::game::universe::Scoring;

    const LAYOUT: &str = "
##########
#0  #   1#
#2    . 3#
##########
";

    fn universe() -> Universe {
        Universe::from_layout(&parse_layout(LAYOUT).unwrap(), Scoring::default())
    }

    #[test]
    fn test_player_by_name() {
        for name in PLAYER_NAMES {
            assert!(player_by_name(name).is_some(), "{name}");
        }
        assert!(player_by_name("nobody").is_none());
    }

    #[test]
    fn test_food_eater_walks_to_food() {
        let mut u = universe();
        let mut player = FoodEaterPlayer::default();
        player.set_initial(0, 0, &u);

        // Bot 2 at (1, 2), food at (6, 2): five steps east
        for _ in 0..5 {
            let mv = player.choose_move(2, &u);
            assert_eq!(mv, Move::East);
            u = u.move_bot(2, mv).unwrap().universe;
        }
        assert_eq!(player.say(), Some("nom".to_string()));
        assert!(u.food().is_empty());
        assert_eq!(u.scores(), [1, 0]);
        assert_eq!(player.choose_move(2, &u), Move::Stay);
    }

    #[test]
    fn test_random_player_is_seeded_and_legal() {
        let u = universe();
        let mut a = RandomPlayer::default();
        let mut b = RandomPlayer::default();
        a.set_initial(1, 99, &u);
        b.set_initial(1, 99, &u);
        for _ in 0..50 {
            let mv = a.choose_move(1, &u);
            assert_eq!(mv, b.choose_move(1, &u));
            assert!(u.is_legal(1, mv));
        }
    }

    #[test]
    fn test_stopping_player() {
        let u = universe();
        assert_eq!(StoppingPlayer.choose_move(0, &u), Move::Stay);
    }
}
