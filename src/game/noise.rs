//! Noiser: partial observability of enemy positions.
//!
//! Before a bot is asked for its move, its team receives a copy of the
//! universe in which every enemy bot that is farther than `sight_distance`
//! from the nearest friendly bot is reported at a random passable cell within
//! `radius` of its true position.
//!
//! The draw for one enemy bot is seeded from
//! `(match_seed, round_index, team_id, bot_id)`, so the same team sees the
//! same noise for the whole round and a replay reproduces it exactly.

use crate::core::position::Position;
use crate::core::rng::DeterministicRng;
use crate::game::config::NoiseConfig;
use crate::game::maze::Maze;
use crate::game::universe::Universe;

/// Produces noised universe snapshots.
#[derive(Clone, Debug)]
pub struct Noiser {
    config: NoiseConfig,
    match_seed: u64,
}

impl Noiser {
    /// Create a noiser for one match.
    pub fn new(config: NoiseConfig, match_seed: u64) -> Self {
        Self { config, match_seed }
    }

    /// Noise parameters.
    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Snapshot of `universe` as seen by `team_id` during `round_index`.
    ///
    /// Friendly bots are always exact. With noise disabled the snapshot is an
    /// unmodified copy.
    pub fn noisy_snapshot(&self, universe: &Universe, team_id: usize, round_index: u32) -> Universe {
        let mut snapshot = universe.clone();
        if !self.config.enabled {
            return snapshot;
        }

        let friends: Vec<Position> = universe.team_bots(team_id).map(|b| b.position).collect();

        for enemy in universe.enemy_bots(team_id) {
            let visible = friends
                .iter()
                .any(|friend| self.config.metric.within(*friend, enemy.position, self.config.sight_distance));
            if visible {
                continue;
            }

            let mut rng = DeterministicRng::for_noise(self.match_seed, round_index, team_id, enemy.id);
            let reported = self.altered_position(universe.maze(), enemy.position, &mut rng);
            snapshot.set_noised_position(enemy.id, reported);
        }

        snapshot
    }

    /// Pick a passable cell within `radius` of `true_position`.
    ///
    /// The true cell is itself a candidate, so the draw always terminates.
    pub fn altered_position(&self, maze: &Maze, true_position: Position, rng: &mut DeterministicRng) -> Position {
        let candidates = self.candidates(maze, true_position);
        rng.choose(&candidates).copied().unwrap_or(true_position)
    }

    /// All passable cells within the noise radius, row-major.
    fn candidates(&self, maze: &Maze, center: Position) -> Vec<Position> {
        let r = i32::try_from(self.config.radius).unwrap_or(i32::MAX);
        let max_x = i32::try_from(maze.width()).unwrap_or(i32::MAX) - 1;
        let max_y = i32::try_from(maze.height()).unwrap_or(i32::MAX) - 1;
        let (x0, x1) = (center.x.saturating_sub(r).max(0), center.x.saturating_add(r).min(max_x));
        let (y0, y1) = (center.y.saturating_sub(r).max(0), center.y.saturating_add(r).min(max_y));
        let mut out = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let pos = Position::new(x, y);
                if maze.is_passable(pos) && self.config.metric.within(center, pos, self.config.radius) {
                    out.push(pos);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::Move;
    use crate::game::config::DistanceMetric;
    use crate::game::maze::parse_layout;
    use crate::game::universe::Scoring;
    use proptest::prelude::*;

    const LAYOUT: &str = "
################################
#0 .   #            .      #  1#
#2   ###   ####   ##   #  ##  3#
#      .       #          .    #
################################
";

    fn universe() -> Universe {
        Universe::from_layout(&parse_layout(LAYOUT).unwrap(), Scoring::default())
    }

    fn noiser(seed: u64) -> Noiser {
        Noiser::new(NoiseConfig::default(), seed)
    }

    #[test]
    fn test_noise_is_deterministic() {
        let u = universe();
        let a = noiser(42).noisy_snapshot(&u, 0, 7);
        let b = noiser(42).noisy_snapshot(&u, 0, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_friendly_bots_are_exact() {
        let u = universe();
        let snapshot = noiser(1).noisy_snapshot(&u, 0, 0);
        for bot in snapshot.team_bots(0) {
            assert_eq!(bot.position, u.bot(bot.id).unwrap().position);
            assert!(!bot.noisy);
        }
    }

    #[test]
    fn test_distant_enemies_are_flagged_and_bounded() {
        let u = universe();
        let snapshot = noiser(3).noisy_snapshot(&u, 0, 0);
        for bot in snapshot.enemy_bots(0) {
            let truth = u.bot(bot.id).unwrap().position;
            assert!(bot.noisy);
            assert!(u.maze().is_passable(bot.position));
            assert!(truth.manhattan(bot.position) <= 5);
        }
    }

    #[test]
    fn test_close_enemy_not_noised() {
        let layout = parse_layout(
            "
################
#0     ..     1#
#2            3#
################
",
        )
        .unwrap();
        let mut u = Universe::from_layout(&layout, Scoring::default());
        for _ in 0..8 {
            u = u.move_bot(1, Move::West).unwrap().universe;
        }
        let enemy = u.bot(1).unwrap().position;
        assert_eq!(enemy, Position::new(6, 1));
        assert_eq!(enemy.manhattan(u.bot(0).unwrap().position), 5);

        let snapshot = noiser(9).noisy_snapshot(&u, 0, 2);
        let reported = snapshot.bot(1).unwrap();
        assert_eq!(reported.position, enemy);
        assert!(!reported.noisy);
        // Bot 3 is still far away
        assert!(snapshot.bot(3).unwrap().noisy);
    }

    #[test]
    fn test_disabled_noise_is_identity() {
        let u = universe();
        let config = NoiseConfig {
            enabled: false,
            ..NoiseConfig::default()
        };
        let snapshot = Noiser::new(config, 5).noisy_snapshot(&u, 1, 0);
        assert_eq!(snapshot, u);
    }

    #[test]
    fn test_zero_radius_keeps_truth() {
        let u = universe();
        let config = NoiseConfig {
            radius: 0,
            ..NoiseConfig::default()
        };
        let snapshot = Noiser::new(config, 5).noisy_snapshot(&u, 1, 0);
        for bot in snapshot.enemy_bots(1) {
            assert_eq!(bot.position, u.bot(bot.id).unwrap().position);
            assert!(bot.noisy);
        }
    }

    #[test]
    fn test_huge_radius_scans_only_the_maze() {
        let u = universe();
        let config = NoiseConfig {
            radius: 100_000,
            sight_distance: 0,
            metric: DistanceMetric::Euclidean,
            ..NoiseConfig::default()
        };
        let noiser = Noiser::new(config, 11);
        let maze = u.maze();
        let candidates = noiser.candidates(maze, u.bot(1).unwrap().position);
        assert_eq!(candidates.len(), maze.passable_positions().count());

        let snapshot = noiser.noisy_snapshot(&u, 0, 0);
        for bot in snapshot.enemy_bots(0) {
            assert!(maze.is_passable(bot.position));
        }
    }

    proptest! {
        #[test]
        fn prop_noised_positions_passable(seed in any::<u64>(), round in 0u32..300, team in 0usize..2, euclid in any::<bool>()) {
            let u = universe();
            let config = NoiseConfig {
                metric: if euclid { DistanceMetric::Euclidean } else { DistanceMetric::Manhattan },
                ..NoiseConfig::default()
            };
            let noiser = Noiser::new(config.clone(), seed);
            let snapshot = noiser.noisy_snapshot(&u, team, round);
            for bot in snapshot.bots() {
                let truth = u.bot(bot.id).unwrap().position;
                prop_assert!(u.maze().is_passable(bot.position));
                prop_assert!(config.metric.within(truth, bot.position, config.radius));
            }
            prop_assert_eq!(snapshot, noiser.noisy_snapshot(&u, team, round));
        }
    }
}
