use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use maze_ctf::game::config::NoiseConfig;
use maze_ctf::game::graph::AdjacencyGraph;
use maze_ctf::game::noise::Noiser;
use maze_ctf::{parse_layout, Move, Universe};

const ARENA: &str = "
################################
#0   #        .     #         1#
#  # #  ####  ##  . #  ####  # #
#  #    #  .   #    .   #    # #
#  ####   .  #    #  .     ### #
#2        #     .        #    3#
################################
";

fn universe() -> Universe {
    let layout = parse_layout(ARENA).expect("bench layout");
    Universe::from_layout(&layout, Default::default())
}

fn bench_move_bot(c: &mut Criterion) {
    let start = universe();
    c.bench_function("move_bot_100_turns", |b| {
        b.iter_batched(
            || start.clone(),
            |mut u| {
                for turn in 0..100 {
                    let bot_id = turn % u.bots().len();
                    let moves = u.legal_moves(bot_id).unwrap_or_default();
                    let mv = moves.get(turn % moves.len().max(1)).copied().unwrap_or(Move::Stay);
                    u = u.move_bot(bot_id, mv).map(|r| r.universe).unwrap_or(u);
                }
                black_box(u)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_noisy_snapshot(c: &mut Criterion) {
    let u = universe();
    let noiser = Noiser::new(
        NoiseConfig {
            sight_distance: 0,
            ..NoiseConfig::default()
        },
        42,
    );
    c.bench_function("noisy_snapshot", |b| {
        let mut round = 0u32;
        b.iter(|| {
            round = round.wrapping_add(1);
            black_box(noiser.noisy_snapshot(&u, 0, round))
        });
    });
}

fn bench_shortest_path(c: &mut Criterion) {
    let u = universe();
    let graph = AdjacencyGraph::from_maze(u.maze());
    let from = u.bots()[0].position;
    let to = u.bots()[3].position;
    c.bench_function("shortest_path_corner_to_corner", |b| {
        b.iter(|| black_box(graph.shortest_path(from, to)))
    });
}

criterion_group!(benches, bench_move_bot, bench_noisy_snapshot, bench_shortest_path);
criterion_main!(benches);
