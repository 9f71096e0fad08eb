//! End-to-end matches over localhost WebSocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use maze_ctf::game::config::FallbackPolicy;
use maze_ctf::game::master::{EndReason, ForfeitCause, MatchRecord};
use maze_ctf::game::players::{player_by_name, StoppingPlayer};
use maze_ctf::network::client::{BotClient, ViewerClient};
use maze_ctf::network::protocol::{Envelope, Message, MessageKind, MoveReply, Ready};
use maze_ctf::network::server::{Referee, ServerConfig};
use maze_ctf::{parse_layout, Move, MatchConfig};

const ARENA: &str = "
################
#0            1#
#  ####  ####  #
#      .       #
#       .      #
#  ####  ####  #
#2            3#
################
";

const CORRIDOR: &str = "
########
#0 .. 1#
########
";

fn local_config(match_config: MatchConfig) -> ServerConfig {
    let any = SocketAddr::from(([127, 0, 0, 1], 0));
    ServerConfig {
        team_addrs: [any, any],
        viewer_addr: Some(any),
        link_capacity: 64,
        match_config,
    }
}

async fn bind(layout: &str, match_config: MatchConfig) -> (Referee, [SocketAddr; 2]) {
    let referee = Referee::bind(local_config(match_config), parse_layout(layout).unwrap())
        .await
        .unwrap();
    let addrs = [referee.team_addr(0).unwrap(), referee.team_addr(1).unwrap()];
    (referee, addrs)
}

fn spawn_bot(addr: SocketAddr, player: &str) -> tokio::task::JoinHandle<()> {
    let player = player_by_name(player).unwrap();
    tokio::spawn(async move {
        let client = BotClient::connect(addr, player).await.unwrap();
        client.run().await.unwrap();
    })
}

async fn food_eater_match() -> (MatchRecord, Vec<Envelope>) {
    let config = MatchConfig::default().with_seed(42).with_max_rounds(100);
    let (referee, addrs) = bind(ARENA, config).await;
    let viewer_addr = referee.viewer_addr().unwrap();
    let referee = tokio::spawn(referee.run());

    let mut viewer = ViewerClient::connect(viewer_addr).await.unwrap();
    let bots = [spawn_bot(addrs[0], "food_eater"), spawn_bot(addrs[1], "food_eater")];

    let mut published = Vec::new();
    while let Some(envelope) = viewer.next_envelope().await {
        let done = envelope.kind == MessageKind::MatchEnd;
        published.push(envelope);
        if done {
            break;
        }
    }

    let record = referee.await.unwrap().unwrap();
    for bot in bots {
        bot.await.unwrap();
    }
    (record, published)
}

#[tokio::test]
async fn test_food_eaters_seed_42_is_reproducible() {
    let (first, published) = food_eater_match().await;
    let (second, _) = food_eater_match().await;

    assert_eq!(first.outcome.reason, EndReason::AllFoodEaten);
    assert!(first.outcome.rounds_played < 100);
    assert_eq!(first.outcome.scores, [0, 1]);
    assert_eq!(first.outcome.winner, Some(1));
    assert_eq!(first.team_names[0], "Food Eaters");

    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.turns, second.turns);

    let replayed = first.replay().unwrap();
    assert_eq!(Some(replayed.state_hash()), first.turns.last().map(|t| t.state_hash));

    // The viewer saw the whole match in order
    assert_eq!(published.first().map(|e| e.kind), Some(MessageKind::SetInitial));
    for (i, envelope) in published.iter().enumerate() {
        assert_eq!(envelope.sequence, i as u64);
    }
    let updates: Vec<(u64, u64)> = published
        .iter()
        .filter(|e| e.kind == MessageKind::StateUpdate)
        .skip(1)
        .map(|e| {
            (
                e.payload["round_index"].as_u64().unwrap(),
                e.payload["turn_index"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(updates.len(), first.turns.len());
    assert!(updates.windows(2).all(|w| w[0] < w[1]));
}

/// Raw team client: answers the handshake, then hands every `GET_MOVE`
/// to `on_move` and reports what it received until the socket closes.
async fn raw_team<F>(addr: SocketAddr, mut on_move: F) -> Vec<MessageKind>
where
    F: FnMut(usize, u64) -> Option<String>,
{
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    let mut received = Vec::new();
    let mut moves = 0;
    while let Some(Ok(frame)) = ws.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let envelope = Envelope::from_json(&text).unwrap();
        received.push(envelope.kind);
        let reply = match envelope.kind {
            MessageKind::SetInitial => Some(
                Message::Ready(Ready {
                    team_name: "raw".to_string(),
                })
                .to_envelope(envelope.sequence)
                .unwrap()
                .to_json()
                .unwrap(),
            ),
            MessageKind::GetMove => {
                moves += 1;
                on_move(moves, envelope.sequence)
            }
            _ => None,
        };
        if let Some(text) = reply {
            if ws.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }
    received
}

fn stay_reply(sequence: u64) -> String {
    Message::MoveReply(MoveReply {
        mv: Move::Stay,
        say: None,
    })
    .to_envelope(sequence)
    .unwrap()
    .to_json()
    .unwrap()
}

#[tokio::test]
async fn test_protocol_error_forfeits_and_stops_requests() {
    let (referee, addrs) = bind(CORRIDOR, MatchConfig::default().with_seed(1)).await;
    let referee = tokio::spawn(referee.run());

    let stopping = tokio::spawn(async move {
        let client = BotClient::connect(addrs[0], Box::new(StoppingPlayer)).await.unwrap();
        client.run().await.unwrap()
    });
    // Second request is answered with garbage
    let broken = raw_team(addrs[1], |n, sequence| {
        Some(if n == 1 {
            stay_reply(sequence)
        } else {
            "not json".to_string()
        })
    });

    let received = broken.await;
    let record = referee.await.unwrap().unwrap();
    let end = stopping.await.unwrap();

    assert_eq!(
        record.outcome.reason,
        EndReason::Forfeit {
            team_id: 1,
            cause: ForfeitCause::Disconnected
        }
    );
    assert_eq!(record.outcome.winner, Some(0));
    assert_eq!(end.outcome, record.outcome);

    let get_moves = received.iter().filter(|k| **k == MessageKind::GetMove).count();
    assert_eq!(get_moves, 2);
    assert!(!received.contains(&MessageKind::MatchEnd));
}

#[tokio::test]
async fn test_three_timeouts_forfeit() {
    let config = MatchConfig::default()
        .with_seed(5)
        .with_move_timeout(Duration::from_millis(50))
        .with_timeout_budget(3, 10)
        .with_fallback(FallbackPolicy::Stay);
    let (referee, addrs) = bind(CORRIDOR, config).await;
    let referee = tokio::spawn(referee.run());

    let stopping = spawn_bot(addrs[0], "stopping");
    let silent = raw_team(addrs[1], |_, _| None);

    let received = silent.await;
    let record = referee.await.unwrap().unwrap();
    stopping.await.unwrap();

    assert_eq!(
        record.outcome.reason,
        EndReason::Forfeit {
            team_id: 1,
            cause: ForfeitCause::Timeouts
        }
    );
    assert_eq!(record.outcome.rounds_played, 2);

    let get_moves = received.iter().filter(|k| **k == MessageKind::GetMove).count();
    assert_eq!(get_moves, 3);
    assert_eq!(received.last(), Some(&MessageKind::MatchEnd));

    // Timed-out moves were replaced by Stay
    assert!(record
        .turns
        .iter()
        .filter(|t| t.bot_id == 1)
        .all(|t| t.mv == Move::Stay));
}

#[tokio::test]
async fn test_absent_team_forfeits() {
    let config = MatchConfig::default().with_handshake_timeout(Duration::from_millis(200));
    let (referee, addrs) = bind(CORRIDOR, config).await;
    let referee = tokio::spawn(referee.run());
    let bot = spawn_bot(addrs[1], "random");

    let record = referee.await.unwrap().unwrap();
    bot.await.unwrap();
    assert_eq!(record.outcome.winner, Some(1));
    assert_eq!(record.outcome.reason.code(), "forfeit");
    assert!(record.turns.is_empty());
}
