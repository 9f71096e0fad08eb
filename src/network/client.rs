//! Client side of the protocol.
//!
//! [`BotClient`] runs inside a player process: it answers `SET_INITIAL` with
//! `READY`, every `GET_MOVE` with a `MOVE_REPLY` carrying the same sequence,
//! and returns once `MATCH_END` arrives. [`ViewerClient`] just reads the
//! publish channel.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::client_async;
use tracing::{debug, info, instrument, warn};

use crate::game::players::Player;
use crate::network::protocol::{Envelope, MatchEnd, Message, MoveReply, ProtocolError, Ready};
use crate::network::transport::{
    ConnectionRegistry, Inbound, PeerLink, PeerRole, TransportError, CLOSE_GRACE, DEFAULT_LINK_CAPACITY,
};

/// Client failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection could not be established or broke.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The referee sent something undecodable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The referee went away before `MATCH_END`.
    #[error("connection closed before the match ended: {0}")]
    Closed(String),
}

async fn connect_link(addr: SocketAddr) -> Result<PeerLink, ClientError> {
    let stream = TcpStream::connect(addr).await.map_err(TransportError::from)?;
    let _ = stream.set_nodelay(true);
    let (ws, _) = client_async(format!("ws://{addr}"), stream)
        .await
        .map_err(TransportError::from)?;
    Ok(PeerLink::spawn(
        ws,
        addr,
        PeerRole::Referee,
        ConnectionRegistry::new(),
        DEFAULT_LINK_CAPACITY,
    )
    .await)
}

/// Player-process end of a team connection.
pub struct BotClient {
    link: PeerLink,
    player: Box<dyn Player>,
    team_id: Option<usize>,
}

impl BotClient {
    /// Connect to the referee's team port.
    pub async fn connect(addr: SocketAddr, player: Box<dyn Player>) -> Result<Self, ClientError> {
        let link = connect_link(addr).await?;
        info!("Connected to referee at {}", addr);
        Ok(Self {
            link,
            player,
            team_id: None,
        })
    }

    /// Team assigned by `SET_INITIAL`, once received.
    pub fn team_id(&self) -> Option<usize> {
        self.team_id
    }

    /// Answer requests until the match ends.
    #[instrument(skip(self), fields(peer = %self.link.addr()))]
    pub async fn run(mut self) -> Result<MatchEnd, ClientError> {
        loop {
            let envelope = match self.link.recv().await {
                Inbound::Envelope(envelope) => envelope,
                Inbound::Closed { reason } => return Err(ClientError::Closed(reason)),
            };
            let sequence = envelope.sequence;

            let reply = match envelope.into_message()? {
                Message::SetInitial(initial) => {
                    let team_id = initial.team_id.unwrap_or_default();
                    self.team_id = Some(team_id);
                    self.player
                        .set_initial(team_id, initial.team_seed.unwrap_or_default(), &initial.universe);
                    info!("Playing as team {} ({} bots)", team_id, initial.bot_ids.len());
                    Message::Ready(Ready {
                        team_name: self.player.team_name(),
                    })
                }
                Message::GetMove(request) => {
                    let mv = self.player.choose_move(request.bot_id, &request.universe);
                    debug!(
                        "Round {} turn {}: bot {} plays {}",
                        request.round_index, request.turn_index, request.bot_id, mv
                    );
                    Message::MoveReply(MoveReply {
                        mv,
                        say: self.player.say(),
                    })
                }
                Message::MatchEnd(end) => {
                    info!(
                        "Match over ({}): winner {:?}, scores {:?}",
                        end.outcome.reason.code(),
                        end.outcome.winner,
                        end.outcome.scores
                    );
                    self.link.shutdown(CLOSE_GRACE).await;
                    return Ok(end);
                }
                other => {
                    warn!("Ignoring unexpected {:?}", other.kind());
                    continue;
                }
            };

            let envelope = reply.to_envelope(sequence).map_err(TransportError::from)?;
            self.link.send(envelope).await?;
        }
    }
}

/// Read-only subscriber to the publish channel.
pub struct ViewerClient {
    link: PeerLink,
}

impl ViewerClient {
    /// Connect to the referee's viewer port.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Ok(Self {
            link: connect_link(addr).await?,
        })
    }

    /// Next published envelope, `None` once the referee hangs up.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        match self.link.recv().await {
            Inbound::Envelope(envelope) => Some(envelope),
            Inbound::Closed { .. } => None,
        }
    }

    /// Read until `MATCH_END` or hang-up, returning everything received.
    pub async fn collect(mut self) -> Result<Vec<Message>, ClientError> {
        let mut messages = Vec::new();
        while let Some(envelope) = self.next_envelope().await {
            let message = envelope.into_message()?;
            let done = matches!(message, Message::MatchEnd(_));
            messages.push(message);
            if done {
                break;
            }
        }
        self.link.shutdown(CLOSE_GRACE).await;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::MatchConfig;
    use crate::game::master::{EndReason, MatchOutcome, TeamStats};
    use crate::game::maze::parse_layout;
    use crate::game::players::StoppingPlayer;
    use crate::game::universe::{Scoring, Universe};
    use crate::core::position::Move;
    use crate::network::protocol::{GetMove, MessageKind, SetInitial};
    use crate::network::transport::Listener;

    const LAYOUT: &str = "
########
#0 .. 1#
########
";

    fn universe() -> Universe {
        Universe::from_layout(&parse_layout(LAYOUT).unwrap(), Scoring::default())
    }

    async fn expect(link: &mut PeerLink, kind: MessageKind, sequence: u64) -> Message {
        match link.recv().await {
            Inbound::Envelope(envelope) => {
                assert_eq!(envelope.kind, kind);
                assert_eq!(envelope.sequence, sequence);
                envelope.into_message().unwrap()
            }
            Inbound::Closed { reason } => panic!("link closed: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_bot_client_full_exchange() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), ConnectionRegistry::new(), 8)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let client = BotClient::connect(addr, Box::new(StoppingPlayer)).await.unwrap();
            client.run().await
        });

        let mut link = listener.accept(PeerRole::Team(1)).await.unwrap();
        let match_id = uuid::Uuid::new_v4();
        let initial = Message::SetInitial(SetInitial {
            match_id,
            team_id: Some(1),
            bot_ids: vec![1],
            team_seed: Some(9),
            config: MatchConfig::default(),
            universe: universe(),
        });
        link.send(initial.to_envelope(1).unwrap()).await.unwrap();
        match expect(&mut link, MessageKind::Ready, 1).await {
            Message::Ready(ready) => assert_eq!(ready.team_name, "Stopping Players"),
            other => panic!("unexpected {:?}", other.kind()),
        }

        let request = Message::GetMove(GetMove {
            bot_id: 1,
            round_index: 0,
            turn_index: 1,
            universe: universe(),
            deadline_ms: 1000,
        });
        link.send(request.to_envelope(2).unwrap()).await.unwrap();
        match expect(&mut link, MessageKind::MoveReply, 2).await {
            Message::MoveReply(reply) => assert_eq!(reply.mv, Move::Stay),
            other => panic!("unexpected {:?}", other.kind()),
        }

        let end = Message::MatchEnd(MatchEnd {
            match_id,
            outcome: MatchOutcome {
                winner: None,
                reason: EndReason::RoundLimit,
                scores: [0, 0],
                rounds_played: 1,
            },
            team_names: ["a".to_string(), "b".to_string()],
            stats: [TeamStats::default(), TeamStats::default()],
            final_state_hash: String::new(),
        });
        link.send(end.to_envelope(3).unwrap()).await.unwrap();

        let received = client.await.unwrap().unwrap();
        assert_eq!(received.match_id, match_id);
        assert_eq!(received.outcome.reason, EndReason::RoundLimit);
    }

    #[tokio::test]
    async fn test_bot_client_reports_early_hangup() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), ConnectionRegistry::new(), 8)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let client = BotClient::connect(addr, Box::new(StoppingPlayer)).await.unwrap();
            client.run().await
        });

        let mut link = listener.accept(PeerRole::Team(0)).await.unwrap();
        link.shutdown(CLOSE_GRACE).await;

        assert!(matches!(client.await.unwrap(), Err(ClientError::Closed(_))));
    }
}
