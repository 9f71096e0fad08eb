//! Referee Server
//!
//! Binds one WebSocket port per team plus an optional viewer port, waits for
//! both player processes, then runs a single match through the
//! [`GameMaster`]. Viewers may connect at any time and join the publish
//! channel at the next message.

use std::net::SocketAddr;

use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::game::config::{ConfigError, MatchConfig};
use crate::game::master::{GameMaster, MatchError, MatchRecord};
use crate::game::maze::Layout;
use crate::game::universe::TEAM_COUNT;
use crate::network::agent::{AbsentAgent, RemoteAgentProxy, TeamAgent};
use crate::network::transport::{
    ConnectionRegistry, Listener, PeerRole, TransportError, DEFAULT_LINK_CAPACITY,
};
use crate::network::viewer::spawn_viewer_acceptor;

/// Referee configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port of team 0 and team 1.
    pub team_addrs: [SocketAddr; TEAM_COUNT],
    /// Viewer port, if viewers are accepted.
    pub viewer_addr: Option<SocketAddr>,
    /// Outbound queue capacity per connection.
    pub link_capacity: usize,
    /// Match parameters.
    pub match_config: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            team_addrs: [
                SocketAddr::from(([127, 0, 0, 1], 50007)),
                SocketAddr::from(([127, 0, 0, 1], 50008)),
            ],
            viewer_addr: Some(SocketAddr::from(([127, 0, 0, 1], 50010))),
            link_capacity: DEFAULT_LINK_CAPACITY,
            match_config: MatchConfig::default(),
        }
    }
}

/// Referee errors.
#[derive(Debug, thiserror::Error)]
pub enum RefereeError {
    /// Invalid match setup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Could not bind a port.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Match state machine misuse.
    #[error("match error: {0}")]
    Match(#[from] MatchError),
}

/// Runs one match for two remote teams.
pub struct Referee {
    config: ServerConfig,
    layout: Layout,
    registry: ConnectionRegistry,
    team_listeners: Vec<Listener>,
    viewer_listener: Option<Listener>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Referee {
    /// Validate the setup and bind every port.
    pub async fn bind(config: ServerConfig, layout: Layout) -> Result<Self, RefereeError> {
        let (width, height) = layout.dimensions();
        config.match_config.validate_for_maze(width, height)?;
        let registry = ConnectionRegistry::new();

        let mut team_listeners = Vec::with_capacity(TEAM_COUNT);
        for addr in config.team_addrs {
            team_listeners.push(Listener::bind(addr, registry.clone(), config.link_capacity).await?);
        }
        let viewer_listener = match config.viewer_addr {
            Some(addr) => Some(Listener::bind(addr, registry.clone(), config.link_capacity).await?),
            None => None,
        };
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            layout,
            registry,
            team_listeners,
            viewer_listener,
            shutdown_tx,
        })
    }

    /// Bound address of a team port.
    pub fn team_addr(&self, team_id: usize) -> Option<SocketAddr> {
        self.team_listeners.get(team_id)?.local_addr().ok()
    }

    /// Bound address of the viewer port.
    pub fn viewer_addr(&self) -> Option<SocketAddr> {
        self.viewer_listener.as_ref()?.local_addr().ok()
    }

    /// Liveness of every connection.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Wait for both teams, play the match and return its record.
    ///
    /// A team that does not connect within the handshake timeout is
    /// replaced by an [`AbsentAgent`] and forfeits. Connections that fail the
    /// WebSocket upgrade do not count; the port keeps accepting until the
    /// deadline.
    #[instrument(skip(self), fields(seed = self.config.match_config.seed))]
    pub async fn run(mut self) -> Result<MatchRecord, RefereeError> {
        let (joiners_tx, joiners_rx) = mpsc::channel(16);
        let acceptor = self
            .viewer_listener
            .take()
            .map(|listener| spawn_viewer_acceptor(listener, joiners_tx, self.shutdown_tx.subscribe()));

        let match_config = self.config.match_config.clone();
        let deadline = Instant::now() + match_config.handshake_timeout;
        let accepts = self.team_listeners.iter().enumerate().map(|(team_id, listener)| async move {
            let agent: Box<dyn TeamAgent> = match listener.accept_before(PeerRole::Team(team_id), deadline).await {
                Some(link) => {
                    info!("Team {} connected from {}", team_id, link.addr());
                    Box::new(RemoteAgentProxy::new(team_id, link))
                }
                None => {
                    warn!("Team {} did not connect in time", team_id);
                    Box::new(AbsentAgent::new(team_id, "no connection before the handshake deadline"))
                }
            };
            agent
        });
        let agents = join_all(accepts).await;

        let mut master = GameMaster::new(&self.layout, match_config, agents)?;
        master.set_viewer_joiners(joiners_rx);
        master.play().await?;

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = acceptor {
            let _ = handle.await;
        }

        let phase = master.phase();
        master
            .match_record()
            .ok_or(RefereeError::Match(MatchError::WrongPhase(phase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::master::EndReason;
    use crate::game::maze::parse_layout;
    use std::time::Duration;

    const LAYOUT: &str = "
########
#0 .. 1#
########
";

    fn local_config() -> ServerConfig {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        ServerConfig {
            team_addrs: [any, any],
            viewer_addr: Some(any),
            link_capacity: 8,
            match_config: MatchConfig::default().with_handshake_timeout(Duration::from_millis(100)),
        }
    }

    #[tokio::test]
    async fn test_bind_picks_free_ports() {
        let referee = Referee::bind(local_config(), parse_layout(LAYOUT).unwrap())
            .await
            .unwrap();
        let a = referee.team_addr(0).unwrap();
        let b = referee.team_addr(1).unwrap();
        assert_ne!(a.port(), 0);
        assert_ne!(a, b);
        assert!(referee.viewer_addr().is_some());
        assert!(referee.team_addr(2).is_none());
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_config() {
        let mut config = local_config();
        config.match_config = config.match_config.with_max_rounds(0);
        let result = Referee::bind(config, parse_layout(LAYOUT).unwrap()).await;
        assert!(matches!(result, Err(RefereeError::Config(ConfigError::ZeroRounds))));
    }

    #[tokio::test]
    async fn test_failed_upgrade_does_not_take_team_slot() {
        use crate::game::players::StoppingPlayer;
        use crate::network::client::BotClient;
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpStream;

        let mut config = local_config();
        config.match_config = MatchConfig::default()
            .with_max_rounds(2)
            .with_handshake_timeout(Duration::from_secs(5));
        let referee = Referee::bind(config, parse_layout(LAYOUT).unwrap()).await.unwrap();
        let addrs = [referee.team_addr(0).unwrap(), referee.team_addr(1).unwrap()];
        let referee = tokio::spawn(referee.run());

        // Plain HTTP, then hang up
        let mut stray = TcpStream::connect(addrs[0]).await.unwrap();
        stray.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        drop(stray);
        // Connected but silent
        let _idle = TcpStream::connect(addrs[0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let bots = addrs.map(|addr| {
            tokio::spawn(async move {
                let client = BotClient::connect(addr, Box::new(StoppingPlayer)).await.unwrap();
                client.run().await.unwrap()
            })
        });

        let record = referee.await.unwrap().unwrap();
        assert_eq!(record.outcome.reason, EndReason::RoundLimit);
        assert_eq!(record.outcome.rounds_played, 2);
        for bot in bots {
            assert_eq!(bot.await.unwrap().outcome, record.outcome);
        }
    }

    #[tokio::test]
    async fn test_no_teams_ends_with_error() {
        let referee = Referee::bind(local_config(), parse_layout(LAYOUT).unwrap())
            .await
            .unwrap();
        let record = referee.run().await.unwrap();
        assert!(matches!(record.outcome.reason, EndReason::Error { .. }));
        assert!(record.turns.is_empty());
    }
}
