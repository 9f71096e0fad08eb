//! Remote Agent Proxies
//!
//! The game master never talks to sockets. It holds one [`TeamAgent`] per
//! team and asks it for moves with an explicit deadline. Implementations:
//!
//! - [`RemoteAgentProxy`]: a player process connected over a [`PeerLink`]
//! - [`LocalTeam`]: an in-process [`Player`], for tests and benchmarks
//! - [`AbsentAgent`]: a team that never connected
//!
//! Proxy lifecycle:
//!
//! ```text
//! CONNECTING ──SET_INITIAL/READY──► READY ◄──► AWAITING_MOVE
//!      │                              │             │
//!      └──────────────► DISCONNECTED ◄┴─────────────┤
//!                                                   └──► TIMED_OUT ──► AWAITING_MOVE
//! ```
//!
//! `TimedOut` only records that the last request missed its deadline; the
//! proxy stays usable and the next `GET_MOVE` moves it back to
//! `AwaitingMove`. Whether a team forfeits over timeouts is decided by the
//! [`GameMaster`](crate::game::master::GameMaster) from its timeout budget,
//! which then ends the match and releases the proxy.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::core::position::Move;
use crate::game::players::Player;
use crate::network::protocol::{
    truncate_say, GetMove, MatchEnd, Message, MessageKind, MoveReply, ProtocolError, Ready, SetInitial,
};
use crate::network::transport::{Inbound, PeerLink};

/// Proxy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Connected, handshake not finished.
    Connecting,
    /// Idle between requests.
    Ready,
    /// A `GET_MOVE` is outstanding.
    AwaitingMove,
    /// The last request missed its deadline.
    TimedOut,
    /// Gone for good.
    Disconnected,
}

/// Result of the `SET_INITIAL` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The team answered with its name.
    Ready {
        /// Display name.
        team_name: String,
    },
    /// No answer before the deadline.
    TimedOut,
    /// Connection lost or protocol broken.
    Disconnected {
        /// Cause.
        reason: String,
    },
}

/// Result of one `GET_MOVE` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The bot answered in time. The move may still be illegal.
    Move {
        /// Requested move.
        mv: Move,
        /// Optional text for viewers.
        say: Option<String>,
    },
    /// No answer before the deadline.
    TimedOut,
    /// Connection lost or protocol broken.
    Disconnected {
        /// Cause.
        reason: String,
    },
}

/// Capability the game master uses to drive one team.
pub trait TeamAgent: Send {
    /// Team this agent plays for.
    fn team_id(&self) -> usize;

    /// Current proxy state.
    fn state(&self) -> AgentState;

    /// Send match parameters and wait for `READY`.
    fn set_initial(&mut self, initial: SetInitial, deadline: Instant) -> BoxFuture<'_, HandshakeOutcome>;

    /// Ask for one bot's move.
    fn request_move(&mut self, request: GetMove, deadline: Instant) -> BoxFuture<'_, MoveOutcome>;

    /// Deliver the final summary and release the connection by `deadline`.
    fn notify_end(&mut self, end: MatchEnd, deadline: Instant) -> BoxFuture<'_, ()>;
}

// =============================================================================
// REMOTE PROXY
// =============================================================================

/// Proxy for a team whose player process is reached over a link.
pub struct RemoteAgentProxy {
    team_id: usize,
    link: PeerLink,
    sequence: u64,
    state: AgentState,
}

/// What came back for an outstanding request.
enum Reply {
    Message(Message),
    TimedOut,
    Disconnected(String),
}

impl RemoteAgentProxy {
    /// Wrap an accepted link.
    pub fn new(team_id: usize, link: PeerLink) -> Self {
        Self {
            team_id,
            link,
            sequence: 0,
            state: AgentState::Connecting,
        }
    }

    /// Send a request and wait for the envelope carrying the same sequence.
    ///
    /// Replies with an older sequence are late answers to abandoned requests
    /// and are dropped. A newer sequence was never issued and breaks the
    /// protocol.
    async fn exchange(&mut self, message: Message, expected: MessageKind, deadline: Instant) -> Reply {
        if self.state == AgentState::Disconnected {
            return Reply::Disconnected("already disconnected".to_string());
        }

        self.sequence += 1;
        let sequence = self.sequence;
        let envelope = match message.to_envelope(sequence) {
            Ok(env) => env,
            Err(e) => return Reply::Disconnected(format!("encode error: {e}")),
        };
        if let Err(e) = self.link.send(envelope).await {
            return Reply::Disconnected(e.to_string());
        }

        loop {
            let inbound = match timeout_at(deadline, self.link.recv()).await {
                Ok(inbound) => inbound,
                Err(_) => return Reply::TimedOut,
            };
            let envelope = match inbound {
                Inbound::Envelope(env) => env,
                Inbound::Closed { reason } => return Reply::Disconnected(reason),
            };

            if envelope.sequence < sequence {
                debug!(
                    "Team {} discarding late {:?} (sequence {} < {})",
                    self.team_id, envelope.kind, envelope.sequence, sequence
                );
                continue;
            }
            if envelope.sequence > sequence {
                return Reply::Disconnected(format!(
                    "unexpected sequence {} (expected {})",
                    envelope.sequence, sequence
                ));
            }

            let found = envelope.kind;
            return match envelope.into_message() {
                Ok(message) if found == expected => Reply::Message(message),
                Ok(_) => Reply::Disconnected(ProtocolError::UnexpectedKind { expected, found }.to_string()),
                Err(e) => Reply::Disconnected(e.to_string()),
            };
        }
    }

    fn disconnect(&mut self, reason: &str) {
        warn!("Team {} disconnected: {}", self.team_id, reason);
        self.state = AgentState::Disconnected;
    }
}

impl TeamAgent for RemoteAgentProxy {
    fn team_id(&self) -> usize {
        self.team_id
    }

    fn state(&self) -> AgentState {
        self.state
    }

    fn set_initial(&mut self, initial: SetInitial, deadline: Instant) -> BoxFuture<'_, HandshakeOutcome> {
        async move { self.handshake(initial, deadline).await }.boxed()
    }

    fn request_move(&mut self, request: GetMove, deadline: Instant) -> BoxFuture<'_, MoveOutcome> {
        async move {
            if self.state != AgentState::Disconnected {
                self.state = AgentState::AwaitingMove;
            }
            let bot_id = request.bot_id;
            match self.exchange(Message::GetMove(request), MessageKind::MoveReply, deadline).await {
                Reply::Message(Message::MoveReply(MoveReply { mv, say })) => {
                    self.state = AgentState::Ready;
                    self.link.registry().reset_timeouts(self.link.id()).await;
                    MoveOutcome::Move {
                        mv,
                        say: say.map(|s| truncate_say(&s)),
                    }
                }
                Reply::Message(other) => {
                    let reason = format!("unexpected {:?}", other.kind());
                    self.disconnect(&reason);
                    MoveOutcome::Disconnected { reason }
                }
                Reply::TimedOut => {
                    self.state = AgentState::TimedOut;
                    let count = self.link.registry().record_timeout(self.link.id()).await;
                    warn!("Team {} bot {} timed out ({} in a row)", self.team_id, bot_id, count);
                    MoveOutcome::TimedOut
                }
                Reply::Disconnected(reason) => {
                    self.disconnect(&reason);
                    MoveOutcome::Disconnected { reason }
                }
            }
        }
        .boxed()
    }

    fn notify_end(&mut self, end: MatchEnd, deadline: Instant) -> BoxFuture<'_, ()> {
        async move {
            if self.state != AgentState::Disconnected {
                self.sequence += 1;
                match Message::MatchEnd(end).to_envelope(self.sequence) {
                    Ok(envelope) => {
                        if timeout_at(deadline, self.link.send(envelope)).await.is_err() {
                            warn!("Team {} did not take MATCH_END in time", self.team_id);
                        }
                    }
                    Err(e) => warn!("Failed to encode MATCH_END for team {}: {}", self.team_id, e),
                }
            }
            self.link
                .shutdown(deadline.saturating_duration_since(Instant::now()))
                .await;
            self.state = AgentState::Disconnected;
        }
        .boxed()
    }
}

impl RemoteAgentProxy {
    #[instrument(skip(self, initial), fields(team = self.team_id))]
    async fn handshake(&mut self, initial: SetInitial, deadline: Instant) -> HandshakeOutcome {
        match self.exchange(Message::SetInitial(initial), MessageKind::Ready, deadline).await {
            Reply::Message(Message::Ready(Ready { team_name })) => {
                info!("Team {} ready as {:?}", self.team_id, team_name);
                self.state = AgentState::Ready;
                HandshakeOutcome::Ready { team_name }
            }
            Reply::Message(other) => {
                let reason = format!("unexpected {:?}", other.kind());
                self.disconnect(&reason);
                HandshakeOutcome::Disconnected { reason }
            }
            Reply::TimedOut => {
                warn!("Team {} did not answer SET_INITIAL in time", self.team_id);
                self.state = AgentState::TimedOut;
                HandshakeOutcome::TimedOut
            }
            Reply::Disconnected(reason) => {
                self.disconnect(&reason);
                HandshakeOutcome::Disconnected { reason }
            }
        }
    }
}

// =============================================================================
// LOCAL AND ABSENT TEAMS
// =============================================================================

/// In-process team driven by a [`Player`]. Always answers immediately.
pub struct LocalTeam {
    team_id: usize,
    player: Box<dyn Player>,
    state: AgentState,
}

impl LocalTeam {
    /// Wrap a player.
    pub fn new(team_id: usize, player: Box<dyn Player>) -> Self {
        Self {
            team_id,
            player,
            state: AgentState::Connecting,
        }
    }
}

impl TeamAgent for LocalTeam {
    fn team_id(&self) -> usize {
        self.team_id
    }

    fn state(&self) -> AgentState {
        self.state
    }

    fn set_initial(&mut self, initial: SetInitial, _deadline: Instant) -> BoxFuture<'_, HandshakeOutcome> {
        let team_id = initial.team_id.unwrap_or(self.team_id);
        self.player
            .set_initial(team_id, initial.team_seed.unwrap_or_default(), &initial.universe);
        self.state = AgentState::Ready;
        let team_name = self.player.team_name();
        async move { HandshakeOutcome::Ready { team_name } }.boxed()
    }

    fn request_move(&mut self, request: GetMove, _deadline: Instant) -> BoxFuture<'_, MoveOutcome> {
        let mv = self.player.choose_move(request.bot_id, &request.universe);
        let say = self.player.say().map(|s| truncate_say(&s));
        async move { MoveOutcome::Move { mv, say } }.boxed()
    }

    fn notify_end(&mut self, _end: MatchEnd, _deadline: Instant) -> BoxFuture<'_, ()> {
        self.state = AgentState::Disconnected;
        async {}.boxed()
    }
}

/// Team that never connected. Every request reports a disconnect.
pub struct AbsentAgent {
    team_id: usize,
    reason: String,
}

impl AbsentAgent {
    /// Create with the reason the connection failed.
    pub fn new(team_id: usize, reason: impl Into<String>) -> Self {
        Self {
            team_id,
            reason: reason.into(),
        }
    }
}

impl TeamAgent for AbsentAgent {
    fn team_id(&self) -> usize {
        self.team_id
    }

    fn state(&self) -> AgentState {
        AgentState::Disconnected
    }

    fn set_initial(&mut self, _initial: SetInitial, _deadline: Instant) -> BoxFuture<'_, HandshakeOutcome> {
        let reason = self.reason.clone();
        async move { HandshakeOutcome::Disconnected { reason } }.boxed()
    }

    fn request_move(&mut self, _request: GetMove, _deadline: Instant) -> BoxFuture<'_, MoveOutcome> {
        let reason = self.reason.clone();
        async move { MoveOutcome::Disconnected { reason } }.boxed()
    }

    fn notify_end(&mut self, _end: MatchEnd, _deadline: Instant) -> BoxFuture<'_, ()> {
        async {}.boxed()
    }
}
