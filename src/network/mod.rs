//! Network Layer
//!
//! WebSocket transport, remote team proxies, viewers and the referee server.
//! This layer is **non-deterministic**; every game rule runs through `game/`.

pub mod agent;
pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod viewer;

pub use agent::{AbsentAgent, AgentState, LocalTeam, MoveOutcome, RemoteAgentProxy, TeamAgent};
pub use client::{BotClient, ClientError, ViewerClient};
pub use protocol::{Envelope, Message, MessageKind, ProtocolError};
pub use server::{Referee, RefereeError, ServerConfig};
pub use transport::{ConnectionRegistry, Listener, PeerLink, TransportError};
pub use viewer::{ChannelViewer, Viewer, ViewerHub};
