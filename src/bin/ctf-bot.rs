//! Player process: connects to a referee team port and plays with one of
//! the reference players.

use std::net::SocketAddr;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use maze_ctf::game::players::{player_by_name, PLAYER_NAMES};
use maze_ctf::network::client::BotClient;

#[derive(Parser, Debug)]
#[command(name = "ctf-bot", version, about = "Play a maze CTF match with a built-in player")]
struct Cli {
    /// Referee team port.
    #[arg(long, default_value = "127.0.0.1:50007")]
    addr: SocketAddr,

    /// Player logic: random, stopping or food_eater.
    #[arg(long, default_value = "food_eater")]
    player: String,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let player = player_by_name(&cli.player)
        .ok_or_else(|| anyhow!("unknown player {:?}, expected one of {:?}", cli.player, PLAYER_NAMES))?;

    let client = BotClient::connect(cli.addr, player)
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;
    let end = client.run().await.context("playing match")?;

    info!(
        "Finished: winner {:?}, scores {:?}, final hash {}",
        end.outcome.winner, end.outcome.scores, end.final_state_hash
    );
    Ok(())
}
