//! Maze CTF Referee
//!
//! Waits for two player processes on their team ports, plays one match and
//! optionally writes a replay record.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use maze_ctf::{
    game::config::FallbackPolicy,
    network::server::{Referee, ServerConfig},
    parse_layout, MatchConfig, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "maze-ctf-server", version, about = "Referee a maze capture-the-flag match")]
struct Cli {
    /// Layout file.
    layout: PathBuf,

    /// JSON match configuration. Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Match seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Round limit.
    #[arg(long)]
    rounds: Option<u32>,

    /// Per-move deadline in milliseconds.
    #[arg(long)]
    move_timeout_ms: Option<u64>,

    /// Handshake deadline in milliseconds.
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    /// Move used on timeouts and illegal moves.
    #[arg(long, value_enum)]
    fallback: Option<FallbackPolicy>,

    /// Report enemy positions exactly.
    #[arg(long)]
    no_noise: bool,

    /// Team 0 port.
    #[arg(long, default_value = "127.0.0.1:50007")]
    team0: SocketAddr,

    /// Team 1 port.
    #[arg(long, default_value = "127.0.0.1:50008")]
    team1: SocketAddr,

    /// Viewer port.
    #[arg(long, default_value = "127.0.0.1:50010")]
    viewer: SocketAddr,

    /// Do not accept viewers.
    #[arg(long)]
    no_viewer: bool,

    /// Write the bincode replay record here.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn match_config(cli: &Cli) -> Result<MatchConfig> {
    let mut config = match &cli.config {
        Some(path) => MatchConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MatchConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if let Some(rounds) = cli.rounds {
        config = config.with_max_rounds(rounds);
    }
    if let Some(ms) = cli.move_timeout_ms {
        config = config.with_move_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.handshake_timeout_ms {
        config = config.with_handshake_timeout(Duration::from_millis(ms));
    }
    if let Some(fallback) = cli.fallback {
        config = config.with_fallback(fallback);
    }
    if cli.no_noise {
        config.noise.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Maze CTF referee v{}", VERSION);

    let text = std::fs::read_to_string(&cli.layout)
        .with_context(|| format!("reading layout {}", cli.layout.display()))?;
    let layout = parse_layout(&text).with_context(|| format!("parsing layout {}", cli.layout.display()))?;
    let (width, height) = layout.dimensions();
    info!("Layout {}x{} with {} bots", width, height, layout.bot_positions.len());

    let config = ServerConfig {
        team_addrs: [cli.team0, cli.team1],
        viewer_addr: (!cli.no_viewer).then_some(cli.viewer),
        match_config: match_config(&cli)?,
        ..ServerConfig::default()
    };

    let referee = Referee::bind(config, layout).await.context("binding referee ports")?;
    let record = referee.run().await.context("running match")?;

    let outcome = &record.outcome;
    match outcome.winner {
        Some(team) => info!(
            "Team {} ({}) wins by {}: {:?}",
            team,
            record.team_names[team],
            outcome.reason.code(),
            outcome.scores
        ),
        None => info!("No winner ({}): {:?}", outcome.reason.code(), outcome.scores),
    }

    if let Some(path) = &cli.record {
        let bytes = record.to_bytes().context("encoding match record")?;
        std::fs::write(path, bytes).with_context(|| format!("writing record {}", path.display()))?;
        info!("Record written to {} ({} turns)", path.display(), record.turns.len());
    }

    Ok(())
}
