//! Operator CLI: replay recorded telemetry, answer interventions, inspect state.

use nudge::{BehaviorEvent, NudgeConfig, Session, StateStore, UserResponse};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nudge")]
#[command(about = "Behavioral pattern detection with rate-limited interventions")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults are used for missing keys)
    #[arg(long, global = true, env = "NUDGE_CONFIG")]
    config: Option<PathBuf>,

    /// State database path
    #[arg(long, global = true, env = "NUDGE_DB", default_value = "nudge.db")]
    db: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a newline-delimited JSON event file through the session
    Replay {
        /// Path to the events file (one BehaviorEvent per line)
        #[arg(index = 1)]
        events: PathBuf,
    },

    /// Record a response to an emitted intervention
    Respond {
        /// Intervention id
        #[arg(index = 1)]
        id: String,

        /// acknowledged, ignored or dismissed
        #[arg(index = 2)]
        response: String,
    },

    /// Print intervention statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => NudgeConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NudgeConfig::default(),
    };

    let store = StateStore::connect(&cli.db)
        .await
        .with_context(|| format!("failed to open state database {}", cli.db.display()))?;
    let session = Session::open(config, store).await?;

    match cli.command {
        Commands::Replay { events } => replay(&session, &events).await,
        Commands::Respond { id, response } => respond(&session, &id, &response).await,
        Commands::Stats => {
            let stats = session.stats(chrono::Utc::now()).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

async fn replay(session: &Session, path: &Path) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_number = 0usize;
    let mut emitted = 0usize;
    let mut rejected = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: BehaviorEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(line = line_number, %error, "skipping unparseable event");
                rejected += 1;
                continue;
            }
        };

        let outcome = match session.observe(&event).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(line = line_number, %error, "skipping rejected event");
                rejected += 1;
                continue;
            }
        };

        if let Some(decision) = outcome.decision() {
            emitted += 1;
            println!("{}", serde_json::to_string(decision)?);
        }
    }

    let flushed = session.flush().await;
    tracing::info!(
        lines = line_number,
        emitted,
        rejected,
        flushed = flushed.signals.len(),
        "replay finished"
    );
    Ok(())
}

async fn respond(session: &Session, id: &str, response: &str) -> anyhow::Result<()> {
    let response = UserResponse::from_str_lossy(response)
        .with_context(|| format!("unknown response '{response}', expected acknowledged, ignored or dismissed"))?;
    let outcome = session
        .record_response(id, response, chrono::Utc::now())
        .await?;

    if outcome.applied {
        println!(
            "recorded {response} for {} ({})",
            outcome.decision.id, outcome.decision.intervention_type
        );
    } else {
        println!("{response} was already recorded for {}", outcome.decision.id);
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
}
