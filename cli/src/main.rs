//! Stoat Monitor - headless companion for the Stoat backend
//!
//! Follows the realtime feed, tracks scans to completion, and renders effect
//! previews from the terminal.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stoat_core::ClientSettings;
use stoat_networking::StoatClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "stoat-monitor",
    version,
    about = "Watch, scan and preview against a Stoat backend"
)]
struct Args {
    /// JSON settings file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// REST API origin (overrides the settings file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Realtime endpoint (overrides the settings file)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow the realtime connection and log incoming events
    Watch,

    /// Scan a media directory and follow the job to completion
    Scan {
        /// Directory to scan, as seen by the server
        path: String,

        /// Only scan the top level of the directory
        #[arg(long, default_value_t = false)]
        no_recursive: bool,

        /// Give up after this many consecutive failed status polls
        #[arg(long)]
        max_failures: Option<u32>,
    },

    /// Render filter strings for parameter objects read from stdin, one JSON object per line
    Preview {
        /// Effect to preview, e.g. `text_overlay`
        effect_type: String,

        /// Quiet window before a new parameter set is previewed
        #[arg(long, allow_negative_numbers = true)]
        window_ms: Option<i64>,
    },

    /// Print backend readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stoat_monitor=info,stoat_networking=info,stoat_engine=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    let client = StoatClient::from_settings(&settings)?;

    match args.command {
        Command::Watch => commands::watch::run(&settings).await,
        Command::Scan {
            path,
            no_recursive,
            max_failures,
        } => {
            let mut poll = settings.poll.clone();
            if max_failures.is_some() {
                poll.max_consecutive_failures = max_failures;
            }
            commands::scan::run(client, &poll, path, !no_recursive).await
        }
        Command::Preview {
            effect_type,
            window_ms,
        } => {
            let window_ms = window_ms
                .unwrap_or_else(|| i64::try_from(settings.debounce.window_ms).unwrap_or(i64::MAX));
            commands::preview::run(client, effect_type, window_ms).await
        }
        Command::Health => commands::health::run(&client).await,
    }
}

fn load_settings(args: &Args) -> Result<ClientSettings> {
    let mut settings = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file {}", path.display()))?;
            ClientSettings::from_json(&raw)
                .with_context(|| format!("invalid settings file {}", path.display()))?
        }
        None => ClientSettings::default(),
    };

    apply_overrides(&mut settings, args);
    settings.validate()?;

    tracing::debug!("Using API {} and realtime endpoint {}", settings.api_base_url, settings.ws_url);
    Ok(settings)
}

fn apply_overrides(settings: &mut ClientSettings, args: &Args) {
    if let Some(url) = &args.api_url {
        settings.api_base_url = url.clone();
    }
    if let Some(url) = &args.ws_url {
        settings.ws_url = url.clone();
    }
}
