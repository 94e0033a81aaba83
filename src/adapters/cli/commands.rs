//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the double signal bot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::blaze::{BlazeFeed, BlazeFeedConfig};
use crate::adapters::telegram::{DryRunGateway, TelegramGateway};
use crate::application::{Orchestrator, OrchestratorSettings};
use crate::config::{load_config, Config, ConfigError, FeedSection};
use crate::ports::dispatch::DispatchGateway;
use crate::ports::feed::FeedClient;

/// Pattern signal bot for the Blaze double game
#[derive(Parser, Debug)]
#[command(
    name = "double-signals",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-room Telegram signal bot for the double game",
    long_about = "Watches double-game feeds for configured color patterns and posts \
                  signals, gale progressions and results to Telegram rooms."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start polling feeds and posting signals
    Run(RunCmd),

    /// Validate a configuration file and report what it declares
    Check(CheckCmd),

    /// Fetch and print a feed's recent window
    Recent(RecentCmd),
}

/// Start the bot
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/rooms.toml")]
    pub config: String,

    /// Log outgoing messages instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/rooms.toml")]
    pub config: String,
}

/// Show a feed's recent outcomes
#[derive(Parser, Debug)]
pub struct RecentCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/rooms.toml")]
    pub config: String,

    /// Feed id to query (defaults to the first configured feed)
    #[arg(short, long, value_name = "ID")]
    pub feed: Option<String>,

    /// How many draws to print
    #[arg(short = 'n', long, value_name = "COUNT", default_value = "10")]
    pub count: usize,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    match app.command {
        Command::Run(cmd) => run_command(cmd, app.verbose, app.debug).await,
        Command::Check(cmd) => check_command(cmd, app.verbose, app.debug).await,
        Command::Recent(cmd) => recent_command(cmd, app.verbose, app.debug).await,
    }
}

fn load(path: &str) -> Result<Config> {
    let expanded = shellexpand::tilde(path);
    load_config(expanded.as_ref()).with_context(|| format!("loading config from {}", path))
}

/// Initialize logging system. RUST_LOG wins, then the CLI flags, then the
/// config file's level.
fn init_logging(verbose: bool, debug: bool, config_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let fallback = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config_level
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt().with_env_filter(filter).with_target(false).init();

    Ok(())
}

fn build_feed(section: &FeedSection) -> Result<BlazeFeed> {
    BlazeFeed::new(BlazeFeedConfig {
        feed_id: section.id.clone(),
        api_url: section.api_url.clone(),
        timeout: Duration::from_secs(section.timeout_secs),
    })
    .with_context(|| format!("building feed client '{}'", section.id))
}

/// Handle run command
async fn run_command(cmd: RunCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load(&cmd.config)?;
    init_logging(verbose, debug, &config.logging.level)?;

    tracing::info!("Starting double signal bot");
    tracing::info!("Config: {}", cmd.config);
    if cmd.dry_run {
        tracing::warn!("Running in DRY-RUN mode - no messages will be sent");
    }

    let gateway: Arc<dyn DispatchGateway> = if cmd.dry_run {
        Arc::new(DryRunGateway)
    } else {
        Arc::new(TelegramGateway::new()?)
    };

    let settings = OrchestratorSettings::from(&config);
    let orchestrator = Arc::new(Orchestrator::new(gateway, settings));

    for feed in &config.feeds {
        orchestrator.register_feed(Arc::new(build_feed(feed)?))?;
    }

    for room in &config.rooms {
        let session = match room.build_session() {
            Ok(session) => session,
            // Dry runs work without real tokens.
            Err(ConfigError::MissingToken(_, _)) if cmd.dry_run => {
                room.build_session_with("dry-run".to_string())
            }
            Err(e) => return Err(e.into()),
        };
        orchestrator.register_room(session).await?;
    }

    let stopper = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing in-flight work");
            stopper.stop();
        }
    });

    orchestrator.run().await?;
    Ok(())
}

/// Handle check command
async fn check_command(cmd: CheckCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load(&cmd.config)?;
    init_logging(verbose, debug, &config.logging.level)?;

    println!("Configuration OK: {}", cmd.config);
    println!(
        "  {} feed(s), poll every {}s",
        config.feeds.len(),
        config.runtime.poll_interval_secs
    );
    for feed in &config.feeds {
        println!("  feed '{}': {}", feed.id, feed.api_url);
    }
    for room in &config.rooms {
        let token = match room.resolve_bot_token() {
            Ok(_) => "token set".to_string(),
            Err(_) => format!("token MISSING ({})", room.token_env_var()),
        };
        println!(
            "  room '{}' on feed '{}': {} strategies, {} gale(s), threshold {} - {}",
            room.id,
            room.feed,
            room.strategies.len(),
            room.max_gales,
            room.confidence_threshold,
            token
        );
    }
    Ok(())
}

/// Handle recent command
async fn recent_command(cmd: RecentCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load(&cmd.config)?;
    init_logging(verbose, debug, &config.logging.level)?;

    let section = match &cmd.feed {
        Some(id) => config
            .feeds
            .iter()
            .find(|f| &f.id == id)
            .ok_or_else(|| anyhow::anyhow!("no feed '{}' in config", id))?,
        None => &config.feeds[0],
    };

    let feed = build_feed(section)?;
    let window = feed.fetch_recent().await?;

    println!("Latest {} draws on '{}':", cmd.count.min(window.len()), section.id);
    for outcome in window.iter().take(cmd.count) {
        println!(
            "  {}  {:>2} {} ({})",
            outcome.observed_at.format("%H:%M:%S"),
            outcome.value,
            outcome.color.emoji(),
            outcome.color
        );
    }
    Ok(())
}
