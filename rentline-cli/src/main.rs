//! Rentline CLI - command-line front end for the realtime client.
//!
//! Useful for watching a server's event stream, poking rooms by hand, and
//! scripting smoke tests against a staging endpoint.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use rentline_core::config::{AppConfig, ConfigHandle};
use rentline_core::error::RlResult;
use rentline_core::logging;

/// Rentline - realtime client for the rental marketplace.
#[derive(Parser)]
#[command(
    name = "rentline",
    version,
    about = "Rentline realtime client CLI",
    long_about = "A command-line interface for the Rentline realtime service.\n\
                   Connect to an endpoint, join rooms, watch events and send commands."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, join rooms and print every event until Ctrl+C.
    Monitor {
        #[command(flatten)]
        session: commands::SessionArgs,
        /// Room to join, as `type:id` (e.g. `conversation:conv-42`). Repeatable.
        #[arg(short, long = "room")]
        rooms: Vec<String>,
    },
    /// Send one chat message and exit.
    Send {
        #[command(flatten)]
        session: commands::SessionArgs,
        /// Conversation room id.
        #[arg(short, long)]
        room: String,
        /// Message text.
        content: String,
        /// Message type.
        #[arg(long = "type", default_value = "text")]
        message_type: String,
    },
    /// Show or create the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> RlResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => std::path::PathBuf::from(path),
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("logs"));
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    let config_handle = ConfigHandle::new(config);

    info!("Rentline CLI v{}", rentline_core::constants::APP_VERSION);

    // Dispatch to command handlers
    match cli.command {
        Commands::Monitor { session, rooms } => {
            commands::monitor::run(config_handle, session, rooms, cli.format).await
        }
        Commands::Send {
            session,
            room,
            content,
            message_type,
        } => {
            commands::send::run(config_handle, session, room, content, message_type, cli.format)
                .await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
