//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use rentline_core::config::{AppConfig, ConfigHandle};
use rentline_core::error::{RlError, RlResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run a config command.
pub async fn run(
    config: ConfigHandle,
    path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> RlResult<()> {
    match action {
        ConfigAction::Show => show(&config, format).await,
        ConfigAction::Path => {
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "path": path, "exists": path.exists() }))
                }
                OutputFormat::Text => println!("{}", path.display()),
            }
            Ok(())
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(RlError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            AppConfig::default().save_to_file(path)?;
            println!("  {} Config written to {}", style("OK").green(), path.display());
            Ok(())
        }
    }
}

async fn show(config: &ConfigHandle, format: OutputFormat) -> RlResult<()> {
    let cfg = config.read().await;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&*cfg)?);
        return Ok(());
    }

    let rt = &cfg.realtime;
    println!("{}", style("Realtime").bold().underlined());
    println!("  realtime.endpoint                 {}", rt.endpoint);
    println!("  realtime.base_reconnect_delay_ms  {}", rt.base_reconnect_delay_ms);
    println!("  realtime.max_reconnect_delay_ms   {}", rt.max_reconnect_delay_ms);
    println!("  realtime.max_reconnect_attempts   {}", rt.max_reconnect_attempts);
    println!("  realtime.reconnect_jitter         {}", rt.reconnect_jitter);
    println!("  realtime.handshake_timeout_ms     {}", rt.handshake_timeout_ms);
    println!("  realtime.outbound_queue_capacity  {}", rt.outbound_queue_capacity);
    println!("  realtime.event_channel_capacity   {}", rt.event_channel_capacity);

    println!();
    println!("{}", style("Logging").bold().underlined());
    println!("  logging.level                     {}", cfg.logging.level);
    println!(
        "  logging.directory                 {}",
        cfg.effective_log_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "(unavailable)".into())
    );
    println!("  logging.json_output               {}", cfg.logging.json_output);

    Ok(())
}
