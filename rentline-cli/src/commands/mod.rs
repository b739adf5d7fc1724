//! CLI command implementations.

pub mod config;
pub mod monitor;
pub mod send;

use std::fmt;
use std::io::Write;

use clap::Args;

use rentline_core::config::ConfigHandle;
use rentline_core::error::{RlError, RlResult};
use rentline_realtime::{InboundEvent, RealtimeClient, RoomType};

use crate::OutputFormat;

/// Connection parameters shared by every networked command.
#[derive(Debug, Args)]
pub struct SessionArgs {
    /// Realtime endpoint (overrides config).
    #[arg(short, long)]
    pub endpoint: Option<String>,
    /// Auth token issued by the REST API.
    #[arg(long, env = "RENTLINE_TOKEN", hide_env_values = true)]
    pub token: String,
    /// Id of the user the token belongs to.
    #[arg(short, long, env = "RENTLINE_USER")]
    pub user: String,
}

/// Build a client from config and connect it.
pub async fn connect(config: &ConfigHandle, session: &SessionArgs) -> RlResult<RealtimeClient> {
    let realtime = config.read().await.realtime.clone();
    let endpoint = session
        .endpoint
        .clone()
        .unwrap_or_else(|| realtime.endpoint.clone());

    let client = RealtimeClient::from_config(&realtime);
    client.connect(&endpoint, &session.token, &session.user).await?;
    Ok(client)
}

/// Parse a `type:id` room reference.
pub fn parse_room(spec: &str) -> RlResult<(RoomType, String)> {
    let (kind, id) = spec.split_once(':').ok_or_else(|| {
        RlError::InvalidPayload(format!("room must look like `type:id`, got `{spec}`"))
    })?;
    if id.is_empty() {
        return Err(RlError::InvalidPayload(format!("room `{spec}` has an empty id")));
    }
    Ok((kind.parse()?, id.to_string()))
}

/// Render one event for the terminal.
pub fn format_event(event: &InboundEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "kind": event.kind.as_str(),
            "receivedAt": event.received_at,
            "payload": event.payload,
        })
        .to_string(),
        OutputFormat::Text => format!(
            "{} [{}] {}",
            event.received_at.format("%H:%M:%S"),
            event.kind,
            event.payload
        ),
    }
}

/// Write a human progress line. JSON output carries events only.
pub fn progress(
    out: &mut impl Write,
    format: OutputFormat,
    line: fmt::Arguments<'_>,
) -> RlResult<()> {
    if format == OutputFormat::Text {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentline_realtime::EventKind;

    #[test]
    fn test_parse_room() {
        let (kind, id) = parse_room("conversation:conv-42").unwrap();
        assert_eq!(kind, RoomType::Conversation);
        assert_eq!(id, "conv-42");

        // Only the first colon separates.
        let (_, id) = parse_room("booking:b:7").unwrap();
        assert_eq!(id, "b:7");

        assert!(parse_room("conv-42").is_err());
        assert!(parse_room("property:").is_err());
        assert!(parse_room("lobby:1").is_err());
    }

    #[test]
    fn test_format_event_json() {
        let event = InboundEvent::local(EventKind::Connection, serde_json::json!({"state": "connected"}));
        let line: serde_json::Value =
            serde_json::from_str(&format_event(&event, OutputFormat::Json)).unwrap();
        assert_eq!(line["kind"], "connection");
        assert_eq!(line["payload"]["state"], "connected");
    }

    #[test]
    fn test_format_event_text() {
        let event = InboundEvent::local(EventKind::QueueOverflow, serde_json::json!({}));
        assert!(format_event(&event, OutputFormat::Text).contains("[queue:overflow]"));
    }

    #[test]
    fn test_progress_is_silent_for_json() {
        let mut out = Vec::new();
        progress(&mut out, OutputFormat::Json, format_args!("  FAIL authentication failed")).unwrap();
        assert!(out.is_empty());

        progress(&mut out, OutputFormat::Text, format_args!("  FAIL authentication failed")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "  FAIL authentication failed\n");
    }
}
