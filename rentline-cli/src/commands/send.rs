//! Send command - deliver one chat message and exit.

use std::time::Duration;

use console::style;

use rentline_core::config::ConfigHandle;
use rentline_core::error::RlResult;
use rentline_realtime::{RoomType, SendOutcome};

use super::SessionArgs;
use crate::OutputFormat;

/// Time given to the socket writer to drain before the process exits.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

/// Run the send command.
pub async fn run(
    config: ConfigHandle,
    session: SessionArgs,
    room: String,
    content: String,
    message_type: String,
    format: OutputFormat,
) -> RlResult<()> {
    let client = super::connect(&config, &session).await?;
    client.join_room(&room, RoomType::Conversation)?;

    let outcome = client.send_message(&room, &content, &message_type, None)?;
    tokio::time::sleep(FLUSH_GRACE).await;
    client.disconnect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "room": room,
                    "sent": outcome.is_sent(),
                })
            );
        }
        OutputFormat::Text => match outcome {
            SendOutcome::Sent => {
                println!("  {} Sent to {room}.", style("OK").green().bold());
            }
            SendOutcome::Queued { .. } | SendOutcome::Dropped => {
                println!(
                    "  {} Connection dropped before the message went out.",
                    style("FAIL").red().bold()
                );
            }
        },
    }

    Ok(())
}
