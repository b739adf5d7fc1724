//! Monitor command - stay connected and print the event stream.

use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use rentline_core::config::ConfigHandle;
use rentline_core::error::{RlError, RlResult};
use rentline_realtime::{ConnectionState, RealtimeClient};

use super::{progress, SessionArgs};
use crate::OutputFormat;

/// Run the monitor command.
pub async fn run(
    config: ConfigHandle,
    session: SessionArgs,
    rooms: Vec<String>,
    format: OutputFormat,
) -> RlResult<()> {
    let rooms = rooms
        .iter()
        .map(|spec| super::parse_room(spec))
        .collect::<RlResult<Vec<_>>>()?;

    let realtime = config.read().await.realtime.clone();
    let endpoint = session.endpoint.clone().unwrap_or(realtime.endpoint.clone());
    let client = RealtimeClient::from_config(&realtime);

    // Subscribe before connecting so the connection events show up too.
    let mut events = client.dispatcher().subscribe();
    let mut state = client.state_receiver();

    // Rooms joined before connect are sent as part of the handshake pass.
    for (room_type, room_id) in &rooms {
        client.join_room(room_id, *room_type)?;
    }

    let mut stdout = std::io::stdout();
    progress(
        &mut stdout,
        format,
        format_args!(
            "{} Connecting to {endpoint} as {}...",
            style("[1/2]").bold().dim(),
            session.user
        ),
    )?;
    match client.connect(&endpoint, &session.token, &session.user).await {
        Ok(()) => {}
        Err(e) if e.is_fatal() => {
            progress(&mut stdout, format, format_args!("  {} {e}", style("FAIL").red().bold()))?;
            return Err(e);
        }
        Err(e) => {
            // The client keeps retrying on its own.
            warn!("initial connect failed: {e}");
            progress(
                &mut stdout,
                format,
                format_args!("  {} {e}, retrying in the background", style("WARN").yellow()),
            )?;
        }
    }

    progress(
        &mut stdout,
        format,
        format_args!(
            "{} Listening for events on {} room(s)... (Ctrl+C to stop)\n",
            style("[2/2]").bold().dim(),
            rooms.len()
        ),
    )?;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => println!("{}", super::format_event(&event, format)),
                    Err(RecvError::Lagged(n)) => {
                        warn!("event feed lagged, missed {n} events");
                        progress(
                            &mut stdout,
                            format,
                            format_args!("  {} Missed {n} events (slow consumer)", style("WARN").yellow()),
                        )?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == ConnectionState::Failed {
                    // Drain whatever was dispatched alongside the failure.
                    while let Ok(event) = events.try_recv() {
                        println!("{}", super::format_event(&event, format));
                    }
                    client.disconnect();
                    return Err(RlError::Socket("realtime connection failed".into()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                progress(&mut stdout, format, format_args!("\n  Disconnecting..."))?;
                client.disconnect();
                break;
            }
        }
    }

    Ok(())
}
