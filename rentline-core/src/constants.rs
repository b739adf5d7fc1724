//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Rentline";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default realtime endpoint used when nothing is configured.
pub const DEFAULT_REALTIME_ENDPOINT: &str = "ws://localhost:3000/realtime";

/// Base delay before the first reconnection attempt, in milliseconds.
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 1_000;

/// Upper bound for the exponential reconnection delay, in milliseconds.
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Consecutive failed retries before the client gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Handshake timeout, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 20_000;

/// Capacity of the offline outbound command queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 50;

/// Capacity of the broadcast channel feeding async event consumers.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Log file name prefix inside the log directory.
pub const LOG_FILE_NAME: &str = "rentline.log";
