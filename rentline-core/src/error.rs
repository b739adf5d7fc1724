//! Error types shared by every Rentline crate.
//!
//! All error categories are unified into a single `RlError` enum with
//! conversions from the underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using RlError.
pub type RlResult<T> = Result<T, RlError>;

/// Unified error type for the Rentline client.
#[derive(Error, Debug)]
pub enum RlError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// The transport failed to open or broke mid-session.
    #[error("socket error: {0}")]
    Socket(String),

    /// The transport closed underneath an operation.
    #[error("socket disconnected")]
    SocketDisconnected,

    /// An operation (usually the handshake) did not finish in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server explicitly rejected the handshake credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// `connect()` was called while a connection is already up or in progress.
    #[error("already {0}")]
    AlreadyConnected(String),

    // -- Protocol errors --
    /// An inbound frame could not be parsed or classified.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An outbound payload does not have the shape the wire format needs.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RlError {
    /// Whether the reconnection policy should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Socket(_) | Self::SocketDisconnected | Self::Timeout(_) | Self::MalformedFrame(_)
        )
    }

    /// Whether this error must stop automatic recovery entirely.
    ///
    /// Rejected credentials and endpoints the transport cannot even parse
    /// will fail the same way on every retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailed(_) | Self::Config(_))
    }
}

impl From<serde_json::Error> for RlError {
    fn from(e: serde_json::Error) -> Self {
        RlError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RlError {
    fn from(e: toml::de::Error) -> Self {
        RlError::Config(e.to_string())
    }
}
