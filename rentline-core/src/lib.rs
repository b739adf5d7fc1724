//! Rentline Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Rentline crates:
//! - Application configuration (realtime endpoint, reconnect policy, logging)
//! - A single error type covering every error category
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, RealtimeConfig};
pub use error::{RlError, RlResult};
pub use logging::init_logging;
pub use platform::Platform;
