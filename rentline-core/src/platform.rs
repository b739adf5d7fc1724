//! OS-specific directories.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{RlError, RlResult};

/// Lookup of the per-user directories the client stores files in.
pub struct Platform;

impl Platform {
    /// Get the platform-specific application data directory.
    ///
    /// - Windows: `%APPDATA%/Rentline`
    /// - macOS: `~/Library/Application Support/Rentline`
    /// - Linux: `~/.local/share/Rentline`
    pub fn data_dir() -> RlResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| RlError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Get the platform-specific configuration directory.
    pub fn config_dir() -> RlResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| RlError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }
}
