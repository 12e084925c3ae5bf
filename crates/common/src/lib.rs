//! pvetui Common Library
//!
//! Shared types, configuration and the on-disk session cache.

pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionStore, SESSION_TTL_MINUTES};
pub use types::*;

/// pvetui version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".pvetui")
}

/// Default configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Default session cache path
pub fn default_session_path() -> std::path::PathBuf {
    default_store_path().join("session.json")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
