//! VBoxDash Common Library
//!
//! Shared entity types, errors, and state storage for the VBoxDash platform.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use db::SqliteStore;
pub use error::{Error, Result};
pub use store::InstanceStore;
pub use types::*;

/// VBoxDash version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".vboxdash")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(std::path::PathBuf::from)
    }
}
