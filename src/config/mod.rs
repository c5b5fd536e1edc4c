//! Build configuration.
//!
//! Plugins see configuration in two forms:
//! - Typed build settings read by the core and built-in plugins (`types`),
//!   loaded from a file and the environment (`load`)
//! - A typed key/value store for data exchanged between plugins (`store`)

mod load;
mod store;
mod types;

use std::path::PathBuf;

pub use store::{ConfigKey, ConfigStore, keys};
pub use types::BuildConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to deserialize config: {0}")]
    Deserialize(#[from] config::ConfigError),

    #[error("config path is not valid UTF-8: {0}")]
    EncodePath(PathBuf),

    #[error("{0}")]
    Validation(String),

    #[error("config key '{key}' does not hold the expected type: {source}")]
    ValueType {
        key: &'static str,
        source: serde_json::Error,
    },
}
