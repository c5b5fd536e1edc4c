//! Pipeline error types.

use super::plugin::Stage;

/// Errors that can occur while registering or running plugins.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("plugin '{plugin}' failed during {stage}: {source}")]
    Plugin {
        plugin: String,
        stage: Stage,
        source: anyhow::Error,
    },

    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("plugin names must not be empty")]
    UnnamedPlugin,
}

impl PipelineError {
    /// Name of the plugin that aborted the build, if any.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::Plugin { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    /// Stage the build was aborted in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Plugin { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
