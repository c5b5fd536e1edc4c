//! Configuration type definitions.
//!
//! These types are pure data. Loading lives in `load`, and the plugin
//! key/value store in `store`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::build::cache::{Fingerprint, Fingerprinter};

/// Settings read by the build core and the built-in plugins.
///
/// YAML format (every field is optional):
/// ```yaml
/// content_dir: content
/// output_dir: public
/// cache_path: .stagepress/cache.json
/// concurrency: 8
/// include_drafts: false
/// url_prefix: /blog
/// settings:
///   theme: dark
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory the source collector walks for documents
    pub content_dir: PathBuf,
    /// Directory rendered documents are written to
    pub output_dir: PathBuf,
    /// Where the build cache is loaded from and persisted to.
    /// No cache is persisted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Worker count for per-document passes (0 = available parallelism)
    pub concurrency: usize,
    /// Build draft and private documents instead of skipping them
    pub include_drafts: bool,
    /// Prefix prepended to every document URL
    pub url_prefix: String,
    /// Free-form settings that affect rendered output.
    ///
    /// Folded into [`BuildConfig::fingerprint`], so changing any of them
    /// invalidates cached transform results.
    pub settings: serde_json::Value,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("content"),
            output_dir: PathBuf::from("public"),
            cache_path: None,
            concurrency: 0,
            include_drafts: false,
            url_prefix: String::new(),
            settings: serde_json::Value::Null,
        }
    }
}

impl BuildConfig {
    /// Check that the settings describe a buildable site.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "invalid config: 'content_dir' must not be empty".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "invalid config: 'output_dir' must not be empty".to_string(),
            ));
        }
        if self.content_dir == self.output_dir {
            return Err(ConfigError::Validation(format!(
                "invalid config: 'output_dir' cannot be the content directory ({})",
                self.content_dir.display()
            )));
        }
        Ok(())
    }

    /// Digest of every setting that changes what a transform produces.
    ///
    /// Directories and worker count are excluded: moving the output or
    /// changing parallelism must not throw the cache away.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Fingerprinter::new();
        hasher
            .str(&self.url_prefix)
            .bool(self.include_drafts)
            .json(&self.settings);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_same_dirs() {
        let config = BuildConfig {
            output_dir: PathBuf::from("content"),
            ..BuildConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output_dir"));
    }

    #[test]
    fn test_validate_rejects_empty_content_dir() {
        let config = BuildConfig {
            content_dir: PathBuf::new(),
            ..BuildConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_output_settings() {
        let base = BuildConfig::default();
        let themed = BuildConfig {
            settings: serde_json::json!({ "theme": "dark" }),
            ..BuildConfig::default()
        };
        assert_ne!(base.fingerprint(), themed.fingerprint());

        let prefixed = BuildConfig {
            url_prefix: "/blog".to_string(),
            ..BuildConfig::default()
        };
        assert_ne!(base.fingerprint(), prefixed.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_directories_and_workers() {
        let base = BuildConfig::default();
        let moved = BuildConfig {
            output_dir: PathBuf::from("dist"),
            concurrency: 3,
            ..BuildConfig::default()
        };
        assert_eq!(base.fingerprint(), moved.fingerprint());
    }
}
