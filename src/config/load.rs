//! Configuration loading from files and the environment.

use std::path::Path;

use super::{BuildConfig, ConfigError};

/// Prefix for environment overrides, e.g. `STAGEPRESS_OUTPUT_DIR=dist`.
const ENV_PREFIX: &str = "STAGEPRESS";

impl BuildConfig {
    /// Load build settings.
    ///
    /// Sources are layered: built-in defaults, then the YAML file at `path`
    /// (if given), then `STAGEPRESS_*` environment variables. The result is
    /// validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let path_str = path
                .as_os_str()
                .to_str()
                .ok_or_else(|| ConfigError::EncodePath(path.to_path_buf()))?;
            builder = builder.add_source(config::File::new(path_str, config::FileFormat::Yaml));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<BuildConfig>()?;

        config.validate()?;
        Ok(config)
    }
}
