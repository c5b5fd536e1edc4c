//! Orchestration core for static site builds.
//!
//! A build moves a collection of [`Document`]s through a fixed sequence of
//! [`Stage`]s. Each stage is populated by [`Plugin`]s which run one after
//! another in priority order, and which may fan per-document work out across
//! the [`Runner`]'s worker pool. The [`Manager`] owns everything plugins share:
//! the document collection, configuration, the [`PostIndex`] and the
//! [`BuildCache`].
//!
//! ```ignore
//! let mut manager = Manager::new(BuildConfig::load(Some(Path::new("site.yaml")))?)?;
//! let mut pipeline = Pipeline::with_builtins()?;
//! pipeline.register(MyTransform)?;
//! let report = pipeline.run(&mut manager)?;
//! ```

pub mod build;
pub mod config;

pub use build::cache::{BuildCache, CacheError, CacheStats, Fingerprint, Fingerprinter};
pub use build::document::{
    Document, DocumentHandle, DocumentId, Extensions, FrontMatter, Lifecycle, Status,
};
pub use build::index::{IndexError, IndexedPost, PostIndex, normalize_key};
pub use build::manager::{Manager, ManagerError};
pub use build::pipeline::plugins::{OutputWriter, SlugAssigner, SourceCollector, SourceError};
pub use build::pipeline::{
    BuildReport, Pipeline, PipelineError, Plugin, Priority, Stage, StageSet,
};
pub use build::runner::{RunError, Runner};
pub use crate::config::{BuildConfig, ConfigError, ConfigKey, ConfigStore};
