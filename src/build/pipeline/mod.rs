//! Build pipeline: plugins scheduled over fixed stages.
//!
//! Every build runs the same stages, in order:
//! 1. Configure (settings, cross-plugin config values)
//! 2. Collect (documents are created and given slugs; the post index is
//!    built when this stage ends)
//! 3. Transform
//! 4. Render
//! 5. Write
//! 6. Cleanup (the build cache is persisted when this stage succeeds)
//!
//! Within a stage, plugins that declared it run one at a time, lowest
//! [`Priority`] first and in registration order among equals. A plugin that
//! returns an error stops the build.

mod error;
mod plugin;
pub mod plugins;

use std::time::{Duration, Instant};

pub use error::PipelineError;
pub use plugin::{Plugin, Priority, Stage, StageSet};

use super::cache::CacheStats;
use super::manager::Manager;
use plugins::{OutputWriter, SlugAssigner, SourceCollector};

/// A registered plugin with the metadata it declared at registration.
struct Registered {
    plugin: Box<dyn Plugin>,
    name: String,
    stages: StageSet,
    priorities: [Priority; Stage::ALL.len()],
}

impl Registered {
    fn priority(&self, stage: Stage) -> Priority {
        self.priorities[stage as usize]
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Documents in the collection at the end of the build
    pub documents: usize,
    /// Documents marked to be skipped
    pub skipped: usize,
    /// Wall time per stage, in stage order
    pub stages: Vec<(Stage, Duration)>,
    pub cache: CacheStats,
}

impl BuildReport {
    pub fn total_time(&self) -> Duration {
        self.stages.iter().map(|(_, elapsed)| *elapsed).sum()
    }
}

/// The plugin scheduler.
///
/// Plugins are injected explicitly; there is no global registry.
///
/// ```ignore
/// let mut pipeline = Pipeline::with_builtins()?;
/// pipeline.register(ReadingTime)?.register(Minify::default())?;
/// let report = pipeline.run(&mut manager)?;
/// ```
#[derive(Default)]
pub struct Pipeline {
    /// Plugins in registration order
    plugins: Vec<Registered>,
}

impl Pipeline {
    /// Create an empty pipeline with no plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline with the built-in plugins registered.
    ///
    /// Collects markdown sources, assigns slugs and writes rendered output.
    /// Something still has to fill in `Document::rendered`.
    pub fn with_builtins() -> Result<Self, PipelineError> {
        let mut pipeline = Self::new();
        pipeline
            .register(SourceCollector::new())?
            .register(SlugAssigner)?
            .register(OutputWriter)?;
        Ok(pipeline)
    }

    /// Add a plugin.
    ///
    /// Its stages and priorities are read once, here. Names must be unique
    /// and non-empty.
    pub fn register<P: Plugin + 'static>(&mut self, plugin: P) -> Result<&mut Self, PipelineError> {
        self.register_boxed(Box::new(plugin))
    }

    /// Add an already boxed plugin.
    pub fn register_boxed(&mut self, plugin: Box<dyn Plugin>) -> Result<&mut Self, PipelineError> {
        let entry = Self::describe(plugin);
        if entry.name.is_empty() {
            return Err(PipelineError::UnnamedPlugin);
        }
        if self.plugins.iter().any(|p| p.name == entry.name) {
            return Err(PipelineError::DuplicatePlugin(entry.name));
        }

        tracing::debug!(plugin = %entry.name, "registered plugin");
        self.plugins.push(entry);
        Ok(self)
    }

    fn describe(plugin: Box<dyn Plugin>) -> Registered {
        let name = plugin.name().to_string();
        let stages = plugin.stages();
        let priorities = Stage::ALL.map(|stage| plugin.priority(stage));
        Registered {
            plugin,
            name,
            stages,
            priorities,
        }
    }

    /// Names of all registered plugins, in registration order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    /// Names of the plugins that run in `stage`, in execution order.
    pub fn plan(&self, stage: Stage) -> Vec<&str> {
        self.schedule(stage)
            .into_iter()
            .map(|i| self.plugins[i].name.as_str())
            .collect()
    }

    /// Indices into `plugins` for `stage`. The sort is stable, so plugins of
    /// equal priority keep registration order.
    fn schedule(&self, stage: Stage) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.plugins.len())
            .filter(|&i| self.plugins[i].stages.contains(stage))
            .collect();
        order.sort_by_key(|&i| self.plugins[i].priority(stage));
        order
    }

    /// Run a full build.
    ///
    /// Stops at the first plugin error; later plugins and stages are not
    /// run and the cache is not persisted.
    #[tracing::instrument(skip_all, fields(plugins = self.plugins.len()))]
    pub fn run(&mut self, manager: &mut Manager) -> Result<BuildReport, PipelineError> {
        let mut report = BuildReport::default();

        for stage in Stage::ALL {
            let started = Instant::now();
            self.run_stage(stage, manager)?;

            match stage {
                Stage::Collect => manager.seal_collection(),
                _ => manager.advance_lifecycle(stage),
            }

            let elapsed = started.elapsed();
            tracing::info!(
                stage = %stage,
                documents = manager.document_count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "stage complete"
            );
            report.stages.push((stage, elapsed));
        }

        if let Err(e) = manager.persist_cache() {
            tracing::warn!(error = %e, "failed to persist build cache");
        }

        report.documents = manager.document_count();
        report.skipped = manager.document_count() - manager.active_documents().len();
        report.cache = manager.cache().stats();
        tracing::info!(
            documents = report.documents,
            skipped = report.skipped,
            cache_hits = report.cache.hits,
            cache_misses = report.cache.misses,
            "build complete"
        );
        Ok(report)
    }

    fn run_stage(&mut self, stage: Stage, manager: &mut Manager) -> Result<(), PipelineError> {
        for i in self.schedule(stage) {
            let entry = &mut self.plugins[i];
            tracing::debug!(plugin = %entry.name, stage = %stage, "running plugin");

            if let Err(source) = plugin::invoke(entry.plugin.as_mut(), stage, manager) {
                tracing::error!(
                    plugin = %entry.name,
                    stage = %stage,
                    error = %source,
                    "plugin failed, aborting build"
                );
                return Err(PipelineError::Plugin {
                    plugin: entry.name.clone(),
                    stage,
                    source,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
