//! Plugin contract: stages, capabilities and priorities.

use std::fmt;
use std::ops::BitOr;

use crate::build::manager::Manager;

/// A phase of the build. Stages always run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Read settings, publish cross-plugin config values
    Configure,
    /// Create documents and assign slugs
    Collect,
    /// Enrich documents; the post index is available from here on
    Transform,
    /// Produce final markup
    Render,
    /// Persist output
    Write,
    /// Release resources, report
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Configure,
        Stage::Collect,
        Stage::Transform,
        Stage::Render,
        Stage::Write,
        Stage::Cleanup,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Collect => "collect",
            Stage::Transform => "transform",
            Stage::Render => "render",
            Stage::Write => "write",
            Stage::Cleanup => "cleanup",
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The stages a plugin takes part in.
///
/// Declared by the plugin and read once at registration; the scheduler
/// never probes plugins for capabilities at run time.
///
/// ```ignore
/// fn stages(&self) -> StageSet {
///     Stage::Transform | Stage::Render
/// }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSet(u8);

impl StageSet {
    pub const EMPTY: StageSet = StageSet(0);

    pub const fn with(self, stage: Stage) -> Self {
        StageSet(self.0 | stage.bit())
    }

    pub const fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |stage| self.contains(*stage))
    }
}

impl From<Stage> for StageSet {
    fn from(stage: Stage) -> Self {
        StageSet::EMPTY.with(stage)
    }
}

impl BitOr for Stage {
    type Output = StageSet;

    fn bitor(self, rhs: Stage) -> StageSet {
        StageSet::from(self).with(rhs)
    }
}

impl BitOr<Stage> for StageSet {
    type Output = StageSet;

    fn bitor(self, rhs: Stage) -> StageSet {
        self.with(rhs)
    }
}

/// Coarse ordering hint within a stage.
///
/// Lower runs earlier. Ties keep registration order. The scale is
/// deliberately small: "before the bulk", "after the bulk", and the ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i16)]
pub enum Priority {
    First = -200,
    Early = -100,
    #[default]
    Default = 0,
    Late = 100,
    Last = 200,
}

impl Priority {
    pub const fn value(self) -> i16 {
        self as i16
    }
}

/// A named unit of work that takes part in one or more stages.
///
/// Only the methods for stages listed in [`Plugin::stages`] are called; the
/// rest keep their no-op defaults. A method returning an error aborts the
/// build.
///
/// ```ignore
/// struct ReadingTime;
///
/// impl Plugin for ReadingTime {
///     fn name(&self) -> &str { "reading-time" }
///     fn stages(&self) -> StageSet { Stage::Transform.into() }
///
///     fn transform(&mut self, manager: &mut Manager) -> anyhow::Result<()> {
///         manager.for_each_post(|doc| {
///             let minutes = doc.content.split_whitespace().count() / 200;
///             doc.extra.set("reading-time", minutes);
///             Ok(())
///         })?;
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Unique name, used in errors and as the plugin's cache namespace.
    fn name(&self) -> &str;

    /// Stages this plugin takes part in.
    fn stages(&self) -> StageSet;

    /// Ordering within `stage`. Read once at registration.
    fn priority(&self, _stage: Stage) -> Priority {
        Priority::Default
    }

    fn configure(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }

    fn collect(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }

    fn transform(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }

    fn render(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }

    fn write(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }

    fn cleanup(&mut self, _manager: &mut Manager) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Call the method of `plugin` that belongs to `stage`.
pub(super) fn invoke(
    plugin: &mut dyn Plugin,
    stage: Stage,
    manager: &mut Manager,
) -> anyhow::Result<()> {
    match stage {
        Stage::Configure => plugin.configure(manager),
        Stage::Collect => plugin.collect(manager),
        Stage::Transform => plugin.transform(manager),
        Stage::Render => plugin.render(manager),
        Stage::Write => plugin.write(manager),
        Stage::Cleanup => plugin.cleanup(manager),
    }
}
