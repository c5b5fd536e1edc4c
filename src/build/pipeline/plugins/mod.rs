//! Built-in plugins.
//!
//! Together they cover the file system ends of a build:
//!
//! 1. **SourceCollector** - Create a document per markdown file
//! 2. **SlugAssigner** - Give every document a unique slug and mark drafts
//! 3. **OutputWriter** - Write rendered documents to the output directory
//!
//! Rendering itself is left to user plugins.

mod collect;
mod slug;
mod write;

pub use collect::{SourceCollector, SourceError, source_path_to_url};
pub use slug::SlugAssigner;
pub use write::{OutputWriter, url_to_output_path};
