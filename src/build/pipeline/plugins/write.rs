//! Output writing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;

use crate::build::manager::Manager;
use crate::build::pipeline::{Plugin, Stage, StageSet};

/// Writes every non-skipped document's rendered output under `output_dir`.
///
/// Files are written in parallel on the manager's runner. A file whose
/// contents already match is left alone, so unchanged pages keep their
/// modification time across rebuilds.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputWriter;

impl Plugin for OutputWriter {
    fn name(&self) -> &str {
        "output"
    }

    fn stages(&self) -> StageSet {
        Stage::Write.into()
    }

    fn write(&mut self, manager: &mut Manager) -> anyhow::Result<()> {
        let output_dir = manager.config().output_dir.clone();
        let url_prefix = manager.config().url_prefix.trim_end_matches('/').to_string();
        let written = AtomicUsize::new(0);
        let unchanged = AtomicUsize::new(0);

        manager.for_each_post(|doc| {
            let html = doc.rendered.as_deref().with_context(|| {
                format!(
                    "document '{}' has no rendered output (did a render plugin run?)",
                    doc.id()
                )
            })?;

            let url_path = match (&doc.url_path, &doc.slug) {
                (Some(url), _) => url.clone(),
                (None, Some(slug)) => format!("{url_prefix}/{slug}"),
                (None, None) => anyhow::bail!("document '{}' has neither a URL nor a slug", doc.id()),
            };
            let output_path = url_to_output_path(&url_path, &output_dir);

            if std::fs::read(&output_path).is_ok_and(|existing| existing == html.as_bytes()) {
                unchanged.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }

            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&output_path, html)
                .with_context(|| format!("failed to write {}", output_path.display()))?;
            written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })?;

        tracing::info!(
            output = %output_dir.display(),
            written = written.into_inner(),
            unchanged = unchanged.into_inner(),
            "wrote output"
        );
        Ok(())
    }
}

/// Convert a URL path to an output file path.
///
/// Documents (no extension) become `path/index.html`.
/// Paths with an extension are kept as they are.
///
/// # Examples
/// ```ignore
/// url_to_output_path("/blog/hello", output_dir) => output_dir/blog/hello/index.html
/// url_to_output_path("/", output_dir) => output_dir/index.html
/// url_to_output_path("/feed.xml", output_dir) => output_dir/feed.xml
/// ```
pub fn url_to_output_path(url_path: &str, output_dir: &Path) -> PathBuf {
    let url_path = url_path.trim_matches('/');
    let has_extension = url_path
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'));

    if url_path.is_empty() {
        output_dir.join("index.html")
    } else if has_extension {
        output_dir.join(url_path)
    } else {
        output_dir.join(url_path).join("index.html")
    }
}
