//! Source collection.
//!
//! Walks the content directory and turns every markdown file into a
//! document.

use std::path::{Path, PathBuf};

use crate::build::document::{Document, DocumentId};
use crate::build::manager::Manager;
use crate::build::pipeline::{Plugin, Priority, Stage, StageSet};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("content directory does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("content path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read directory entry in {path}: {source}")]
    ReadEntry {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read source file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Creates one document per markdown file under `content_dir`.
///
/// Document ids are paths relative to the content directory, so the same
/// site collected from a different checkout keeps its cache entries.
/// Runs first in Collect so other collectors see the source documents.
#[derive(Debug, Clone)]
pub struct SourceCollector {
    extensions: Vec<String>,
}

impl SourceCollector {
    pub fn new() -> Self {
        Self {
            extensions: vec!["md".to_string(), "markdown".to_string()],
        }
    }

    /// Collect files with these extensions instead (case-insensitive,
    /// without the dot).
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_lowercase())
                .collect(),
        }
    }

    /// Relative paths of every source file under `root`, sorted.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, SourceError> {
        if !root.exists() {
            return Err(SourceError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root.to_path_buf()));
        }

        let mut found = Vec::new();
        self.walk_directory(root, Path::new(""), &mut found)?;
        found.sort();
        Ok(found)
    }

    fn walk_directory(
        &self,
        dir: &Path,
        relative_path: &Path,
        found: &mut Vec<PathBuf>,
    ) -> Result<(), SourceError> {
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::ReadDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| SourceError::ReadEntry {
                path: dir.to_path_buf(),
                source: e,
            })?;

            let path = entry.path();
            let file_name = entry.file_name();

            // Skip hidden files and directories
            if file_name.to_string_lossy().starts_with('.') {
                continue;
            }

            let item_relative_path = relative_path.join(&file_name);
            if path.is_dir() {
                self.walk_directory(&path, &item_relative_path, found)?;
            } else if path.is_file() && self.is_source(&item_relative_path) {
                found.push(item_relative_path);
            }
        }

        Ok(())
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl Default for SourceCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SourceCollector {
    fn name(&self) -> &str {
        "sources"
    }

    fn stages(&self) -> StageSet {
        Stage::Collect.into()
    }

    fn priority(&self, _stage: Stage) -> Priority {
        Priority::First
    }

    fn collect(&mut self, manager: &mut Manager) -> anyhow::Result<()> {
        let root = manager.config().content_dir.clone();
        let url_prefix = manager.config().url_prefix.clone();

        let paths = self.discover(&root)?;
        for relative in &paths {
            let full_path = root.join(relative);
            let raw = std::fs::read_to_string(&full_path).map_err(|e| SourceError::ReadFile {
                path: full_path.clone(),
                source: e,
            })?;

            let mut doc = Document::from_source(DocumentId::new(relative), &raw);
            doc.url_path = Some(source_path_to_url(relative, &url_prefix));
            manager.add_document(doc)?;
        }

        tracing::info!(root = %root.display(), documents = paths.len(), "collected sources");
        Ok(())
    }
}

/// Convert a source path to the URL the document is served at.
///
/// # Examples
/// ```ignore
/// source_path_to_url("installation.md", "/blog") => "/blog/installation"
/// source_path_to_url("guides/setup.md", "") => "/guides/setup"
/// source_path_to_url("guides/index.md", "/blog") => "/blog/guides"
/// source_path_to_url("index.md", "") => "/"
/// ```
pub fn source_path_to_url(path: &Path, url_prefix: &str) -> String {
    let mut url = url_prefix.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }

    let path_str = path.with_extension("").to_string_lossy().replace('\\', "/");

    // Index files become the directory URL
    let path_str = match path_str.strip_suffix("index") {
        Some(dir) if dir.is_empty() || dir.ends_with('/') => dir.trim_end_matches('/'),
        _ => path_str.as_str(),
    };

    url.push_str(path_str);

    // No trailing slash unless it's the root
    if url.len() > 1 && url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;

    fn touch(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_source_path_to_url() {
        assert_eq!(
            source_path_to_url(Path::new("installation.md"), "/blog"),
            "/blog/installation"
        );
        assert_eq!(
            source_path_to_url(Path::new("guides/setup.md"), ""),
            "/guides/setup"
        );
        assert_eq!(
            source_path_to_url(Path::new("guides/setup.md"), "/blog/"),
            "/blog/guides/setup"
        );
    }

    #[test]
    fn test_source_path_to_url_index() {
        assert_eq!(source_path_to_url(Path::new("index.md"), "/blog"), "/blog");
        assert_eq!(source_path_to_url(Path::new("index.md"), ""), "/");
        assert_eq!(
            source_path_to_url(Path::new("guides/index.md"), "/blog"),
            "/blog/guides"
        );
        // Only a whole "index" component counts
        assert_eq!(
            source_path_to_url(Path::new("reindex.md"), ""),
            "/reindex"
        );
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.md", "");
        touch(dir.path(), "a/z.markdown", "");
        touch(dir.path(), "a/notes.txt", "");
        touch(dir.path(), ".hidden.md", "");
        touch(dir.path(), ".drafts/x.md", "");
        touch(dir.path(), "UPPER.MD", "");

        let found = SourceCollector::new().discover(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("UPPER.MD"),
                PathBuf::from("a/z.markdown"),
                PathBuf::from("b.md"),
            ]
        );

        let txt = SourceCollector::with_extensions(["TXT"])
            .discover(dir.path())
            .unwrap();
        assert_eq!(txt, vec![PathBuf::from("a/notes.txt")]);
    }

    #[test]
    fn test_discover_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceCollector::new()
            .discover(&dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, SourceError::PathNotFound(_)));

        touch(dir.path(), "file.md", "");
        let err = SourceCollector::new()
            .discover(&dir.path().join("file.md"))
            .unwrap_err();
        assert!(matches!(err, SourceError::NotADirectory(_)));
    }

    #[test]
    fn test_collect_creates_documents() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            "posts/hello.md",
            "---\ntitle: Hello\ndepends_on: [about.md]\n---\nHi there",
        );
        touch(dir.path(), "about.md", "About me");

        let mut manager = Manager::new(BuildConfig {
            content_dir: dir.path().to_path_buf(),
            url_prefix: "/site".to_string(),
            concurrency: 1,
            ..BuildConfig::default()
        })
        .unwrap();
        SourceCollector::new().collect(&mut manager).unwrap();

        let ids: Vec<_> = manager
            .documents()
            .iter()
            .map(|h| h.id().to_string())
            .collect();
        assert_eq!(ids, vec!["about.md", "posts/hello.md"]);

        let hello = manager.document("posts/hello.md").unwrap().read();
        assert_eq!(hello.title(), "Hello");
        assert_eq!(hello.content, "Hi there");
        assert_eq!(hello.url_path.as_deref(), Some("/site/posts/hello"));
        assert!(hello.dependencies.contains("about.md"));
    }
}
