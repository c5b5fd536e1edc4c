use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::cache::{Fingerprint, Fingerprinter};

// =============================================================================
// Identity
// =============================================================================

/// Stable identity of a document: its source path, with `/` separators.
///
/// Synthetic documents (pages with no source file) use a made-up path such
/// as `tags/rust.md`; it only has to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Status and lifecycle
// =============================================================================

/// Publication flags.
///
/// `skip` is the one the core acts on: a skipped document is a no-op for
/// every later stage and never advances its [`Lifecycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub skip: bool,
    pub draft: bool,
    pub private: bool,
    pub published: bool,
}

/// Where a document is in the build.
///
/// Transitions only move forward; the scheduler advances every non-skipped
/// document after the Transform, Render and Write stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Collected, with only source-derived fields set
    #[default]
    Created,
    /// Front matter and plugin-derived fields filled in
    Enriched,
    /// Final markup produced
    Rendered,
    /// Output persisted
    Written,
}

impl Lifecycle {
    /// Move to `next` if it is later than the current state.
    ///
    /// Returns whether the state changed.
    pub fn advance_to(&mut self, next: Lifecycle) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Plugin extensions
// =============================================================================

/// Per-plugin data attached to a document, keyed by plugin name.
///
/// Schemaless: each plugin owns the shape of its
/// own entry and decodes it with [`Extensions::get`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extensions(BTreeMap<String, serde_json::Value>);

impl Extensions {
    /// Decode the entry for `plugin`. Returns `None` when it is missing or
    /// has a different shape.
    pub fn get<T: DeserializeOwned>(&self, plugin: &str) -> Option<T> {
        self.0
            .get(plugin)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn raw(&self, plugin: &str) -> Option<&serde_json::Value> {
        self.0.get(plugin)
    }

    /// Store `value` under `plugin`. Values that fail to encode are dropped.
    pub fn set<T: Serialize>(&mut self, plugin: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.0.insert(plugin.to_string(), value);
            }
            Err(e) => tracing::warn!(plugin, error = %e, "dropping unencodable extension value"),
        }
    }

    pub fn remove(&mut self, plugin: &str) -> Option<serde_json::Value> {
        self.0.remove(plugin)
    }

    pub fn contains(&self, plugin: &str) -> bool {
        self.0.contains_key(plugin)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Front matter
// =============================================================================

/// Front matter metadata parsed from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    /// Page title (can override filename-derived title)
    pub title: Option<String>,
    /// Page description for SEO/previews
    pub description: Option<String>,
    /// Custom slug override
    pub slug: Option<String>,
    /// Work in progress, skipped unless drafts are included
    #[serde(default)]
    pub draft: bool,
    /// Not for publication, skipped unless drafts are included
    #[serde(default)]
    pub private: bool,
    /// Source paths of documents this one embeds or links to
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Additional arbitrary metadata
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of parsing front matter from markdown content.
#[derive(Debug)]
pub struct ParsedContent {
    /// The parsed front matter (empty if none found)
    pub front_matter: FrontMatter,
    /// The content without the front matter block
    pub content: String,
}

/// Parse front matter from markdown content.
///
/// Front matter is a YAML block delimited by `---` at the start of the file:
///
/// ```markdown
/// ---
/// title: My Page
/// depends_on: [notes/intro.md]
/// ---
///
/// # Content starts here
/// ```
///
/// Returns the parsed front matter and the remaining content.
pub fn parse_front_matter(content: &str) -> ParsedContent {
    let content = content.trim_start();

    if !content.starts_with("---") {
        return ParsedContent {
            front_matter: FrontMatter::default(),
            content: content.to_string(),
        };
    }

    let after_opening = &content[3..];
    let Some(closing_pos) = after_opening.find("\n---") else {
        // No closing delimiter found, treat entire content as body
        return ParsedContent {
            front_matter: FrontMatter::default(),
            content: content.to_string(),
        };
    };

    let yaml_content = after_opening[..closing_pos].trim_start_matches('\n');

    // "---" + yaml + "\n---"
    let body_start = 3 + closing_pos + 4;
    let body = if body_start < content.len() {
        content[body_start..].trim_start_matches('\n').to_string()
    } else {
        String::new()
    };

    // An empty block deserializes as unit, not as a mapping
    let front_matter = if yaml_content.trim().is_empty() {
        FrontMatter::default()
    } else {
        match serde_yaml::from_str(yaml_content) {
            Ok(fm) => fm,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse front matter, using defaults");
                FrontMatter::default()
            }
        }
    };

    ParsedContent {
        front_matter,
        content: body,
    }
}

// =============================================================================
// Documents
// =============================================================================

/// A document flowing through the build pipeline.
///
/// The identity is fixed at creation. Everything else is mutable and is
/// filled in by plugins as the document moves through the stages.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    /// Index join key, unique across the build once assigned
    pub slug: Option<String>,
    /// Explicit title; see [`Document::title`] for the fallback
    pub title: Option<String>,
    /// URL the document is served at
    pub url_path: Option<String>,
    pub front_matter: FrontMatter,
    /// Source body, without front matter
    pub content: String,
    /// Final markup, set during Render
    pub rendered: Option<String>,
    pub extra: Extensions,
    pub status: Status,
    /// Documents this one semantically depends on (embeds, links)
    pub dependencies: BTreeSet<DocumentId>,
    /// True for pages with no source file
    pub synthetic: bool,
    lifecycle: Lifecycle,
}

impl Document {
    /// Create an empty document for a source path.
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            slug: None,
            title: None,
            url_path: None,
            front_matter: FrontMatter::default(),
            content: String::new(),
            rendered: None,
            extra: Extensions::default(),
            status: Status::default(),
            dependencies: BTreeSet::new(),
            synthetic: false,
            lifecycle: Lifecycle::Created,
        }
    }

    /// Create a page that has no source file, such as a tag listing.
    ///
    /// It must be registered with the post index before anything looks it
    /// up by slug.
    pub fn synthetic(id: impl Into<DocumentId>, slug: impl Into<String>) -> Self {
        let mut doc = Self::new(id);
        doc.slug = Some(slug.into());
        doc.synthetic = true;
        doc.status.published = true;
        doc
    }

    /// Create a document from raw source text, applying its front matter.
    pub fn from_source(id: impl Into<DocumentId>, raw: &str) -> Self {
        let mut doc = Self::new(id);
        let parsed = parse_front_matter(raw);
        let fm = parsed.front_matter;

        doc.title = fm.title.clone();
        doc.slug = fm.slug.clone();
        doc.status.draft = fm.draft;
        doc.status.private = fm.private;
        doc.status.published = !fm.draft && !fm.private;
        doc.dependencies = fm.depends_on.iter().map(DocumentId::new).collect();
        doc.front_matter = fm;
        doc.content = parsed.content;
        doc
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Get the document title, falling back to the file name.
    ///
    /// Index files take the name of their directory.
    pub fn title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.source_stem()
            .map(title_case)
            .unwrap_or_else(|| "Untitled".to_string())
    }

    /// File stem of the source path, or the parent directory name for
    /// `index` files.
    pub fn source_stem(&self) -> Option<&str> {
        let path = self.id.as_path();
        let stem = path.file_stem()?.to_str()?;
        if stem == "index" {
            path.parent()?.file_name()?.to_str()
        } else {
            Some(stem)
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn advance_to(&mut self, next: Lifecycle) -> bool {
        self.lifecycle.advance_to(next)
    }

    /// False once the document is marked to be skipped.
    pub fn is_active(&self) -> bool {
        !self.status.skip
    }

    /// Record that this document embeds or links to `other`.
    pub fn depend_on(&mut self, other: impl Into<DocumentId>) {
        let other = other.into();
        if other != self.id {
            self.dependencies.insert(other);
        }
    }

    /// Digest of this document's own source: body and front matter.
    ///
    /// Dependencies are not included; see `Manager::fingerprint` for the
    /// digest that is safe to key cache entries on.
    pub fn content_fingerprint(&self) -> Fingerprint {
        let mut hasher = Fingerprinter::new();
        hasher.str(&self.content).json(&self.front_matter);
        hasher.finish()
    }
}

/// Shared handle to a document.
///
/// The manager owns one handle per document; the index and worker callbacks
/// clone it. The id is stored outside the lock, so identity checks never
/// block on a document that is being processed.
#[derive(Clone)]
pub struct DocumentHandle {
    id: DocumentId,
    inner: Arc<RwLock<Document>>,
}

impl DocumentHandle {
    pub fn new(doc: Document) -> Self {
        Self {
            id: doc.id.clone(),
            inner: Arc::new(RwLock::new(doc)),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Shared access. Blocks while a worker holds the document.
    pub fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.inner.read()
    }

    /// Exclusive access. Blocks while anyone else holds the document.
    pub fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.inner.write()
    }

    /// Shared access without blocking; `None` while a worker holds the
    /// document. Use this to peek at another document from inside a
    /// parallel pass.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, Document>> {
        self.inner.try_read()
    }

    /// Whether both handles point at the same document instance.
    pub fn ptr_eq(&self, other: &DocumentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentHandle").field(&self.id).finish()
    }
}

/// Convert a filename slug to title case.
/// "getting-started" -> "Getting Started"
/// "api_reference" -> "Api Reference"
fn title_case(s: &str) -> String {
    s.split(['-', '_'])
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
