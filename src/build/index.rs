//! Cross-document lookup by slug.
//!
//! The index is built once, after the Collect stage, from a closed-world
//! snapshot of the collection. It does not follow later slug changes, and it
//! never rebuilds itself: synthetic pages created after that point must be
//! added with [`PostIndex::register`] before anything looks them up, so a
//! forgotten registration shows up as a lookup miss rather than a race.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::document::{DocumentHandle, DocumentId};

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("document '{0}' has no slug to index")]
    MissingSlug(DocumentId),

    #[error("slug '{slug}' of document '{id}' normalizes to an empty key")]
    EmptyKey { id: DocumentId, slug: String },

    #[error("key '{key}' is already taken by '{existing}', cannot index '{rejected}'")]
    DuplicateKey {
        key: String,
        existing: DocumentId,
        rejected: DocumentId,
    },
}

/// Normalize an identifier into an index key.
///
/// Transliterates to ASCII, lowercases, drops punctuation, and collapses
/// runs of whitespace, `-`, `_` and `/` into a single `-`:
///
/// ```ignore
/// normalize_key("Hello, World!") => "hello-world"
/// normalize_key("Crème Brûlée") => "creme-brulee"
/// normalize_key("  C++ tips__2024 ") => "c-tips-2024"
/// ```
///
/// Lookups normalize their argument with this same function; callers that
/// precompute keys must use it too or their lookups will silently miss.
pub fn normalize_key(s: &str) -> String {
    let ascii = deunicode::deunicode(s);
    let mut key = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !key.is_empty() {
                key.push('-');
            }
            pending_separator = false;
            key.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || matches!(c, '-' | '_' | '/') {
            pending_separator = true;
        }
    }

    key
}

/// One indexed document.
///
/// `slug`, `url_path`, `title` and `active` are snapshots taken at
/// registration, so resolving a reference never has to lock the target
/// document. Use `handle` for anything else, outside parallel passes or via
/// [`DocumentHandle::try_read`].
#[derive(Debug, Clone)]
pub struct IndexedPost {
    pub key: String,
    pub id: DocumentId,
    pub slug: String,
    pub url_path: Option<String>,
    pub title: String,
    /// False if the document was marked skipped when indexed
    pub active: bool,
    pub handle: DocumentHandle,
}

impl IndexedPost {
    fn snapshot(handle: &DocumentHandle) -> Result<Self, IndexError> {
        let doc = handle.read();
        let slug = doc
            .slug
            .clone()
            .ok_or_else(|| IndexError::MissingSlug(doc.id().clone()))?;
        let key = normalize_key(&slug);
        if key.is_empty() {
            return Err(IndexError::EmptyKey {
                id: doc.id().clone(),
                slug,
            });
        }

        Ok(Self {
            key,
            id: doc.id().clone(),
            slug,
            url_path: doc.url_path.clone(),
            title: doc.title(),
            active: doc.is_active(),
            handle: handle.clone(),
        })
    }
}

/// Both views of the index, kept in step under one lock.
#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<String, Arc<IndexedPost>>,
    by_id: HashMap<DocumentId, Arc<IndexedPost>>,
}

impl Entries {
    fn insert(&mut self, post: Arc<IndexedPost>) {
        self.by_key.insert(post.key.clone(), Arc::clone(&post));
        self.by_id.insert(post.id.clone(), post);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<IndexedPost>> {
        let post = self.by_id.remove(id)?;
        if self.by_key.get(&post.key).is_some_and(|held| held.id == post.id) {
            self.by_key.remove(&post.key);
        }
        Some(post)
    }
}

/// Normalized key -> document, plus document id -> document.
///
/// Lookups take a shared lock and never mutate, so any number of workers can
/// resolve references at once. Declared dependencies are ids, so a worker
/// follows them with [`PostIndex::by_id`] rather than locking the target.
#[derive(Debug, Default)]
pub struct PostIndex {
    entries: RwLock<Entries>,
}

impl PostIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every document that has a slug, in one pass.
    ///
    /// Documents without a slug are left out. When two slugs normalize to
    /// the same key the earlier document keeps it; resolving collisions is
    /// the Collect stage's job, so this only logs.
    pub fn build(docs: &[DocumentHandle]) -> Self {
        let mut entries = Entries::default();

        for handle in docs {
            let post = match IndexedPost::snapshot(handle) {
                Ok(post) => post,
                Err(IndexError::MissingSlug(_)) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "document left out of post index");
                    continue;
                }
            };

            if let Some(existing) = entries.by_key.get(&post.key) {
                tracing::warn!(
                    key = %post.key,
                    kept = %existing.id,
                    dropped = %post.id,
                    "duplicate slug in post index"
                );
                continue;
            }
            entries.insert(Arc::new(post));
        }

        tracing::debug!(entries = entries.by_key.len(), "built post index");
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Add a document after the index was built.
    ///
    /// Registering a document again refreshes its snapshot, releasing its
    /// old key if the slug changed. A key held by a different document is an
    /// error.
    pub fn register(&self, handle: &DocumentHandle) -> Result<Arc<IndexedPost>, IndexError> {
        let post = Arc::new(IndexedPost::snapshot(handle)?);

        let mut entries = self.entries.write();
        if let Some(existing) = entries.by_key.get(&post.key)
            && existing.id != post.id
        {
            return Err(IndexError::DuplicateKey {
                key: post.key.clone(),
                existing: existing.id.clone(),
                rejected: post.id.clone(),
            });
        }
        entries.remove(post.id.as_str());
        entries.insert(Arc::clone(&post));
        Ok(post)
    }

    /// Drop the entry for document `id`. Returns the removed snapshot.
    pub fn unregister(&self, id: &str) -> Option<Arc<IndexedPost>> {
        self.entries.write().remove(id)
    }

    /// Find the document for `slug`. The argument is normalized first.
    pub fn lookup(&self, slug: &str) -> Option<Arc<IndexedPost>> {
        self.entries.read().by_key.get(&normalize_key(slug)).cloned()
    }

    /// Find the document with source path `id`.
    pub fn by_id(&self, id: &str) -> Option<Arc<IndexedPost>> {
        self.entries.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.entries.read().by_key.contains_key(&normalize_key(slug))
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().by_key.keys().cloned().collect();
        keys.sort();
        keys
    }
}
