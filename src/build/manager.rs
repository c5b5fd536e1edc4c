//! Shared build state handed to every plugin.

use std::collections::{BTreeSet, HashMap, VecDeque};

use super::cache::{BuildCache, CacheError, Fingerprint, Fingerprinter};
use super::document::{Document, DocumentHandle, DocumentId, Lifecycle};
use super::index::{IndexError, PostIndex};
use super::pipeline::Stage;
use super::runner::{RunError, Runner};
use crate::config::{BuildConfig, ConfigError, ConfigStore};

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("failed to start worker pool: {0}")]
    Runner(#[from] rayon::ThreadPoolBuildError),

    #[error("a document for '{0}' already exists")]
    DuplicateDocument(DocumentId),

    #[error("failed to index document: {0}")]
    Index(#[from] IndexError),

    #[error("invalid build config: {0}")]
    Config(#[from] ConfigError),
}

/// What a dependent can see of a document, frozen when collection ends.
#[derive(Debug, Clone)]
struct SourceDigest {
    content: Fingerprint,
    dependencies: Vec<DocumentId>,
}

impl SourceDigest {
    fn of(doc: &Document) -> Self {
        let mut hasher = Fingerprinter::new();
        hasher.fingerprint(&doc.content_fingerprint());
        fold_identity(&mut hasher, doc);
        Self {
            content: hasher.finish(),
            dependencies: doc.dependencies.iter().cloned().collect(),
        }
    }
}

/// Fold in the fields other documents link and embed by. Collect can change
/// them without any source edit, e.g. when a new file takes a slug.
fn fold_identity(hasher: &mut Fingerprinter, doc: &Document) {
    hasher
        .json(&doc.slug)
        .json(&doc.url_path)
        .str(&doc.title());
}

/// Root object of a build.
///
/// Owns the document collection together with everything plugins share:
/// configuration, the post index, the build cache and the worker pool.
/// Adding or removing documents takes `&mut Manager`, which the scheduler
/// only hands to one plugin at a time, so the collection never changes
/// underneath a parallel pass.
pub struct Manager {
    config: BuildConfig,
    config_fingerprint: Fingerprint,
    store: ConfigStore,
    /// Documents in the order they were added
    documents: Vec<DocumentHandle>,
    by_id: HashMap<DocumentId, DocumentHandle>,
    sources: HashMap<DocumentId, SourceDigest>,
    index: PostIndex,
    cache: BuildCache,
    runner: Runner,
}

impl Manager {
    /// Create the build state, loading the cache persisted by the last
    /// successful build if one is configured.
    pub fn new(config: BuildConfig) -> Result<Self, ManagerError> {
        config.validate()?;
        let runner = Runner::new(config.concurrency)?;
        let cache = match &config.cache_path {
            Some(path) => BuildCache::load(path),
            None => BuildCache::new(),
        };
        let config_fingerprint = config.fingerprint();

        tracing::debug!(
            workers = runner.workers(),
            cached = cache.len(),
            "build manager ready"
        );

        Ok(Self {
            config,
            config_fingerprint,
            store: ConfigStore::new(),
            documents: Vec::new(),
            by_id: HashMap::new(),
            sources: HashMap::new(),
            index: PostIndex::new(),
            cache,
            runner,
        })
    }

    // === Configuration ===

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Cross-plugin values; see [`crate::config::keys`].
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    // === Documents ===

    /// All documents, in the order they were added.
    pub fn documents(&self) -> &[DocumentHandle] {
        &self.documents
    }

    pub fn document(&self, id: &str) -> Option<&DocumentHandle> {
        self.by_id.get(id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Documents not marked to be skipped.
    pub fn active_documents(&self) -> Vec<DocumentHandle> {
        self.documents
            .iter()
            .filter(|handle| handle.read().is_active())
            .cloned()
            .collect()
    }

    /// Add a document. There can only be one document per source path.
    pub fn add_document(&mut self, doc: Document) -> Result<DocumentHandle, ManagerError> {
        if self.by_id.contains_key(doc.id()) {
            return Err(ManagerError::DuplicateDocument(doc.id().clone()));
        }

        self.sources.insert(doc.id().clone(), SourceDigest::of(&doc));
        let handle = DocumentHandle::new(doc);
        self.by_id.insert(handle.id().clone(), handle.clone());
        self.documents.push(handle.clone());
        Ok(handle)
    }

    /// Remove a document from the collection and the post index.
    pub fn remove_document(&mut self, id: &str) -> Option<DocumentHandle> {
        let handle = self.by_id.remove(id)?;
        self.documents.retain(|h| h.id() != handle.id());
        self.sources.remove(id);
        self.index.unregister(id);
        Some(handle)
    }

    // === Post index ===

    pub fn index(&self) -> &PostIndex {
        &self.index
    }

    /// Build the post index from the current collection, replacing any
    /// previous one. The scheduler calls this once, after Collect.
    pub fn build_index(&mut self) {
        self.index = PostIndex::build(&self.documents);
    }

    /// Add a page with no source file and register it with the index in
    /// one step.
    pub fn register_synthetic(&mut self, doc: Document) -> Result<DocumentHandle, ManagerError> {
        let handle = self.add_document(doc)?;
        if let Err(e) = self.index.register(&handle) {
            self.remove_document(handle.id().as_str());
            return Err(e.into());
        }
        Ok(handle)
    }

    // === Parallel passes ===

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Run `f` over every non-skipped document on the worker pool.
    pub fn for_each_post<F>(&self, f: F) -> Result<(), RunError>
    where
        F: Fn(&mut Document) -> anyhow::Result<()> + Sync,
    {
        self.runner.run(&self.active_documents(), f)
    }

    /// Run `f` over the non-skipped documents of `docs` on the worker pool.
    pub fn for_each_in<F>(&self, docs: &[DocumentHandle], f: F) -> Result<(), RunError>
    where
        F: Fn(&mut Document) -> anyhow::Result<()> + Sync,
    {
        let active: Vec<_> = docs
            .iter()
            .filter(|handle| handle.read().is_active())
            .cloned()
            .collect();
        self.runner.run(&active, f)
    }

    // === Cache ===

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Fingerprint of the output-affecting configuration.
    pub fn config_fingerprint(&self) -> &Fingerprint {
        &self.config_fingerprint
    }

    /// Cache key material for a transform of `doc`.
    ///
    /// Covers the configuration, the document's current body, front matter,
    /// slug, URL and title, and the same for every document it depends on,
    /// directly or transitively. Editing a dependency, or a dependency being
    /// given another slug, therefore changes the fingerprint of everything
    /// that embeds or links to it. Dependency state is the one frozen when
    /// collection ended, so the result does not depend on how far other
    /// workers have got, and computing it never locks another document.
    ///
    /// Plugins with extra inputs of their own should use
    /// [`Manager::fingerprinter`] and fold them in.
    pub fn fingerprint(&self, doc: &Document) -> Fingerprint {
        self.fingerprinter(doc).finish()
    }

    /// A [`Fingerprinter`] seeded as in [`Manager::fingerprint`].
    pub fn fingerprinter(&self, doc: &Document) -> Fingerprinter {
        let mut hasher = Fingerprinter::new();
        hasher
            .fingerprint(&self.config_fingerprint)
            .fingerprint(&doc.content_fingerprint());
        fold_identity(&mut hasher, doc);

        for dep in self.transitive_dependencies(doc) {
            hasher.str(dep.as_str());
            match self.sources.get(&dep) {
                Some(digest) => hasher.fingerprint(&digest.content),
                // A dependency that shows up later must still change the key
                None => hasher.str("<missing>"),
            };
        }
        hasher
    }

    /// Every document reachable from `doc` through declared dependencies,
    /// sorted by id, excluding `doc` itself. Cycles are visited once.
    fn transitive_dependencies(&self, doc: &Document) -> BTreeSet<DocumentId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<DocumentId> = doc.dependencies.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            if &id == doc.id() || !seen.insert(id.clone()) {
                continue;
            }
            if let Some(digest) = self.sources.get(&id) {
                queue.extend(digest.dependencies.iter().cloned());
            }
        }
        seen
    }

    /// Write the cache to the configured path. No-op without one.
    pub fn persist_cache(&self) -> Result<(), CacheError> {
        match &self.config.cache_path {
            Some(path) => self.cache.persist(path),
            None => Ok(()),
        }
    }

    // === Scheduler hooks ===

    /// Freeze source digests and build the index once collection is over.
    pub(crate) fn seal_collection(&mut self) {
        self.sources = self
            .documents
            .iter()
            .map(|handle| (handle.id().clone(), SourceDigest::of(&handle.read())))
            .collect();
        self.build_index();
    }

    /// Move every non-skipped document to the state reached by `stage`.
    pub(crate) fn advance_lifecycle(&self, stage: Stage) {
        let target = match stage {
            Stage::Transform => Lifecycle::Enriched,
            Stage::Render => Lifecycle::Rendered,
            Stage::Write => Lifecycle::Written,
            _ => return,
        };

        for handle in &self.documents {
            let mut doc = handle.write();
            if !doc.is_active() {
                continue;
            }
            // Nothing to write for a document that was never rendered
            if target >= Lifecycle::Rendered && doc.rendered.is_none() {
                continue;
            }
            doc.advance_to(target);
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("documents", &self.documents.len())
            .field("indexed", &self.index.len())
            .field("cached", &self.cache.len())
            .field("runner", &self.runner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Manager {
        Manager::new(BuildConfig {
            concurrency: 2,
            ..BuildConfig::default()
        })
        .unwrap()
    }

    fn source(path: &str, body: &str, deps: &[&str]) -> Document {
        let mut doc = Document::from_source(path, body);
        for dep in deps {
            doc.depend_on(*dep);
        }
        doc
    }

    #[test]
    fn test_one_document_per_path() {
        let mut m = manager();
        m.add_document(Document::new("a.md")).unwrap();
        let err = m.add_document(Document::new("a.md")).unwrap_err();
        assert!(matches!(err, ManagerError::DuplicateDocument(_)));
        assert_eq!(m.document_count(), 1);
    }

    #[test]
    fn test_document_lookup_and_removal() {
        let mut m = manager();
        let a = m.add_document(Document::new("a.md")).unwrap();
        m.add_document(Document::new("b.md")).unwrap();

        assert!(m.document("a.md").unwrap().ptr_eq(&a));
        assert!(m.remove_document("a.md").is_some());
        assert!(m.document("a.md").is_none());
        assert_eq!(m.documents().len(), 1);
        assert!(m.remove_document("a.md").is_none());
    }

    #[test]
    fn test_active_documents_exclude_skipped() {
        let mut m = manager();
        m.add_document(Document::new("a.md")).unwrap();
        let mut skipped = Document::new("b.md");
        skipped.status.skip = true;
        m.add_document(skipped).unwrap();

        let active = m.active_documents();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id().as_str(), "a.md");
    }

    #[test]
    fn test_for_each_post_skips_skipped() {
        let mut m = manager();
        let a = m.add_document(Document::new("a.md")).unwrap();
        let mut skipped = Document::new("b.md");
        skipped.status.skip = true;
        let b = m.add_document(skipped).unwrap();

        m.for_each_post(|doc| {
            doc.rendered = Some("done".to_string());
            Ok(())
        })
        .unwrap();

        assert!(a.read().rendered.is_some());
        assert!(b.read().rendered.is_none());

        m.for_each_in(&[b.clone()], |_| anyhow::bail!("never called"))
            .unwrap();
    }

    #[test]
    fn test_register_synthetic() {
        let mut m = manager();
        let mut post = Document::new("a.md");
        post.slug = Some("a".to_string());
        m.add_document(post).unwrap();
        m.build_index();

        let tag = m
            .register_synthetic(Document::synthetic("tags/rust.md", "tag-rust"))
            .unwrap();
        assert!(m.index().lookup("tag-rust").unwrap().handle.ptr_eq(&tag));

        // A slug clash rolls the addition back
        let clash = m.register_synthetic(Document::synthetic("tags/a.md", "a"));
        assert!(matches!(clash, Err(ManagerError::Index(_))));
        assert!(m.document("tags/a.md").is_none());
    }

    #[test]
    fn test_fingerprint_changes_with_config() {
        let doc = Document::from_source("a.md", "body");
        let plain = manager();
        let themed = Manager::new(BuildConfig {
            settings: serde_json::json!({ "theme": "dark" }),
            ..BuildConfig::default()
        })
        .unwrap();

        assert_ne!(plain.fingerprint(&doc), themed.fingerprint(&doc));
    }

    #[test]
    fn test_dependency_change_invalidates_dependents() {
        // c <- b <- a: a embeds b, b embeds c
        let build = |c_body: &str| {
            let mut m = manager();
            m.add_document(source("a.md", "A", &["b.md"])).unwrap();
            m.add_document(source("b.md", "B", &["c.md"])).unwrap();
            m.add_document(source("c.md", c_body, &[])).unwrap();
            m.add_document(source("d.md", "D", &[])).unwrap();
            m.seal_collection();
            m
        };

        let before = build("C");
        let after = build("C, edited");
        let fp = |m: &Manager, id: &str| m.fingerprint(&m.document(id).unwrap().read());

        assert_ne!(fp(&before, "a.md"), fp(&after, "a.md"));
        assert_ne!(fp(&before, "b.md"), fp(&after, "b.md"));
        assert_ne!(fp(&before, "c.md"), fp(&after, "c.md"));
        assert_eq!(fp(&before, "d.md"), fp(&after, "d.md"));
    }

    #[test]
    fn test_dependency_invalidation_reaches_the_cache() {
        let cache_path = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            cache_path: Some(cache_path.path().join("cache.json")),
            concurrency: 2,
            ..BuildConfig::default()
        };

        let run = |b_body: &str| {
            let mut m = Manager::new(config.clone()).unwrap();
            m.add_document(source("a.md", "A", &["b.md"])).unwrap();
            m.add_document(source("b.md", b_body, &[])).unwrap();
            m.seal_collection();
            let handle = m.document("a.md").unwrap().clone();
            let doc = handle.read();
            let hit = m.cache().get("embeds", "a.md", m.fingerprint(&doc)).is_some();
            m.cache().set("embeds", "a.md", m.fingerprint(&doc), "<div>A</div>");
            m.persist_cache().unwrap();
            hit
        };

        assert!(!run("B"), "cold cache");
        assert!(run("B"), "unchanged dependency hits");
        assert!(!run("B, edited"), "edited dependency misses");
    }

    #[test]
    fn test_dependency_cycles_terminate() {
        let mut m = manager();
        m.add_document(source("a.md", "A", &["b.md"])).unwrap();
        m.add_document(source("b.md", "B", &["a.md"])).unwrap();
        m.seal_collection();

        let a = m.document("a.md").unwrap().read();
        let deps = m.transitive_dependencies(&a);
        assert_eq!(deps.len(), 1);
        assert!(deps.contains("b.md"));
    }

    #[test]
    fn test_missing_dependency_changes_fingerprint_when_added() {
        let mut m = manager();
        m.add_document(source("a.md", "A", &["later.md"])).unwrap();
        m.seal_collection();
        let before = m.fingerprint(&m.document("a.md").unwrap().read());

        m.add_document(source("later.md", "L", &[])).unwrap();
        let after = m.fingerprint(&m.document("a.md").unwrap().read());
        assert_ne!(before, after);
    }

    #[test]
    fn test_advance_lifecycle() {
        let mut m = manager();
        let rendered = m.add_document(Document::new("a.md")).unwrap();
        let bare = m.add_document(Document::new("b.md")).unwrap();
        let mut skipped = Document::new("c.md");
        skipped.status.skip = true;
        let skipped = m.add_document(skipped).unwrap();

        m.advance_lifecycle(Stage::Collect);
        assert_eq!(rendered.read().lifecycle(), Lifecycle::Created);

        m.advance_lifecycle(Stage::Transform);
        rendered.write().rendered = Some("<p>a</p>".to_string());
        m.advance_lifecycle(Stage::Render);
        m.advance_lifecycle(Stage::Write);

        assert_eq!(rendered.read().lifecycle(), Lifecycle::Written);
        assert_eq!(bare.read().lifecycle(), Lifecycle::Enriched);
        assert_eq!(skipped.read().lifecycle(), Lifecycle::Created);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = Manager::new(BuildConfig {
            content_dir: "site".into(),
            output_dir: "site".into(),
            ..BuildConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }

    #[test]
    fn test_remove_document_drops_index_entry() {
        let mut m = manager();
        let mut post = Document::new("a.md");
        post.slug = Some("a".to_string());
        m.add_document(post).unwrap();
        m.seal_collection();
        assert!(m.index().lookup("a").is_some());

        m.remove_document("a.md");
        assert!(m.index().lookup("a").is_none());
        assert!(m.index().by_id("a.md").is_none());

        // The slug is free for a new page
        m.register_synthetic(Document::synthetic("tags/a.md", "a"))
            .unwrap();
    }

    #[test]
    fn test_dependency_slug_change_invalidates_dependents() {
        let build = |dep_slug: &str| {
            let mut m = manager();
            m.add_document(source("a.md", "A", &["z/post.md"])).unwrap();
            let mut dep = source("z/post.md", "same body", &[]);
            dep.slug = Some(dep_slug.to_string());
            m.add_document(dep).unwrap();
            m.seal_collection();
            m
        };

        let before = build("post");
        let after = build("post-2");
        let fp = |m: &Manager| m.fingerprint(&m.document("a.md").unwrap().read());
        assert_ne!(fp(&before), fp(&after));
    }

    #[test]
    fn test_persist_cache_without_path_is_noop() {
        let m = manager();
        m.cache().set("ns", "a", "fp", "v");
        m.persist_cache().unwrap();
    }
}
