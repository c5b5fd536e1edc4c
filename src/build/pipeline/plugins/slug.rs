//! Slug assignment.

use std::collections::HashSet;

use crate::build::document::{Document, DocumentHandle};
use crate::build::index::normalize_key;
use crate::build::manager::Manager;
use crate::build::pipeline::{Plugin, Priority, Stage, StageSet};

/// Gives every document a unique, normalized slug and applies the draft
/// policy.
///
/// Runs last in Collect, after every collector has added its documents.
/// Slugs set in front matter are claimed first, then the rest are derived
/// from file names. Both passes go in path order, and a slug that is already
/// taken gets `-2`, `-3` and so on appended, so the outcome does not depend
/// on collection order.
///
/// Draft and private documents are marked to be skipped unless
/// `include_drafts` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlugAssigner;

impl SlugAssigner {
    fn derive(doc: &Document) -> String {
        let base = doc
            .source_stem()
            .or_else(|| doc.id().as_path().file_stem().and_then(|s| s.to_str()))
            .map(normalize_key)
            .unwrap_or_default();
        if base.is_empty() {
            "untitled".to_string()
        } else {
            base
        }
    }
}

impl Plugin for SlugAssigner {
    fn name(&self) -> &str {
        "slugs"
    }

    fn stages(&self) -> StageSet {
        Stage::Collect.into()
    }

    fn priority(&self, _stage: Stage) -> Priority {
        Priority::Last
    }

    fn collect(&mut self, manager: &mut Manager) -> anyhow::Result<()> {
        let include_drafts = manager.config().include_drafts;
        let mut docs: Vec<&DocumentHandle> = manager.documents().iter().collect();
        docs.sort_by(|a, b| a.id().cmp(b.id()));

        let mut taken = HashSet::with_capacity(docs.len());
        let mut renamed = 0usize;

        // Explicit slugs first, so a derived slug never steals one
        for handle in &docs {
            let mut doc = handle.write();
            let Some(explicit) = doc.slug.as_deref() else {
                continue;
            };
            let wanted = normalize_key(explicit);
            let wanted = if wanted.is_empty() {
                Self::derive(&doc)
            } else {
                wanted
            };
            let slug = claim(&mut taken, wanted.clone());
            if slug != wanted {
                tracing::warn!(document = %doc.id(), wanted = %wanted, assigned = %slug, "slug already taken");
                renamed += 1;
            }
            doc.slug = Some(slug);
        }

        for handle in &docs {
            let mut doc = handle.write();
            if doc.slug.is_none() {
                let wanted = Self::derive(&doc);
                let slug = claim(&mut taken, wanted.clone());
                if slug != wanted {
                    renamed += 1;
                }
                doc.slug = Some(slug);
            }

            let hidden = doc.status.draft || doc.status.private;
            if hidden && !include_drafts {
                doc.status.skip = true;
            }
            doc.status.published = !doc.status.skip;
        }

        tracing::debug!(documents = docs.len(), renamed, "assigned slugs");
        Ok(())
    }
}

/// Take `wanted`, or the first free `wanted-N` for N >= 2.
fn claim(taken: &mut HashSet<String>, wanted: String) -> String {
    if taken.insert(wanted.clone()) {
        return wanted;
    }
    (2..)
        .map(|n| format!("{wanted}-{n}"))
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;

    fn manager(include_drafts: bool) -> Manager {
        Manager::new(BuildConfig {
            include_drafts,
            concurrency: 1,
            ..BuildConfig::default()
        })
        .unwrap()
    }

    fn slug_of(manager: &Manager, id: &str) -> String {
        manager
            .document(id)
            .unwrap()
            .read()
            .slug
            .clone()
            .unwrap()
    }

    #[test]
    fn test_derived_from_file_names() {
        let mut m = manager(false);
        m.add_document(Document::new("posts/Hello World.md")).unwrap();
        m.add_document(Document::new("guides/index.md")).unwrap();
        m.add_document(Document::new("index.md")).unwrap();
        m.add_document(Document::new("Über Café.md")).unwrap();

        SlugAssigner.collect(&mut m).unwrap();

        assert_eq!(slug_of(&m, "posts/Hello World.md"), "hello-world");
        assert_eq!(slug_of(&m, "guides/index.md"), "guides");
        assert_eq!(slug_of(&m, "index.md"), "index");
        assert_eq!(slug_of(&m, "Über Café.md"), "uber-cafe");
    }

    #[test]
    fn test_collisions_resolved_in_path_order() {
        let mut m = manager(false);
        // Added out of path order on purpose
        m.add_document(Document::new("c/post.md")).unwrap();
        m.add_document(Document::new("a/post.md")).unwrap();
        m.add_document(Document::new("b/post.md")).unwrap();

        SlugAssigner.collect(&mut m).unwrap();

        assert_eq!(slug_of(&m, "a/post.md"), "post");
        assert_eq!(slug_of(&m, "b/post.md"), "post-2");
        assert_eq!(slug_of(&m, "c/post.md"), "post-3");
    }

    #[test]
    fn test_explicit_slugs_win() {
        let mut m = manager(false);
        m.add_document(Document::new("a/intro.md")).unwrap();
        let mut pinned = Document::new("z/other.md");
        pinned.slug = Some("Intro".to_string());
        m.add_document(pinned).unwrap();

        SlugAssigner.collect(&mut m).unwrap();

        assert_eq!(slug_of(&m, "z/other.md"), "intro");
        assert_eq!(slug_of(&m, "a/intro.md"), "intro-2");
    }

    #[test]
    fn test_unusable_explicit_slug_falls_back() {
        let mut m = manager(false);
        let mut doc = Document::new("notes.md");
        doc.slug = Some("???".to_string());
        m.add_document(doc).unwrap();

        SlugAssigner.collect(&mut m).unwrap();
        assert_eq!(slug_of(&m, "notes.md"), "notes");
    }

    #[test]
    fn test_drafts_skipped_unless_included() {
        let build = |include_drafts: bool| {
            let mut m = manager(include_drafts);
            m.add_document(Document::from_source("draft.md", "---\ndraft: true\n---\nx"))
                .unwrap();
            m.add_document(Document::from_source("secret.md", "---\nprivate: true\n---\nx"))
                .unwrap();
            m.add_document(Document::from_source("live.md", "x")).unwrap();
            SlugAssigner.collect(&mut m).unwrap();
            m.documents()
                .iter()
                .map(|h| {
                    let doc = h.read();
                    (doc.id().to_string(), doc.status.skip, doc.status.published)
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(
            build(false),
            vec![
                ("draft.md".to_string(), true, false),
                ("secret.md".to_string(), true, false),
                ("live.md".to_string(), false, true),
            ]
        );
        assert!(build(true).iter().all(|(_, skip, published)| !skip && *published));
    }

    #[test]
    fn test_claim() {
        let mut taken = HashSet::new();
        assert_eq!(claim(&mut taken, "a".to_string()), "a");
        assert_eq!(claim(&mut taken, "a".to_string()), "a-2");
        assert_eq!(claim(&mut taken, "a-2".to_string()), "a-2-2");
        assert_eq!(claim(&mut taken, "a".to_string()), "a-3");
    }
}
