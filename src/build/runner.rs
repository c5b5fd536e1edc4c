//! Bounded-parallelism executor for per-document work.
//!
//! The runner owns a fixed-size rayon pool. [`Runner::run`] hands every
//! distinct document to exactly one worker, which holds that document's
//! write lock for the whole callback. Once a callback fails no new callbacks
//! start, but the ones already running finish, so no document is left half
//! mutated by an abandoned worker.

use std::any::Any;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use super::document::{Document, DocumentHandle, DocumentId};

/// A per-document callback failed.
#[derive(thiserror::Error, Debug)]
#[error("document '{document}' failed: {source}")]
pub struct RunError {
    pub document: DocumentId,
    pub source: anyhow::Error,
}

/// Fixed-size worker pool for per-document passes.
pub struct Runner {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl Runner {
    /// Create a runner with `concurrency` workers; 0 picks the available
    /// parallelism of the machine.
    pub fn new(concurrency: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let workers = if concurrency == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            concurrency
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("stagepress-worker-{i}"))
            .build()?;

        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to each document in `docs`.
    ///
    /// Handles that share an id are processed once. Documents are visited
    /// in no particular order. Returns the first failure recorded; a
    /// callback that panics counts as a failure of its document.
    ///
    /// `f` may only mutate the document it is given. Other documents are
    /// reached through the post index, whose snapshots never block.
    pub fn run<F>(&self, docs: &[DocumentHandle], f: F) -> Result<(), RunError>
    where
        F: Fn(&mut Document) -> anyhow::Result<()> + Sync,
    {
        let mut seen = HashSet::with_capacity(docs.len());
        let unique: Vec<&DocumentHandle> = docs
            .iter()
            .filter(|handle| seen.insert(handle.id().clone()))
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<RunError>> = Mutex::new(None);

        self.pool.install(|| {
            unique.par_iter().for_each(|handle| {
                if failed.load(Ordering::Acquire) {
                    return;
                }

                let outcome = {
                    let mut doc = handle.write();
                    panic::catch_unwind(AssertUnwindSafe(|| f(&mut *doc)))
                };
                let error = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(payload) => {
                        anyhow::anyhow!("callback panicked: {}", panic_message(payload.as_ref()))
                    }
                };

                tracing::debug!(document = %handle.id(), error = %error, "document callback failed");
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(RunError {
                        document: handle.id().clone(),
                        source: error,
                    });
                }
                failed.store(true, Ordering::Release);
            });
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("workers", &self.workers)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
