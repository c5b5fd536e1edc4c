//! Build cache for incremental rebuilds.
//!
//! Memoizes expensive per-document results across builds. Entries are keyed
//! by `(namespace, identity)` and guarded by a [`Fingerprint`]: a lookup only
//! hits when the caller's fingerprint matches the stored one exactly, and a
//! write with a new fingerprint supersedes the old entry.
//!
//! The cache is never a source of build failures. A missing or unreadable
//! cache file loads as an empty cache, values that fail to decode are
//! treated as misses, and a failed persist only costs the next build time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bumped whenever the persisted layout changes. Files written with another
/// version are discarded on load.
const CACHE_VERSION: u32 = 2;

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("failed to write cache file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Fingerprints
// =============================================================================

/// Hex digest over every input that influences a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a single byte string.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Fingerprinter::new();
        hasher.bytes(bytes);
        hasher.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Incremental builder for [`Fingerprint`]s.
///
/// Every input is length-prefixed, so `("ab", "c")` and `("a", "bc")` hash
/// differently.
///
/// ```ignore
/// let mut hasher = Fingerprinter::new();
/// hasher.str(&doc.content).fingerprint(&config.fingerprint());
/// let fingerprint = hasher.finish();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    hasher: blake3::Hasher,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.bytes(s.as_bytes())
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.bytes(&[u8::from(value)])
    }

    /// Fold in the JSON encoding of `value`.
    ///
    /// Only deterministic encodings belong here: `serde_json::Value` and
    /// structs are fine, `HashMap`s are not.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => self.bytes(&encoded),
            // Unencodable input still has to change the digest.
            Err(e) => self.str(&format!("!unencodable: {e}")),
        }
    }

    /// Fold in another fingerprint (a dependency's, or the config's).
    pub fn fingerprint(&mut self, fingerprint: &Fingerprint) -> &mut Self {
        self.str(fingerprint.as_str())
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize().as_bytes()))
    }
}

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: Fingerprint,
    value: String,
    /// Milliseconds since the Unix epoch when the entry was written.
    stored_at: u64,
    /// Lifetime for externally fetched data. Transform results have none
    /// and live until superseded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.ttl_ms
            .is_some_and(|ttl| now >= self.stored_at.saturating_add(ttl))
    }
}

/// On-disk layout. BTreeMaps keep the file stable between runs.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    namespaces: BTreeMap<String, BTreeMap<String, CacheEntry>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// =============================================================================
// Build cache
// =============================================================================

/// Hit/miss/write counters for the current build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Persistent, namespaced memo store shared by every plugin.
///
/// Safe to read and write from many workers at once.
#[derive(Debug, Default)]
pub struct BuildCache {
    /// namespace -> identity -> entry
    namespaces: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl BuildCache {
    /// Create a new empty build cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache persisted by a previous build.
    ///
    /// Never fails: a missing, unreadable, corrupt or outdated file yields an
    /// empty cache and the build recomputes everything.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no build cache found, starting cold");
                return Self::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read build cache, starting cold");
                return Self::new();
            }
        };

        let file: CacheFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "build cache is corrupt, starting cold");
                return Self::new();
            }
        };

        if file.version != CACHE_VERSION {
            tracing::info!(
                found = file.version,
                expected = CACHE_VERSION,
                "build cache format changed, starting cold"
            );
            return Self::new();
        }

        let now = now_millis();
        let namespaces = file
            .namespaces
            .into_iter()
            .map(|(ns, entries)| {
                let entries = entries
                    .into_iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .collect();
                (ns, entries)
            })
            .collect();

        let cache = Self {
            namespaces: RwLock::new(namespaces),
            ..Self::default()
        };
        tracing::debug!(entries = cache.len(), "loaded build cache");
        cache
    }

    /// Write the cache to `path`, dropping expired entries.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so an interrupted write never leaves a truncated cache behind.
    pub fn persist(&self, path: &Path) -> Result<(), CacheError> {
        let now = now_millis();
        let namespaces = {
            let guard = self.namespaces.read();
            guard
                .iter()
                .map(|(ns, entries)| {
                    let entries: BTreeMap<_, _> = entries
                        .iter()
                        .filter(|(_, entry)| !entry.is_expired(now))
                        .map(|(id, entry)| (id.clone(), entry.clone()))
                        .collect();
                    (ns.clone(), entries)
                })
                .filter(|(_, entries)| !entries.is_empty())
                .collect()
        };

        let file = CacheFile {
            version: CACHE_VERSION,
            namespaces,
        };
        let encoded = serde_json::to_vec(&file)?;

        let io_err = |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, encoded).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Look up a cached value.
    ///
    /// Hits only when an entry exists for `(namespace, identity)`, its
    /// fingerprint equals `fingerprint`, and it has not expired.
    pub fn get(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: impl AsRef<str>,
    ) -> Option<String> {
        let found = {
            let guard = self.namespaces.read();
            guard
                .get(namespace)
                .and_then(|entries| entries.get(identity))
                .filter(|entry| {
                    entry.fingerprint.as_str() == fingerprint.as_ref()
                        && !entry.is_expired(now_millis())
                })
                .map(|entry| entry.value.clone())
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Look up and decode a value stored with [`BuildCache::set_json`].
    ///
    /// A value that no longer decodes as `T` counts as a miss.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: impl AsRef<str>,
    ) -> Option<T> {
        let raw = self.get(namespace, identity, fingerprint)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(namespace, identity, error = %e, "cached value no longer decodes");
                None
            }
        }
    }

    /// Store a value, superseding any entry for `(namespace, identity)`.
    pub fn set(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: impl Into<Fingerprint>,
        value: impl Into<String>,
    ) {
        self.insert(namespace, identity, fingerprint.into(), value.into(), None);
    }

    /// Store externally fetched data that goes stale after `ttl` even when
    /// the fingerprint still matches.
    pub fn set_with_ttl(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: impl Into<Fingerprint>,
        value: impl Into<String>,
        ttl: Duration,
    ) {
        self.insert(
            namespace,
            identity,
            fingerprint.into(),
            value.into(),
            // Round up so a sub-millisecond TTL does not expire on write
            Some(u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)),
        );
    }

    /// Encode `value` as JSON and store it. Encoding failures skip the write.
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: impl Into<Fingerprint>,
        value: &T,
    ) {
        match serde_json::to_string(value) {
            Ok(encoded) => self.set(namespace, identity, fingerprint, encoded),
            Err(e) => {
                tracing::debug!(namespace, identity, error = %e, "skipping cache write for unencodable value");
            }
        }
    }

    fn insert(
        &self,
        namespace: &str,
        identity: &str,
        fingerprint: Fingerprint,
        value: String,
        ttl_ms: Option<u64>,
    ) {
        let entry = CacheEntry {
            fingerprint,
            value,
            stored_at: now_millis(),
            ttl_ms,
        };
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(identity.to_string(), entry);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the entry for `(namespace, identity)`. Returns whether one existed.
    pub fn invalidate(&self, namespace: &str, identity: &str) -> bool {
        self.namespaces
            .write()
            .get_mut(namespace)
            .is_some_and(|entries| entries.remove(identity).is_some())
    }

    /// Drop every entry in a namespace. Returns how many were removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        self.namespaces
            .write()
            .remove(namespace)
            .map_or(0, |entries| entries.len())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = now_millis();
        let mut removed = 0;
        for entries in self.namespaces.write().values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            removed += before - entries.len();
        }
        removed
    }

    /// Total number of entries across all namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
