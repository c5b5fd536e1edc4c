//! Typed key/value store for data exchanged between unrelated plugins.
//!
//! Plugins that need configuration of their own should take a typed struct
//! at construction. This store is only for cross-cutting values that one
//! plugin produces and another consumes (a site URL discovered during
//! Configure and read by a feed plugin, say). Every key is declared once as a
//! [`ConfigKey`] constant so producers and consumers agree on the name and
//! the value type.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::ConfigError;

/// A named, typed slot in the [`ConfigStore`].
pub struct ConfigKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> ConfigKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ConfigKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ConfigKey<T> {}

impl<T> fmt::Debug for ConfigKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfigKey").field(&self.name).finish()
    }
}

/// Keys the core documents as a contract between plugins.
pub mod keys {
    use super::ConfigKey;

    /// Absolute base URL of the published site, without a trailing slash.
    pub const SITE_URL: ConfigKey<String> = ConfigKey::new("site.url");

    /// Human-readable site title.
    pub const SITE_TITLE: ConfigKey<String> = ConfigKey::new("site.title");
}

/// Values stored under [`ConfigKey`]s.
///
/// The core never validates what plugins put here beyond the type check on
/// read.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: BTreeMap<&'static str, serde_json::Value>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is unset and an error when the stored
    /// value does not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Result<Option<T>, ConfigError> {
        match self.values.get(key.name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ConfigError::ValueType {
                    key: key.name,
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value).map_err(|source| ConfigError::ValueType {
            key: key.name,
            source,
        })?;
        self.values.insert(key.name, value);
        Ok(())
    }

    pub fn contains<T>(&self, key: &ConfigKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    pub fn remove<T>(&mut self, key: &ConfigKey<T>) -> bool {
        self.values.remove(key.name).is_some()
    }

    /// Names of all keys currently set, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHORS: ConfigKey<Vec<String>> = ConfigKey::new("test.authors");
    const WRONG: ConfigKey<u32> = ConfigKey::new("site.url");

    #[test]
    fn test_get_unset_key() {
        let store = ConfigStore::new();
        assert_eq!(store.get(&keys::SITE_URL).unwrap(), None);
        assert!(!store.contains(&keys::SITE_URL));
    }

    #[test]
    fn test_set_and_get() {
        let mut store = ConfigStore::new();
        store
            .set(&keys::SITE_URL, "https://example.com".to_string())
            .unwrap();
        store
            .set(&AUTHORS, vec!["ana".to_string(), "bo".to_string()])
            .unwrap();

        assert_eq!(
            store.get(&keys::SITE_URL).unwrap().as_deref(),
            Some("https://example.com")
        );
        assert_eq!(store.get(&AUTHORS).unwrap().unwrap().len(), 2);
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["site.url", "test.authors"]);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mut store = ConfigStore::new();
        store
            .set(&keys::SITE_URL, "https://example.com".to_string())
            .unwrap();

        let err = store.get(&WRONG).unwrap_err();
        assert!(matches!(err, ConfigError::ValueType { key: "site.url", .. }));
    }

    #[test]
    fn test_remove() {
        let mut store = ConfigStore::new();
        store.set(&keys::SITE_TITLE, "Notes".to_string()).unwrap();
        assert!(store.remove(&keys::SITE_TITLE));
        assert!(!store.remove(&keys::SITE_TITLE));
    }
}
