//! Compiled-template caching
//!
//! A pluggable [`CacheBackend`] holds compiled artifacts keyed by template
//! identity. When the backend reports itself unsupported, compiled artifacts
//! go to files under the cache directory instead. Either way an entry only
//! counts when it is at least as new as both the template source and the
//! compiler.

use crate::error::TemplateError;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

/// What a cache lookup yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePayload {
    /// Compiled render script
    Code(String),
    /// A compiled artifact persisted on disk
    File(Utf8PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: CachePayload,
    /// When the entry was stored
    pub stored_at: SystemTime,
}

impl CacheEntry {
    /// Usable for a template whose inputs last changed at `min_freshness`
    pub fn is_fresh(&self, min_freshness: SystemTime) -> bool {
        self.stored_at >= min_freshness
    }
}

/// An external key/value store for compiled templates.
///
/// Writes may race; the last writer wins.
pub trait CacheBackend: Send + Sync {
    /// Whether this backend can be used at all
    fn supports(&self) -> bool;

    /// The payload under `key`, if it was stored at or after `min_freshness`
    fn get(&self, key: &str, min_freshness: SystemTime) -> Option<CachePayload>;

    fn put(&self, key: &str, payload: CachePayload);
}

/// An in-process backend
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entry with an explicit timestamp
    pub fn insert(&self, key: impl Into<String>, entry: CacheEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn supports(&self) -> bool {
        true
    }

    fn get(&self, key: &str, min_freshness: SystemTime) -> Option<CachePayload> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        if entry.is_fresh(min_freshness) {
            Some(entry.payload.clone())
        } else {
            tracing::debug!(key, "stale cache entry");
            None
        }
    }

    fn put(&self, key: &str, payload: CachePayload) {
        self.insert(
            key,
            CacheEntry {
                payload,
                stored_at: SystemTime::now(),
            },
        );
    }
}

/// A backend that is never available; compiled files are used instead
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheBackend for NoCache {
    fn supports(&self) -> bool {
        false
    }

    fn get(&self, _key: &str, _min_freshness: SystemTime) -> Option<CachePayload> {
        None
    }

    fn put(&self, _key: &str, _payload: CachePayload) {}
}

/// A compiled file counts when it is readable, non-empty and fresh
pub fn fresh_compiled_file(path: &Utf8Path, min_freshness: SystemTime) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let fresh = meta.modified().is_ok_and(|mtime| mtime >= min_freshness);
    meta.is_file() && meta.len() > 0 && fresh
}

/// Write a compiled artifact through a temporary file and an atomic rename
pub fn write_compiled_file(path: &Utf8Path, code: &str) -> Result<(), TemplateError> {
    let dir = path
        .parent()
        .ok_or_else(|| TemplateError::Config(format!("`{path}` has no parent directory")))?;
    std::fs::create_dir_all(dir).map_err(|e| TemplateError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| TemplateError::io(dir, e))?;
    tmp.write_all(code.as_bytes())
        .map_err(|e| TemplateError::io(dir, e))?;
    tmp.persist(path)
        .map_err(|e| TemplateError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn freshness_boundary() {
        let cache = MemoryCache::new();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        cache.insert(
            "k",
            CacheEntry {
                payload: CachePayload::Code("code".to_string()),
                stored_at: t,
            },
        );
        assert_eq!(cache.get("k", t), Some(CachePayload::Code("code".to_string())));
        assert_eq!(
            cache.get("k", t - Duration::from_secs(1)),
            Some(CachePayload::Code("code".to_string()))
        );
        assert_eq!(cache.get("k", t + Duration::from_secs(1)), None);
        assert_eq!(cache.get("other", t), None);
    }

    #[test]
    fn put_overwrites() {
        let cache = MemoryCache::new();
        cache.put("k", CachePayload::Code("a".to_string()));
        cache.put("k", CachePayload::Code("b".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("k", SystemTime::UNIX_EPOCH),
            Some(CachePayload::Code("b".to_string()))
        );
    }

    #[test]
    fn no_cache_is_unsupported() {
        assert!(!NoCache.supports());
        NoCache.put("k", CachePayload::Code("x".to_string()));
        assert_eq!(NoCache.get("k", SystemTime::UNIX_EPOCH), None);
    }

    #[test]
    fn compiled_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let path = root.join("nested/abc.compiled.tpl");
        assert!(!fresh_compiled_file(&path, SystemTime::UNIX_EPOCH));

        write_compiled_file(&path, "<?tpl echo 1 ?>").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<?tpl echo 1 ?>");
        assert!(fresh_compiled_file(&path, SystemTime::UNIX_EPOCH));
        let future = SystemTime::now() + Duration::from_secs(3_600);
        assert!(!fresh_compiled_file(&path, future));

        write_compiled_file(&path, "").unwrap();
        assert!(!fresh_compiled_file(&path, SystemTime::UNIX_EPOCH));
    }
}
