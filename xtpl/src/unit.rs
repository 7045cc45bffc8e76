//! Template identity: where a template lives and what it is cached under

use crate::config::HandlerConfig;
use crate::error::TemplateError;
use crate::paths::{PathResolver, canonicalize};
use camino::{Utf8Path, Utf8PathBuf};
use rapidhash::fast::RapidHasher;
use std::hash::Hasher;
use std::time::SystemTime;

/// Extension of compiled artifacts on disk
pub const COMPILED_SUFFIX: &str = ".compiled.tpl";

/// A resolved template, ready to be looked up, compiled and rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUnit {
    /// Canonical path of the source file
    pub path: Utf8PathBuf,
    /// Canonical directory of the source file
    pub dir: Utf8PathBuf,
    /// `dir` relative to the application root (`.` for the root itself)
    pub rel_dir: String,
    /// Browser-visible directory, ending in `/`
    pub web_path: String,
    /// Hash of the canonical path and the compiler version
    pub hash: u64,
}

impl TemplateUnit {
    /// Resolve `file` inside `dir`.
    ///
    /// When `file` does not exist but `file.<default extension>` does, the
    /// latter is used.
    pub fn resolve(
        config: &HandlerConfig,
        resolver: &PathResolver,
        dir: &Utf8Path,
        file: &str,
    ) -> Result<Self, TemplateError> {
        let mut candidate = dir.join(file);
        if !candidate.is_file() {
            let with_ext = dir.join(format!("{file}.{}", config.default_extension));
            if with_ext.is_file() {
                candidate = with_ext;
            }
        }
        let path = canonicalize(&candidate)
            .filter(|p| p.is_file())
            .ok_or(TemplateError::SourceNotFound { path: candidate })?;
        Ok(Self::from_canonical(config, resolver, path))
    }

    fn from_canonical(config: &HandlerConfig, resolver: &PathResolver, path: Utf8PathBuf) -> Self {
        let dir = path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| resolver.app_root().to_path_buf());
        let rel_dir = resolver.relative_to_root(&dir);
        let web_path = resolver.web_path(&config.web_root, &dir);
        let hash = identity_hash(&path, &config.version);
        Self {
            path,
            dir,
            rel_dir,
            web_path,
            hash,
        }
    }

    /// Key of this template in a [`CacheBackend`](crate::cache::CacheBackend)
    pub fn cache_key(&self) -> String {
        format!("template:{:016x}", self.hash)
    }

    /// The template directory as templates see it in `$tpl_path`
    pub fn tpl_path(&self) -> String {
        match self.rel_dir.as_str() {
            "." => "./".to_string(),
            rel if rel.starts_with('/') => format!("{rel}/"),
            rel => format!("./{rel}/"),
        }
    }

    /// Name of the compiled program, for error reports
    pub fn program_name(&self) -> String {
        format!("tpl_{:016x}", self.hash)
    }

    /// Where the compiled artifact goes when no cache backend is available
    pub fn compiled_file(&self, cache_dir: &Utf8Path) -> Utf8PathBuf {
        cache_dir.join(format!("{:016x}{COMPILED_SUFFIX}", self.hash))
    }

    pub fn source_mtime(&self) -> Result<SystemTime, TemplateError> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| TemplateError::io(&self.path, e))
    }
}

/// Hash of a canonical template path and a compiler version tag
pub fn identity_hash(path: &Utf8Path, version: &str) -> u64 {
    let mut hasher = RapidHasher::default();
    hasher.write(path.as_str().as_bytes());
    hasher.write(version.as_bytes());
    hasher.finish()
}

/// Hash of a compiled artifact's text
pub fn content_hash(code: &str) -> u64 {
    let mut hasher = RapidHasher::default();
    hasher.write(code.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, HandlerConfig, PathResolver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        fs::create_dir_all(root.join("skins/simple")).unwrap();
        fs::write(root.join("skins/simple/list.html"), "x").unwrap();
        let config = HandlerConfig::with_root(root.clone());
        (dir, config, PathResolver::new(root))
    }

    #[test]
    fn default_extension_is_appended() {
        let (_dir, config, resolver) = setup();
        let dir = resolver.app_root().join("skins/simple");
        let unit = TemplateUnit::resolve(&config, &resolver, &dir, "list").unwrap();
        assert_eq!(unit.path.file_name(), Some("list.html"));
        assert_eq!(unit.rel_dir, "skins/simple");
        assert_eq!(unit.web_path, "/skins/simple/");
        assert_eq!(unit.tpl_path(), "./skins/simple/");
    }

    #[test]
    fn missing_template() {
        let (_dir, config, resolver) = setup();
        let err = TemplateUnit::resolve(&config, &resolver, resolver.app_root(), "nope.html")
            .unwrap_err();
        assert!(matches!(err, TemplateError::SourceNotFound { .. }));
    }

    #[test]
    fn keys_are_stable_and_versioned() {
        let (_dir, config, resolver) = setup();
        let dir = resolver.app_root().join("skins/simple");
        let a = TemplateUnit::resolve(&config, &resolver, &dir, "list.html").unwrap();
        let b = TemplateUnit::resolve(&config, &resolver, &dir, "list").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("template:"));
        assert_eq!(a.cache_key().len(), "template:".len() + 16);

        let mut newer = config.clone();
        newer.version = "99.0.0".to_string();
        let c = TemplateUnit::resolve(&newer, &resolver, &dir, "list").unwrap();
        assert_ne!(a.hash, c.hash);
        assert!(
            a.compiled_file(Utf8Path::new("/cache"))
                .as_str()
                .ends_with(".compiled.tpl")
        );
    }
}
