//! Path resolution: directive paths, web paths and asset `src` rewriting

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;

/// `<img|input|script ... src="...">`
static ASSET_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(<(?:img|input|script)\b[^>]*?\ssrc=")([^"]+)(")"#).unwrap()
});

/// A path segment followed by `/../`
static PARENT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^/]+/\.\./").unwrap());

/// Canonicalize into a UTF-8 path; `None` when the path does not exist
pub fn canonicalize(path: &Utf8Path) -> Option<Utf8PathBuf> {
    path.canonicalize_utf8().ok()
}

/// Resolves directive paths relative to the template that declares them
#[derive(Debug, Clone)]
pub struct PathResolver {
    app_root: Utf8PathBuf,
}

impl PathResolver {
    /// `app_root` must already be canonical
    pub fn new(app_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
        }
    }

    pub fn app_root(&self) -> &Utf8Path {
        &self.app_root
    }

    /// Resolve `declared` (a directory) against the directory of `template`.
    ///
    /// The result is relative to the application root, `/`-separated, without
    /// `./`; `.` means the root itself. Returns `None` when nothing on disk
    /// matches.
    pub fn resolve_dir(&self, declared: &str, template: &Utf8Path) -> Option<String> {
        let template_dir = template.parent()?;
        let declared = declared.trim();

        let resolved = if declared.is_empty() || declared == "." {
            Some(template_dir.to_path_buf())
        } else if let Some(rooted) = declared.strip_prefix('/') {
            canonicalize(&self.app_root.join(rooted))
                .or_else(|| canonicalize(Utf8Path::new(declared)))
        } else {
            canonicalize(&template_dir.join(declared))
                .or_else(|| self.resolve_overlapping(declared, template_dir))
        }?;

        Some(self.relative_to_root(&resolved))
    }

    /// Fallback for paths written relative to an ancestor of the template
    /// directory: `skins/default/img` from inside `.../skins/default/` finds
    /// the shared `skins/default` run and resolves only the remainder.
    fn resolve_overlapping(&self, declared: &str, template_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        let declared_segments: Vec<&str> = declared
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        let first = declared_segments.first()?;
        let dir = template_dir.as_str();
        let dir_segments: Vec<&str> = dir.split('/').collect();
        let idx = dir_segments.iter().position(|s| s == first)?;

        let mut overlap = 0;
        while overlap < declared_segments.len()
            && idx + overlap < dir_segments.len()
            && dir_segments[idx + overlap] == declared_segments[overlap]
        {
            overlap += 1;
        }
        let remainder = declared_segments[overlap..].join("/");
        canonicalize(&template_dir.join(remainder))
    }

    /// Strip the application root; paths outside it stay absolute
    pub fn relative_to_root(&self, path: &Utf8Path) -> String {
        let rel = match path.strip_prefix(&self.app_root) {
            Ok(rel) => rel.as_str().replace('\\', "/"),
            Err(_) => return path.as_str().replace('\\', "/"),
        };
        let rel = rel.replace("./", "");
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            ".".to_string()
        } else {
            rel.to_string()
        }
    }

    /// Browser-visible directory of a template: web root + relative dir + `/`
    pub fn web_path(&self, web_root: &str, template_dir: &Utf8Path) -> String {
        let rel = self.relative_to_root(template_dir);
        let base = web_root.trim_end_matches('/');
        if rel == "." {
            format!("{base}/")
        } else {
            format!("{base}/{rel}/")
        }
    }
}

/// Rewrite relative `src` attributes of img/input/script tags against `web_path`.
///
/// Absolute URLs, root-relative paths and values starting with `{` are left alone.
pub fn rewrite_asset_sources(buf: &str, web_path: &str) -> String {
    ASSET_SRC
        .replace_all(buf, |caps: &regex::Captures<'_>| {
            let src = caps[2].trim();
            let lower = src.to_ascii_lowercase();
            let untouched = lower.starts_with("http://")
                || lower.starts_with("https://")
                || src.starts_with('/')
                || src.starts_with('{');
            let value = if untouched {
                caps[2].to_string()
            } else {
                normalize_asset_src(web_path, src)
            };
            format!("{}{}{}", &caps[1], value, &caps[3])
        })
        .into_owned()
}

/// Join `src` onto `web_path` and clean up the result
pub fn normalize_asset_src(web_path: &str, src: &str) -> String {
    let mut src = src;
    while let Some(rest) = src.strip_prefix("./") {
        src = rest;
    }
    let mut path = format!("{web_path}{src}").replace("/./", "/");
    path = collapse_repeated_segments(&path);
    loop {
        let next = PARENT_SEGMENT.replace_all(&path, "").into_owned();
        if next == path {
            return path;
        }
        path = next;
    }
}

/// Collapse a directory run repeated back to back: `a/b/a/b/x` becomes `a/b/x`.
///
/// Legacy templates wrote asset paths relative to their skin directory, so
/// joining them onto the web path could double the skin run.
pub fn collapse_repeated_segments(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').collect();
    // the last piece is a file name (or empty after a trailing slash)
    let dir_count = |segments: &Vec<&str>| segments.len().saturating_sub(1);
    let is_word = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    };

    let mut i = 0;
    while i < dir_count(&segments) {
        let mut collapsed = false;
        let max_run = (dir_count(&segments) - i) / 2;
        for run in (1..=max_run).rev() {
            let first = &segments[i..i + run];
            let second = &segments[i + run..i + 2 * run];
            if first.iter().all(|&s| is_word(s)) && first == second {
                segments.drain(i + run..i + 2 * run);
                collapsed = true;
                break;
            }
        }
        if !collapsed {
            i += 1;
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> (tempfile::TempDir, PathResolver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().canonicalize_utf8().unwrap();
        fs::create_dir_all(root.join("modules/board/skins/default/img")).unwrap();
        fs::create_dir_all(root.join("common/tpl")).unwrap();
        fs::write(root.join("modules/board/skins/default/list.html"), "").unwrap();
        (dir, PathResolver::new(root))
    }

    #[test]
    fn resolves_relative_to_template() {
        let (_dir, resolver) = tree();
        let tpl = resolver.app_root().join("modules/board/skins/default/list.html");
        assert_eq!(resolver.resolve_dir("img", &tpl).as_deref(), Some("modules/board/skins/default/img"));
        assert_eq!(resolver.resolve_dir(".", &tpl).as_deref(), Some("modules/board/skins/default"));
        assert_eq!(resolver.resolve_dir("../../../../common/tpl", &tpl).as_deref(), Some("common/tpl"));
        assert_eq!(resolver.resolve_dir("/common/tpl", &tpl).as_deref(), Some("common/tpl"));
    }

    #[test]
    fn resolves_overlapping_segments() {
        let (_dir, resolver) = tree();
        let tpl = resolver.app_root().join("modules/board/skins/default/list.html");
        assert_eq!(
            resolver.resolve_dir("skins/default/img", &tpl).as_deref(),
            Some("modules/board/skins/default/img")
        );
    }

    #[test]
    fn unresolvable_paths() {
        let (_dir, resolver) = tree();
        let tpl = resolver.app_root().join("modules/board/skins/default/list.html");
        assert_eq!(resolver.resolve_dir("nowhere/at/all", &tpl), None);
    }

    #[test]
    fn web_paths() {
        let (_dir, resolver) = tree();
        let dir = resolver.app_root().join("modules/board/skins/default");
        assert_eq!(resolver.web_path("", &dir), "/modules/board/skins/default/");
        assert_eq!(resolver.web_path("/xe/", &dir), "/xe/modules/board/skins/default/");
        assert_eq!(resolver.web_path("", resolver.app_root()), "/");
    }

    #[test]
    fn asset_src_rewriting() {
        let buf = r#"<img src="./img/a.png"><img alt="" src="http://x/b.png"><script src="{$x}"></script><img src="/abs.png">"#;
        assert_eq!(
            rewrite_asset_sources(buf, "/modules/m/skins/s/"),
            r#"<img src="/modules/m/skins/s/img/a.png"><img alt="" src="http://x/b.png"><script src="{$x}"></script><img src="/abs.png">"#
        );
    }

    #[test]
    fn asset_src_normalization() {
        assert_eq!(normalize_asset_src("/m/s/", "../img/a.png"), "/m/img/a.png");
        assert_eq!(normalize_asset_src("/m/s/", "./././x.js"), "/m/s/x.js");
        assert_eq!(normalize_asset_src("/m/s/", "s/x.js"), "/m/s/x.js");
    }

    #[test]
    fn repeated_runs_collapse() {
        assert_eq!(collapse_repeated_segments("/a/b/a/b/x.png"), "/a/b/x.png");
        assert_eq!(collapse_repeated_segments("/a/a/a/x"), "/a/x");
        assert_eq!(collapse_repeated_segments("/a/b/c/x"), "/a/b/c/x");
        // file names never take part
        assert_eq!(collapse_repeated_segments("/a/a"), "/a/a");
    }
}
