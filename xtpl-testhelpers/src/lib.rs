//! Test helpers for xtpl: one-time tracing setup and temporary template trees.

#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

struct Uptime;

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let elapsed = START_TIME.elapsed();
        write!(w, "{:4}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
    }
}

/// The global subscriber, installed once per process.
///
/// `XTPL_LOG` takes a target list such as `xtpl=debug`; the default shows
/// everything.
static SUBSCRIBER_INIT: LazyLock<()> = LazyLock::new(|| {
    let _ = *START_TIME;

    let filter = std::env::var("XTPL_LOG")
        .ok()
        .and_then(|s| s.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(tracing::Level::TRACE));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_timer(Uptime)
                .with_target(false)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .with_test_writer()
                .compact(),
        )
        .with(filter)
        .try_init()
        .ok();
});

/// Set up tracing output for a test; safe to call from every test.
pub fn setup() {
    #[allow(clippy::let_unit_value)]
    let _ = *SUBSCRIBER_INIT;
}

/// An error type that panics when it's built (such as when you use `?`
/// to coerce to it)
#[derive(Debug)]
pub struct IPanic;

impl<E> From<E> for IPanic
where
    E: std::error::Error + Send + Sync,
{
    #[track_caller]
    fn from(value: E) -> Self {
        panic!("from: {}: {value}", std::panic::Location::caller())
    }
}

/// An application root in a temporary directory, removed on drop
pub struct TemplateTree {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl TemplateTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let root = Utf8Path::from_path(dir.path())
            .expect("temporary directory path is UTF-8")
            .canonicalize_utf8()
            .expect("canonicalize temporary directory");
        Self { _dir: dir, root }
    }

    /// Canonical application root
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Write `contents` to `rel` under the root, creating parent directories
    pub fn write(&self, rel: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create template directory");
        }
        std::fs::write(&path, contents).expect("write template");
        path
    }

    /// Create an empty directory under the root
    pub fn mkdir(&self, rel: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        std::fs::create_dir_all(&path).expect("create directory");
        path
    }
}

impl Default for TemplateTree {
    fn default() -> Self {
        Self::new()
    }
}
