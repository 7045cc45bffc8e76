use std::sync::Arc;
use std::time::{Duration, SystemTime};
use xtpl::{
    CacheBackend, HandlerConfig, MemoryCache, RenderContext, ResourceLog, TemplateError,
    TemplateHandler,
};
use xtpl_testhelpers::{TemplateTree, setup};

const DIR: &str = "modules/page/tpl";

fn config(tree: &TemplateTree) -> HandlerConfig {
    HandlerConfig::with_root(tree.root().to_path_buf())
}

fn render(handler: &TemplateHandler, file: &str) -> String {
    handler
        .render(DIR, file, &mut RenderContext::new(), &mut ResourceLog::new())
        .unwrap()
}

/// Push a file's modification time into the future
fn touch_later(path: &camino::Utf8Path) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(3_600))
        .unwrap();
}

#[test]
fn backend_hit_after_first_compile() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "hello");
    let cache = Arc::new(MemoryCache::new());
    let handler = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(cache.clone());

    assert_eq!(render(&handler, "index.html"), "hello");
    assert_eq!(render(&handler, "index.html"), "hello");
    assert_eq!(handler.stats().compiled(), 1);
    assert_eq!(handler.stats().reused(), 1);
    assert_eq!(cache.len(), 1);

    // nothing lands on disk when the backend is usable
    assert!(!handler.cache_dir().exists());

    let key = handler.resolve(DIR, "index").unwrap().cache_key();
    assert!(cache.get(&key, SystemTime::UNIX_EPOCH).is_some());
}

#[test]
fn edited_sources_are_recompiled() {
    setup();
    let tree = TemplateTree::new();
    let path = tree.write("modules/page/tpl/index.html", "old");
    let handler = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(Arc::new(MemoryCache::new()));

    assert_eq!(render(&handler, "index.html"), "old");
    std::fs::write(&path, "new").unwrap();
    touch_later(&path);
    assert_eq!(render(&handler, "index.html"), "new");
    assert_eq!(handler.stats().compiled(), 2);
    assert_eq!(handler.stats().reused(), 0);
}

#[test]
fn one_program_is_kept_per_template() {
    setup();
    let tree = TemplateTree::new();
    let path = tree.write("modules/page/tpl/index.html", "v0");
    let handler = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(Arc::new(MemoryCache::new()));

    assert_eq!(render(&handler, "index.html"), "v0");
    for version in 1..=3 {
        std::fs::write(&path, format!("v{version}")).unwrap();
        touch_later(&path);
        assert_eq!(render(&handler, "index.html"), format!("v{version}"));
    }
    assert_eq!(handler.stats().compiled(), 4);
    assert_eq!(handler.retained_programs(), 1);

    tree.write("modules/page/tpl/other.html", "o");
    assert_eq!(render(&handler, "other.html"), "o");
    assert_eq!(handler.retained_programs(), 2);
}

#[test]
fn artifacts_that_do_not_parse_are_not_stored() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "{@ $x = ) }");
    let attempt = |handler: &TemplateHandler| {
        handler
            .render(DIR, "index.html", &mut RenderContext::new(), &mut ResourceLog::new())
            .unwrap_err()
    };

    let cache = Arc::new(MemoryCache::new());
    let handler = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(cache.clone());
    let err = attempt(&handler);
    assert!(matches!(err, TemplateError::Syntax(_)), "{err:?}");
    assert_eq!(cache.len(), 0);
    assert_eq!(handler.retained_programs(), 0);

    let on_disk = TemplateHandler::new(config(&tree)).unwrap();
    let err = attempt(&on_disk);
    assert!(matches!(err, TemplateError::Syntax(_)), "{err:?}");
    let compiled = on_disk
        .resolve(DIR, "index")
        .unwrap()
        .compiled_file(on_disk.cache_dir());
    assert!(!compiled.exists());
}

#[test]
fn newer_compiler_invalidates_entries() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "x");
    let cache = Arc::new(MemoryCache::new());

    let handler = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(cache.clone());
    render(&handler, "index.html");

    let upgraded = TemplateHandler::new(config(&tree))
        .unwrap()
        .with_cache(cache)
        .with_compiler_mtime(SystemTime::now() + Duration::from_secs(3_600));
    render(&upgraded, "index.html");
    assert_eq!(upgraded.stats().compiled(), 1);
    assert_eq!(upgraded.stats().reused(), 0);
}

#[test]
fn compiled_files_without_a_backend() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "<p>{$x}</p>");
    let handler = TemplateHandler::new(config(&tree)).unwrap();

    assert_eq!(render(&handler, "index.html"), "<p></p>");
    let unit = handler.resolve(DIR, "index.html").unwrap();
    let compiled = unit.compiled_file(handler.cache_dir());
    assert!(compiled.starts_with(tree.root().join("files/cache/template_compiled")));
    assert_eq!(
        std::fs::read_to_string(&compiled).unwrap(),
        "<?tpl if (!defined('__XTPL__')) exit; ?><p><?tpl echo $__ctx->x ?></p>"
    );

    assert_eq!(render(&handler, "index.html"), "<p></p>");
    assert_eq!(handler.stats().compiled(), 1);
    assert_eq!(handler.stats().reused(), 1);
}

#[test]
fn empty_compiled_files_do_not_count() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "body");
    let handler = TemplateHandler::new(config(&tree)).unwrap();
    render(&handler, "index.html");

    let compiled = handler
        .resolve(DIR, "index.html")
        .unwrap()
        .compiled_file(handler.cache_dir());
    std::fs::write(&compiled, "").unwrap();
    assert_eq!(render(&handler, "index.html"), "body");
    assert_eq!(handler.stats().compiled(), 2);
}

#[test]
fn stale_compiled_files_are_rewritten() {
    setup();
    let tree = TemplateTree::new();
    let path = tree.write("modules/page/tpl/index.html", "v1");
    let handler = TemplateHandler::new(config(&tree)).unwrap();
    assert_eq!(render(&handler, "index.html"), "v1");

    std::fs::write(&path, "v2").unwrap();
    touch_later(&path);
    assert_eq!(render(&handler, "index.html"), "v2");
    assert_eq!(handler.stats().compiled(), 2);
}

#[test]
fn cache_dir_can_be_absolute() {
    setup();
    let tree = TemplateTree::new();
    let elsewhere = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", "a");

    let mut config = config(&tree);
    config.cache_dir = elsewhere.root().join("compiled");
    let handler = TemplateHandler::new(config).unwrap();
    render(&handler, "index.html");
    assert!(handler.cache_dir().starts_with(elsewhere.root()));
    assert_eq!(std::fs::read_dir(handler.cache_dir()).unwrap().count(), 1);
}

#[test]
fn render_time_is_accumulated_for_root_renders() {
    setup();
    let tree = TemplateTree::new();
    tree.write("modules/page/tpl/index.html", r#"<include target="part.html" />"#);
    tree.write("modules/page/tpl/part.html", "p");
    let handler = TemplateHandler::new(config(&tree)).unwrap();
    assert_eq!(render(&handler, "index.html"), "p");
    // the include compiles too, but only the root render is timed
    assert_eq!(handler.stats().compiled(), 2);
    assert!(handler.stats().elapsed() > Duration::ZERO);
}
