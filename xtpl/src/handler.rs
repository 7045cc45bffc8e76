//! The template handler: resolve, look up or compile, then render
//!
//! One [`TemplateHandler`] serves every render of an application. It owns the
//! configuration, the cache backend, the parsed-program cache and the host
//! functions; nested `include`s go back through the same handler with a
//! deeper [`RenderFrame`].

use crate::cache::{CacheBackend, CachePayload, NoCache, fresh_compiled_file, write_compiled_file};
use crate::config::{DiagnosticPolicy, HandlerConfig};
use crate::error::{ScriptSource, TemplateError};
use crate::paths::{PathResolver, canonicalize};
use crate::pipeline::{Compiler, SourceFile};
use crate::resource::ResourceQueue;
use crate::script::{FunctionRegistry, Host, Interpreter, Program, RenderContext, parse_program};
use crate::unit::{TemplateUnit, content_hash};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

/// Counters for compiles, cache reuse and time spent in root renders
#[derive(Debug, Default)]
pub struct RenderStats {
    /// Templates compiled from source (cache miss)
    pub compiled: AtomicUsize,
    /// Templates served from a cache entry or compiled file (cache hit)
    pub reused: AtomicUsize,
    elapsed_micros: AtomicU64,
}

impl RenderStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn compiled(&self) -> usize {
        self.compiled.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    /// Total wall time of root renders, nested includes included
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_micros.load(Ordering::Relaxed))
    }

    fn record_elapsed(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.elapsed_micros.fetch_add(micros, Ordering::Relaxed);
    }
}

/// Where a render sits in the include chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFrame {
    /// 0 for the outermost template
    pub depth: usize,
    pub is_root: bool,
}

impl RenderFrame {
    pub fn root() -> Self {
        Self {
            depth: 0,
            is_root: true,
        }
    }

    pub fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
            is_root: false,
        }
    }
}

pub struct TemplateHandler {
    config: HandlerConfig,
    compiler: Compiler,
    cache: Arc<dyn CacheBackend>,
    cache_dir: Utf8PathBuf,
    /// Parsed programs by template identity, with the hash of the text they came from
    programs: RwLock<HashMap<u64, (u64, Arc<Program>)>>,
    functions: FunctionRegistry,
    stats: Arc<RenderStats>,
    compiler_mtime: SystemTime,
}

impl std::fmt::Debug for TemplateHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateHandler")
            .field("config", &self.config)
            .field("cache_supported", &self.cache.supports())
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

impl TemplateHandler {
    /// A handler without a cache backend; compiled files go under `cache_dir`
    pub fn new(config: HandlerConfig) -> Result<Self, TemplateError> {
        config.validate()?;
        let app_root = canonicalize(&config.app_root).ok_or_else(|| {
            TemplateError::Config(format!("application root `{}` does not exist", config.app_root))
        })?;
        let cache_dir = config.cache_path(&app_root);
        let compiler = Compiler::new(
            PathResolver::new(app_root),
            config.ruleset_dir.clone(),
            config.entry_constant.clone(),
        );
        Ok(Self {
            config,
            compiler,
            cache: Arc::new(NoCache),
            cache_dir,
            programs: RwLock::new(HashMap::new()),
            functions: FunctionRegistry::new(),
            stats: RenderStats::new(),
            compiler_mtime: executable_mtime(),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Entries older than this are stale even when the template is unchanged
    pub fn with_compiler_mtime(mut self, mtime: SystemTime) -> Self {
        self.compiler_mtime = mtime;
        self
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RenderStats> {
        &self.stats
    }

    /// The canonical application root
    pub fn app_root(&self) -> &Utf8Path {
        self.compiler.resolver().app_root()
    }

    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Resolve `file` in `dir`; a relative `dir` is taken from the application root
    pub fn resolve(&self, dir: impl AsRef<Utf8Path>, file: &str) -> Result<TemplateUnit, TemplateError> {
        let dir = self.app_root().join(dir.as_ref());
        TemplateUnit::resolve(&self.config, self.compiler.resolver(), &dir, file)
    }

    /// Render a template.
    ///
    /// A missing template renders as an `Err : '<path>' template file does
    /// not exist.` message instead of failing.
    pub fn compile(
        &self,
        dir: impl AsRef<Utf8Path>,
        file: &str,
        ctx: &mut RenderContext,
        queue: &mut dyn ResourceQueue,
    ) -> Result<String, TemplateError> {
        match self.render(dir, file, ctx, queue) {
            Err(TemplateError::SourceNotFound { path }) => {
                Ok(format!("Err : '{path}' template file does not exist."))
            }
            other => other,
        }
    }

    /// Render a template; every failure is an error
    pub fn render(
        &self,
        dir: impl AsRef<Utf8Path>,
        file: &str,
        ctx: &mut RenderContext,
        queue: &mut dyn ResourceQueue,
    ) -> Result<String, TemplateError> {
        let unit = self.resolve(dir, file)?;
        self.render_unit(&unit, ctx, queue, RenderFrame::root())
    }

    /// Compile a template without caching or rendering it
    pub fn compile_direct(&self, dir: impl AsRef<Utf8Path>, file: &str) -> Result<String, TemplateError> {
        let unit = self.resolve(dir, file)?;
        self.compile_unit(&unit)
    }

    pub fn render_unit(
        &self,
        unit: &TemplateUnit,
        ctx: &mut RenderContext,
        queue: &mut dyn ResourceQueue,
        frame: RenderFrame,
    ) -> Result<String, TemplateError> {
        let started = Instant::now();
        let program = self.load_program(unit)?;

        let parent_tpl_path = ctx.get("tpl_path").cloned();
        ctx.set("tpl_path", unit.tpl_path());
        let logged_info = ctx
            .session()
            .filter(|s| s.is_logged)
            .map(|s| s.logged_info.clone());
        if let Some(logged_info) = logged_info {
            ctx.set("logged_info", logged_info);
        }
        if !ctx.is_defined(&self.config.entry_constant) {
            ctx.define(self.config.entry_constant.clone(), true);
        }

        let mut host = NestedHost {
            handler: self,
            queue,
            frame,
        };
        let result = Interpreter::new(ctx, &mut host, &self.functions)
            .with_iteration_limit(self.config.max_loop_iterations)
            .run(&program);

        if !frame.is_root {
            match parent_tpl_path {
                Some(parent) => ctx.set("tpl_path", parent),
                None => {
                    ctx.remove("tpl_path");
                }
            }
        }
        if frame.is_root {
            self.stats.record_elapsed(started.elapsed());
        }
        tracing::debug!(path = %unit.path, depth = frame.depth, elapsed = ?started.elapsed(), "rendered");
        result
    }

    /// The parsed program for `unit`, from the cache when it is fresh.
    ///
    /// Freshly compiled code is parsed before it is stored, so an artifact
    /// that does not parse never reaches the cache.
    fn load_program(&self, unit: &TemplateUnit) -> Result<Arc<Program>, TemplateError> {
        let latest = unit.source_mtime()?.max(self.compiler_mtime);

        if self.cache.supports() {
            let key = unit.cache_key();
            let cached = match self.cache.get(&key, latest) {
                Some(CachePayload::Code(code)) => Some(code),
                Some(CachePayload::File(path)) => std::fs::read_to_string(&path).ok(),
                None => None,
            };
            if let Some(code) = cached {
                tracing::debug!(%key, "cache hit");
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                return self.program(unit, code);
            }
            tracing::debug!(%key, "cache miss");
            let code = self.compile_unit(unit)?;
            let program = self.program(unit, code.clone())?;
            self.cache.put(&key, CachePayload::Code(code));
            return Ok(program);
        }

        let compiled_file = unit.compiled_file(&self.cache_dir);
        let cached = fresh_compiled_file(&compiled_file, latest)
            .then(|| std::fs::read_to_string(&compiled_file).ok())
            .flatten();
        if let Some(code) = cached {
            tracing::debug!(path = %compiled_file, "compiled file hit");
            self.stats.reused.fetch_add(1, Ordering::Relaxed);
            return self.program(unit, code);
        }
        let code = self.compile_unit(unit)?;
        let program = self.program(unit, code.clone())?;
        if let Err(e) = write_compiled_file(&compiled_file, &code) {
            tracing::warn!(path = %compiled_file, error = %e, "could not write compiled file");
        }
        Ok(program)
    }

    /// Parse `code`, or reuse the program already parsed from the same text.
    ///
    /// One program is kept per template; a changed artifact replaces it.
    fn program(&self, unit: &TemplateUnit, code: String) -> Result<Arc<Program>, TemplateError> {
        let hash = content_hash(&code);
        if let Some((cached_hash, program)) = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&unit.hash)
            && *cached_hash == hash
        {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(parse_program(&ScriptSource::new(unit.program_name(), code))?);
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit.hash, (hash, Arc::clone(&program)));
        Ok(program)
    }

    /// Number of parsed programs held in memory
    pub fn retained_programs(&self) -> usize {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run the compilation pipeline on `unit` and apply the diagnostic policy
    fn compile_unit(&self, unit: &TemplateUnit) -> Result<String, TemplateError> {
        let source = std::fs::read_to_string(&unit.path).map_err(|e| TemplateError::io(&unit.path, e))?;
        let compilation = self.compiler.compile(
            SourceFile {
                path: &unit.path,
                web_path: &unit.web_path,
            },
            &source,
        );
        self.stats.compiled.fetch_add(1, Ordering::Relaxed);

        if !compilation.is_clean() {
            match self.config.policy {
                DiagnosticPolicy::Strict => {
                    return Err(TemplateError::Compile {
                        file: unit.path.clone(),
                        diagnostics: compilation.diagnostics,
                    });
                }
                DiagnosticPolicy::Lenient => {
                    for diag in &compilation.diagnostics {
                        tracing::warn!(
                            file = %diag.file,
                            offset = diag.offset,
                            stage = %diag.stage,
                            "{}: skipped `{}`",
                            diag.kind,
                            diag.text
                        );
                    }
                }
            }
        }
        tracing::info!(path = %unit.path, bytes = compilation.code.len(), "compiled template");
        Ok(compilation.code)
    }
}

/// The host a program runs against: includes recurse into the handler
struct NestedHost<'h, 'q> {
    handler: &'h TemplateHandler,
    queue: &'q mut dyn ResourceQueue,
    frame: RenderFrame,
}

impl Host for NestedHost<'_, '_> {
    fn include(
        &mut self,
        ctx: &mut RenderContext,
        dir: &str,
        file: &str,
    ) -> Result<String, TemplateError> {
        let frame = self.frame.nested();
        if frame.depth > self.handler.config.max_include_depth {
            return Err(TemplateError::IncludeDepthExceeded {
                depth: frame.depth,
                path: Utf8PathBuf::from(dir).join(file),
            });
        }
        let unit = match self.handler.resolve(dir, file) {
            Ok(unit) => unit,
            Err(TemplateError::SourceNotFound { path }) => {
                tracing::warn!(%path, "included template does not exist");
                return Ok(String::new());
            }
            Err(e) => return Err(e),
        };
        self.handler.render_unit(&unit, ctx, &mut *self.queue, frame)
    }

    fn resources(&mut self) -> &mut dyn ResourceQueue {
        &mut *self.queue
    }
}

/// Modification time of the running executable; compiled output from an
/// older build is stale
fn executable_mtime() -> SystemTime {
    std::env::current_exe()
        .and_then(std::fs::metadata)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
