//! Error types for compilation, caching and rendering
//!
//! Errors carry structured information, not just text:
//! - compile diagnostics name the file, the byte offset and the offending text
//! - render-script syntax errors point into the compiled artifact
//! - everything renders through miette

use camino::Utf8PathBuf;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A compiled artifact, kept around for error reporting
#[derive(Debug, Clone)]
pub struct ScriptSource {
    /// Name of the compiled unit (usually `tpl_<cache key>`)
    pub name: String,
    /// The full render-script text
    pub source: Arc<String>,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Arc::new(source.into()),
        }
    }

    /// Create a NamedSource for miette
    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, (*self.source).clone())
    }
}

/// All errors surfaced by the template handler
#[derive(Error, Debug, Diagnostic)]
pub enum TemplateError {
    #[error("template file `{path}` does not exist")]
    #[diagnostic(
        code(xtpl::source_not_found),
        help("check the template directory and file name")
    )]
    SourceNotFound { path: Utf8PathBuf },

    #[error("failed to compile `{file}` ({} diagnostic(s))", .diagnostics.len())]
    #[diagnostic(code(xtpl::compile))]
    Compile {
        file: Utf8PathBuf,
        #[related]
        diagnostics: Vec<CompileDiagnostic>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("include depth {depth} exceeded while rendering `{path}`")]
    #[diagnostic(
        code(xtpl::include_depth),
        help("templates probably include each other in a cycle")
    )]
    IncludeDepthExceeded { depth: usize, path: Utf8PathBuf },

    #[error("I/O error on `{path}`")]
    #[diagnostic(code(xtpl::io))]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(xtpl::config))]
    Config(String),
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        TemplateError::Io {
            path: path.into(),
            source,
        }
    }
}

/// What went wrong with a construct found during compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A directive was recognized but lacks a required attribute
    MalformedDirective,
    /// A `<!--@keyword-->` with a keyword outside the recognized set
    UnknownDirective,
    /// A `loop="..."` expression matching none of the three loop shapes
    MalformedLoop,
    /// A loop/cond tag whose closing tag never shows up
    UnbalancedTag,
    /// A directive path that cannot be resolved on disk
    UnresolvedPath,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::MalformedDirective => "malformed directive",
            DiagnosticKind::UnknownDirective => "unknown directive",
            DiagnosticKind::MalformedLoop => "malformed loop expression",
            DiagnosticKind::UnbalancedTag => "unbalanced tag",
            DiagnosticKind::UnresolvedPath => "unresolved path",
        };
        f.write_str(s)
    }
}

/// The compilation stage a diagnostic was raised in.
///
/// Offsets point into the original template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TagScope,
    Directives,
    Forms,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::TagScope => "tag-scope",
            Stage::Directives => "directives",
            Stage::Forms => "forms",
        };
        f.write_str(s)
    }
}

/// A structured compile diagnostic
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{kind} in `{file}` at byte {offset} ({stage} stage): `{text}`")]
#[diagnostic(code(xtpl::compile::diagnostic))]
pub struct CompileDiagnostic {
    pub kind: DiagnosticKind,
    pub stage: Stage,
    pub file: Utf8PathBuf,
    pub offset: usize,
    /// The offending source text
    pub text: String,
    #[help]
    pub help: Option<String>,
}

/// Syntax error while parsing a compiled artifact
#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected {found}")]
#[diagnostic(code(xtpl::script::syntax), help("Expected {expected}"))]
pub struct SyntaxError {
    /// What we found
    pub found: String,
    /// What we expected
    pub expected: String,
    /// Location in the compiled artifact
    #[label("here")]
    pub span: SourceSpan,
    /// The compiled artifact
    #[source_code]
    pub src: NamedSource<String>,
}

/// Errors raised while executing a compiled program
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    #[error("Unknown function `{name}`")]
    #[diagnostic(
        code(xtpl::runtime::unknown_function),
        help("register it with `FunctionRegistry::register`")
    )]
    UnknownFunction { name: String },

    #[error("`{name}` expects {expected}")]
    #[diagnostic(code(xtpl::runtime::arguments))]
    BadArguments { name: String, expected: String },

    #[error("Cannot assign to {target}")]
    #[diagnostic(code(xtpl::runtime::assignment))]
    InvalidAssignment { target: String },

    #[error("Cannot use `[]` for reading")]
    #[diagnostic(code(xtpl::runtime::append_read))]
    AppendRead,

    #[error("Division by zero")]
    #[diagnostic(code(xtpl::runtime::division_by_zero))]
    DivisionByZero,

    #[error("Loop exceeded {limit} iterations")]
    #[diagnostic(
        code(xtpl::runtime::iteration_limit),
        help("raise `max_loop_iterations` if the loop is legitimate")
    )]
    IterationLimit { limit: usize },

    #[error("{0}")]
    #[diagnostic(code(xtpl::runtime::host))]
    Host(String),
}
