//! `xtpl` compiles HTML templates into a small render script, caches the
//! result and renders it against a context.
//!
//! # Syntax Overview
//!
//! ```text
//! {$title}                          - echo a context variable
//! {@ $n = count($list) }            - run code without output
//! <li loop="$list=>$key,$item">     - repeat the element (also `init;cond;step` and `VAR=EXPR`)
//! <p cond="$show">                  - keep the element only when the condition holds
//! <option selected="selected"|cond="$sel">  - conditional attribute
//! <!--@if($a)--> ... <!--@else--> ... <!--@end-->   - comment control flow
//! <include target="header.html" />  - render another template in place
//! <load target="css/board.css" media="all" />       - queue a stylesheet or script
//! <!--// dropped from the output -->
//! ```
//!
//! Every `<form>` gets hidden `act`/`mid`/`vid`/`error_return_url` fields
//! and its `ruleset` attribute turned into a hidden field.
//!
//! # Example
//!
//! ```no_run
//! use xtpl::{HandlerConfig, RenderContext, ResourceLog, TemplateHandler};
//!
//! let handler = TemplateHandler::new(HandlerConfig::with_root("/srv/app"))?;
//! let mut ctx = RenderContext::new();
//! ctx.set("title", "Hello");
//! let mut resources = ResourceLog::new();
//! let html = handler.compile("modules/page/tpl", "index", &mut ctx, &mut resources)?;
//! # Ok::<(), xtpl::TemplateError>(())
//! ```

mod attrs;
mod cache;
mod config;
mod directive;
mod error;
mod form;
mod handler;
mod paths;
mod pipeline;
mod resource;
mod rewrite;
pub mod script;
mod tag_scope;
mod unit;

pub use attrs::{AttrStyle, AttributeMap, parse_attributes};
pub use cache::{CacheBackend, CacheEntry, CachePayload, MemoryCache, NoCache};
pub use config::{DiagnosticPolicy, HandlerConfig};
pub use directive::{Directive, DirectiveMatch, ResourceDirective, scan_directives};
pub use error::{
    CompileDiagnostic, DiagnosticKind, RuntimeError, ScriptSource, Stage, SyntaxError,
    TemplateError,
};
pub use handler::{RenderFrame, RenderStats, TemplateHandler};
pub use paths::PathResolver;
pub use pipeline::{Compilation, Compiler, Diagnostics, SourceFile};
pub use resource::{ResourceEvent, ResourceKind, ResourceLog, ResourceQueue, ResourceRequest};
pub use rewrite::{quote_literal, rewrite_vars};
pub use script::{FunctionRegistry, RenderContext, Session, Value};
pub use unit::TemplateUnit;
