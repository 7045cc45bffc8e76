//! The render-script runtime
//!
//! Compiled templates are text with `<?tpl ... ?>` code islands. This module
//! lexes and parses them into a [`Program`] and interprets it:
//!
//! - `lexer`: text and code-island tokens
//! - `parser`: statements and expressions
//! - `eval`: the interpreter, host hooks and function registry
//! - `value` / `context`: runtime values and the render context

mod ast;
mod builtins;
mod context;
mod eval;
mod lexer;
mod parser;
mod value;

pub use ast::{AssignOp, BinaryOp, Expr, Program, Stmt, SwitchArm, UnaryOp};
pub use context::{RenderContext, Session};
pub use eval::{CONTEXT_VAR, DEFAULT_MAX_ITERATIONS, FunctionRegistry, Host, HostFn, Interpreter};
pub use lexer::{CLOSE_TAG, OPEN_TAG};
pub use parser::parse_program;
pub use value::{Map, Number, Value};
