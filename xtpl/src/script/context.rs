//! The render context: host data a compiled template reads and writes
//!
//! Everything a template addresses as `$name` lives in [`RenderContext::vars`];
//! compiled code reaches it through the `$__ctx` root.

use super::value::{Map, Value};
use indexmap::IndexMap;

/// Session facts the handler exposes to templates
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub is_logged: bool,
    /// Published to templates as `$logged_info`
    pub logged_info: Value,
}

/// Variables, constants and request facts for one render
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    vars: Map,
    constants: IndexMap<String, Value>,
    request_uri: String,
    session: Option<Session>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object; each top-level key becomes a variable
    pub fn from_json(json: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let Value::Map(vars) = Value::from(json) {
            ctx.vars = vars;
        }
        ctx
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    /// Slot for `name`, created as null when missing
    pub(crate) fn slot(&mut self, name: &str) -> &mut Value {
        self.vars.entry(name.to_string()).or_default()
    }

    pub fn vars(&self) -> &Map {
        &self.vars
    }

    /// Define a constant; `defined(name)` is true afterwards
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.constants.insert(name.into(), value.into());
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn set_request_uri(&mut self, uri: impl Into<String>) {
        self.request_uri = uri.into();
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_becomes_variables() {
        let ctx = RenderContext::from_json(serde_json::json!({"title": "hi", "n": 2}));
        assert_eq!(ctx.get("title"), Some(&Value::from("hi")));
        assert_eq!(ctx.get("n"), Some(&Value::Int(2)));
        assert_eq!(ctx.vars().len(), 2);
    }

    #[test]
    fn non_object_json_gives_empty_context() {
        let ctx = RenderContext::from_json(serde_json::json!([1, 2]));
        assert!(ctx.vars().is_empty());
    }

    #[test]
    fn constants() {
        let mut ctx = RenderContext::new();
        assert!(!ctx.is_defined("__XTPL__"));
        ctx.define("__XTPL__", true);
        assert!(ctx.is_defined("__XTPL__"));
    }
}
