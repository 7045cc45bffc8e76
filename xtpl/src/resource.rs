//! The resource queue compiled templates talk to
//!
//! Directives like `<load target="x.css" />` compile into calls that hand a
//! [`ResourceRequest`] to whatever queue the host renders with. The queue is
//! an outer collaborator; [`ResourceLog`] just records what was asked for.

use crate::script::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Script,
    Stylesheet,
    Other,
}

impl ResourceKind {
    pub fn from_target(target: &str) -> Self {
        let ext = target
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "js" => ResourceKind::Script,
            "css" => ResourceKind::Stylesheet,
            _ => ResourceKind::Other,
        }
    }
}

/// A stylesheet or script queued by a `load`/`import` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub kind: ResourceKind,
    pub target: String,
    /// Script placement (`head`/`body`) for scripts, media query for stylesheets
    pub placement: String,
    pub target_ie: String,
    pub index: Option<i64>,
    pub use_cdn: bool,
    pub cdn_prefix: String,
    pub cdn_version: String,
}

impl ResourceRequest {
    /// Build a request from the map a compiled `load_file([...])` call passes
    pub fn from_map(map: &Map) -> Option<Self> {
        let text = |key: &str| map.get(key).map(Value::render_to_string).unwrap_or_default();
        let target = text("target");
        if target.is_empty() {
            return None;
        }
        let kind = ResourceKind::from_target(&target);
        let placement = match kind {
            ResourceKind::Stylesheet => text("media"),
            _ => text("type"),
        };
        let use_cdn = matches!(
            text("usecdn").to_ascii_lowercase().as_str(),
            "1" | "true" | "y" | "yes"
        );
        Some(Self {
            kind,
            placement,
            target_ie: text("targetie"),
            index: map
                .get("index")
                .and_then(Value::to_number)
                .map(|n| n.as_f64() as i64),
            use_cdn,
            cdn_prefix: text("cdnprefix"),
            cdn_version: text("cdnversion"),
            target,
        })
    }
}

/// Receiver for the side effects of resource directives
pub trait ResourceQueue {
    fn load_file(&mut self, request: ResourceRequest);
    fn unload_file(&mut self, target: &str, target_ie: &str, media: &str);
    fn load_js_plugin(&mut self, name: &str);
    fn load_lang(&mut self, dir: &str);
    fn compile_xml_filter(&mut self, dir: &str, file: &str);
    fn load_ruleset(&mut self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Load(ResourceRequest),
    Unload {
        target: String,
        target_ie: String,
        media: String,
    },
    JsPlugin(String),
    Lang(String),
    XmlFilter {
        dir: String,
        file: String,
    },
    Ruleset(String),
}

/// A queue that remembers every request, in order
#[derive(Debug, Default)]
pub struct ResourceLog {
    pub events: Vec<ResourceEvent>,
}

impl ResourceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets of every `Load` event, in order
    pub fn loaded_targets(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ResourceEvent::Load(req) => Some(req.target.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ResourceQueue for ResourceLog {
    fn load_file(&mut self, request: ResourceRequest) {
        tracing::debug!(target = %request.target, "queue resource");
        self.events.push(ResourceEvent::Load(request));
    }

    fn unload_file(&mut self, target: &str, target_ie: &str, media: &str) {
        self.events.push(ResourceEvent::Unload {
            target: target.to_string(),
            target_ie: target_ie.to_string(),
            media: media.to_string(),
        });
    }

    fn load_js_plugin(&mut self, name: &str) {
        self.events.push(ResourceEvent::JsPlugin(name.to_string()));
    }

    fn load_lang(&mut self, dir: &str) {
        self.events.push(ResourceEvent::Lang(dir.to_string()));
    }

    fn compile_xml_filter(&mut self, dir: &str, file: &str) {
        self.events.push(ResourceEvent::XmlFilter {
            dir: dir.to_string(),
            file: file.to_string(),
        });
    }

    fn load_ruleset(&mut self, path: &str) {
        self.events.push(ResourceEvent::Ruleset(path.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_map() {
        let map: Map = [
            ("target", "modules/board/skins/x/board.css"),
            ("media", "screen"),
            ("index", "-3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect();
        let req = ResourceRequest::from_map(&map).unwrap();
        assert_eq!(req.kind, ResourceKind::Stylesheet);
        assert_eq!(req.placement, "screen");
        assert_eq!(req.index, Some(-3));
        assert!(!req.use_cdn);
    }

    #[test]
    fn request_needs_a_target() {
        assert!(ResourceRequest::from_map(&Map::new()).is_none());
    }
}
