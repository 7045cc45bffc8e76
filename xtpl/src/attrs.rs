//! Attribute extraction for resource directives

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

/// Directive attributes; a repeated name keeps its last value
pub type AttributeMap = IndexMap<String, String>;

/// `<include target="..." />`: space-separated `name="value"` pairs
static TAG_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s(\w+)="([^"]+)""#).unwrap());

/// `<!--#include("x",a="b")-->`: comma-separated `name="value"` pairs
static COMMENT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#",\s*(\w+)="([^"]+)""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrStyle {
    Tag,
    Comment,
}

pub fn parse_attributes(text: &str, style: AttrStyle) -> AttributeMap {
    let re = match style {
        AttrStyle::Tag => &*TAG_ATTR,
        AttrStyle::Comment => &*COMMENT_ATTR,
    };
    let mut attrs = AttributeMap::new();
    for caps in re.captures_iter(text) {
        attrs.insert(caps[1].to_string(), caps[2].to_string());
    }
    attrs
}
