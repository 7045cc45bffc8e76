//! Runtime values of the render script

use indexmap::IndexMap;
use std::cmp::Ordering;

/// An ordered string-keyed map, the script's associative array
pub type Map = IndexMap<String, Value>;

/// A runtime value in a render script
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
}

/// A value coerced to a number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty() && s != "0",
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// The text `echo` writes for this value
    pub fn render_to_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => "Array".to_string(),
        }
    }

    /// Number of elements for arrays, 1 for scalars, 0 for null
    pub fn count(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::List(l) => l.len(),
            Value::Map(m) => m.len(),
            _ => 1,
        }
    }

    /// Numeric coercion; `None` for arrays
    pub fn to_number(&self) -> Option<Number> {
        Some(match self {
            Value::Null => Number::Int(0),
            Value::Bool(b) => Number::Int(i64::from(*b)),
            Value::Int(i) => Number::Int(*i),
            Value::Float(f) => Number::Float(*f),
            Value::String(s) => parse_numeric_prefix(s),
            Value::List(_) | Value::Map(_) => return None,
        })
    }

    /// Whether this is a string that reads entirely as a number
    fn numeric_string(&self) -> Option<Number> {
        match self {
            Value::String(s) => parse_numeric(s),
            _ => None,
        }
    }

    /// Loose (`==`) equality
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), b) | (b, Value::Bool(a)) => *a == b.is_truthy(),
            (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
            (Value::Null, v) | (v, Value::Null) => !v.is_truthy(),
            (Value::String(a), Value::String(b)) => {
                match (self.numeric_string(), other.numeric_string()) {
                    (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                    _ => a == b,
                }
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            (Value::List(_) | Value::Map(_), _) | (_, Value::List(_) | Value::Map(_)) => false,
            (Value::String(s), n) | (n, Value::String(s)) => match parse_numeric(s) {
                Some(x) => n.to_number().is_some_and(|y| x.as_f64() == y.as_f64()),
                None => *s == n.render_to_string(),
            },
            (a, b) => match (a.to_number(), b.to_number()) {
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            },
        }
    }

    /// Strict (`===`) equality: same type and same value
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.strict_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Loose ordering used by `<`, `<=`, `>`, `>=`
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => {
                match (self.numeric_string(), other.numeric_string()) {
                    (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
                    _ => Some(a.cmp(b)),
                }
            }
            (Value::Null, Value::String(s)) => Some("".cmp(s.as_str())),
            (Value::String(s), Value::Null) => Some(s.as_str().cmp("")),
            (Value::Bool(_) | Value::Null, _) | (_, Value::Bool(_) | Value::Null) => {
                Some(self.is_truthy().cmp(&other.is_truthy()))
            }
            (Value::List(a), Value::List(b)) => Some(a.len().cmp(&b.len())),
            (Value::Map(a), Value::Map(b)) => Some(a.len().cmp(&b.len())),
            _ => {
                let x = self.to_number()?.as_f64();
                let y = other.to_number()?.as_f64();
                x.partial_cmp(&y)
            }
        }
    }

    /// Member lookup for `->name`
    pub fn member(&self, name: &str) -> Value {
        match self {
            Value::Map(m) => m.get(name).cloned().unwrap_or_default(),
            _ => Value::Null,
        }
    }

    /// Element lookup for `[key]`
    pub fn index(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::List(list), key) => key
                .to_number()
                .and_then(|n| match n {
                    Number::Int(i) => usize::try_from(i).ok(),
                    Number::Float(f) => usize::try_from(f as i64).ok(),
                })
                .and_then(|i| list.get(i).cloned())
                .unwrap_or_default(),
            (Value::Map(map), key) => map.get(&key.to_key()).cloned().unwrap_or_default(),
            (Value::String(s), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default(),
            _ => Value::Null,
        }
    }

    /// Render a value for use as a map key
    pub fn to_key(&self) -> String {
        match self {
            Value::Bool(b) => i64::from(*b).to_string(),
            Value::Float(f) => (*f as i64).to_string(),
            other => other.render_to_string(),
        }
    }

    /// Iterate `(key, value)` pairs; scalars and null produce nothing
    pub fn entries(&self) -> Vec<(Value, Value)> {
        match self {
            Value::List(list) => list
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                .collect(),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| (key_value(k), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to JSON, for hosts that want to inspect render results
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Map keys that read as integers come back out as integers
fn key_value(key: &str) -> Value {
    match key.parse::<i64>() {
        Ok(i) if i.to_string() == key => Value::Int(i),
        _ => Value::String(key.to_string()),
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Parse a string that is entirely numeric (surrounding whitespace allowed)
fn parse_numeric(s: &str) -> Option<Number> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Some(Number::Int(i));
    }
    // reject things Rust accepts but templates never mean as numbers
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    t.parse::<f64>().ok().map(Number::Float)
}

/// Leading-number coercion: "12abc" is 12, "abc" is 0
fn parse_numeric_prefix(s: &str) -> Number {
    if let Some(n) = parse_numeric(s) {
        return n;
    }
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut is_float = false;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 {
            is_float = true;
            end = frac;
        }
    }
    if end == digits_start {
        return Number::Int(0);
    }
    let prefix = &t[..end];
    if is_float {
        prefix.parse().map(Number::Float).unwrap_or(Number::Int(0))
    } else {
        prefix.parse().map(Number::Int).unwrap_or(Number::Int(0))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
