//! Pure builtin functions available to every template

use super::value::{Map, Number, Value};
use crate::error::RuntimeError;

/// Call a pure builtin; `None` when `name` is not one
pub(crate) fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let text = |i: usize| arg(i).render_to_string();

    let value = match name {
        "count" | "sizeof" => Value::Int(arg(0).count() as i64),
        "isset" => Value::Bool(!args.is_empty() && args.iter().all(|a| !a.is_null())),
        "empty" => Value::Bool(!arg(0).is_truthy()),
        "is_array" => Value::Bool(arg(0).is_array()),
        "is_string" => Value::Bool(matches!(arg(0), Value::String(_))),
        "is_numeric" => Value::Bool(match arg(0) {
            Value::Int(_) | Value::Float(_) => true,
            Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        }),
        "strlen" => Value::Int(text(0).len() as i64),
        "in_array" => {
            let needle = arg(0);
            let strict = arg(2).is_truthy();
            let found = arg(1).entries().iter().any(|(_, v)| {
                if strict {
                    v.strict_eq(&needle)
                } else {
                    v.loose_eq(&needle)
                }
            });
            Value::Bool(found)
        }
        "implode" | "join" => {
            // implode(glue, pieces) or implode(pieces)
            let (glue, pieces) = match (arg(0), arg(1)) {
                (pieces @ (Value::List(_) | Value::Map(_)), Value::Null) => (String::new(), pieces),
                (pieces @ (Value::List(_) | Value::Map(_)), glue) => (glue.render_to_string(), pieces),
                (glue, pieces) => (glue.render_to_string(), pieces),
            };
            let parts: Vec<String> = pieces
                .entries()
                .iter()
                .map(|(_, v)| v.render_to_string())
                .collect();
            Value::String(parts.join(&glue))
        }
        "explode" => {
            let delimiter = text(0);
            if delimiter.is_empty() {
                return Some(Err(RuntimeError::BadArguments {
                    name: name.to_string(),
                    expected: "a non-empty delimiter".to_string(),
                }));
            }
            Value::List(
                text(1)
                    .split(delimiter.as_str())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        }
        "trim" => Value::String(text(0).trim().to_string()),
        "ltrim" => Value::String(text(0).trim_start().to_string()),
        "rtrim" => Value::String(text(0).trim_end().to_string()),
        "strtolower" => Value::String(text(0).to_lowercase()),
        "strtoupper" => Value::String(text(0).to_uppercase()),
        "htmlspecialchars" => Value::String(escape_html(&text(0))),
        "sprintf" => return Some(sprintf(&text(0), args.get(1..).unwrap_or_default())),
        "intval" => Value::Int(match arg(0).to_number() {
            Some(Number::Int(i)) => i,
            Some(Number::Float(f)) => f as i64,
            None => i64::from(arg(0).is_truthy()),
        }),
        "floatval" => Value::Float(arg(0).to_number().map_or(0.0, Number::as_f64)),
        "strval" => Value::String(text(0)),
        "boolval" => Value::Bool(arg(0).is_truthy()),
        "array_keys" => Value::List(arg(0).entries().into_iter().map(|(k, _)| k).collect()),
        "array_merge" => merge_arrays(args),
        _ => return None,
    };
    Some(Ok(value))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// `%s`, `%d` and `%%`
fn sprintf(format: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec @ ('s' | 'd')) => {
                let Some(value) = args.next() else {
                    return Err(RuntimeError::BadArguments {
                        name: "sprintf".to_string(),
                        expected: "one argument per conversion".to_string(),
                    });
                };
                if spec == 's' {
                    out.push_str(&value.render_to_string());
                } else {
                    let n = value.to_number().map_or(0, |n| n.as_f64() as i64);
                    out.push_str(&n.to_string());
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(Value::String(out))
}

fn merge_arrays(args: &[Value]) -> Value {
    let all_lists = args.iter().all(|a| matches!(a, Value::List(_)));
    if all_lists {
        return Value::List(
            args.iter()
                .flat_map(|a| a.entries().into_iter().map(|(_, v)| v))
                .collect(),
        );
    }
    let mut map = Map::new();
    let mut next_index = 0i64;
    for (key, value) in args.iter().flat_map(Value::entries) {
        match key {
            Value::Int(_) => {
                map.insert(next_index.to_string(), value);
                next_index += 1;
            }
            key => {
                map.insert(key.to_key(), value);
            }
        }
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        call_builtin(name, args).unwrap().unwrap()
    }

    #[test]
    fn counting() {
        assert_eq!(call("count", &[Value::Null]), Value::Int(0));
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call("count", &[list]), Value::Int(2));
    }

    #[test]
    fn implode_both_argument_orders() {
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(call("implode", &[Value::from(","), list.clone()]), Value::from("a,b"));
        assert_eq!(call("implode", &[list, Value::from("-")]), Value::from("a-b"));
    }

    #[test]
    fn sprintf_conversions() {
        assert_eq!(
            call("sprintf", &[Value::from("%s=%d%%"), Value::from("n"), Value::from("4x")]),
            Value::from("n=4%")
        );
        assert!(call_builtin("sprintf", &[Value::from("%s")]).unwrap().is_err());
    }

    #[test]
    fn html_escaping() {
        assert_eq!(
            call("htmlspecialchars", &[Value::from("<a href=\"x\">&'")]),
            Value::from("&lt;a href=&quot;x&quot;&gt;&amp;&#039;")
        );
    }

    #[test]
    fn in_array_loose_and_strict() {
        let list = Value::List(vec![Value::from("1")]);
        assert_eq!(call("in_array", &[Value::Int(1), list.clone()]), Value::Bool(true));
        assert_eq!(
            call("in_array", &[Value::Int(1), list, Value::Bool(true)]),
            Value::Bool(false)
        );
    }

    #[test]
    fn unknown_names_fall_through() {
        assert!(call_builtin("no_such_fn", &[]).is_none());
    }
}
