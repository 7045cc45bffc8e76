//! Tag-scope compiler: `loop="..."` and `cond="..."` attributes
//!
//! An element carrying `cond` or `loop` is wrapped in the matching control
//! structure. The opening code goes right before the opening tag; the
//! closing braces go right after the balancing closing tag, found by
//! per-name depth tracking. Void and self-closing elements close
//! immediately.

use crate::error::DiagnosticKind;
use crate::pipeline::Diagnostics;
use crate::rewrite::rewrite_vars;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static CONTROL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s(loop|cond)="([^"]+)""#).unwrap());

static CONTROL_DETECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:\s|\|)cond="|\sloop=""#).unwrap());

/// `name="value"|cond="EXPR"`: the attribute is emitted only when EXPR holds
static INLINE_COND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)(\s[\w:]+="[^"]+?")\|cond="(.+?)""#).unwrap());

/// Elements that never have a closing tag
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "hr", "input", "img", "link", "meta", "param", "frame",
    "col",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawTag {
    start: usize,
    end: usize,
    /// Lowercased element name
    name: String,
    closing: bool,
}

/// An open element awaiting its closing tag
struct Frame {
    closing: usize,
    offset: usize,
    text: String,
    /// Where the opening code was written in the output, for removal
    prefix_at: usize,
    prefix_len: usize,
}

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

fn close_code(braces: usize) -> String {
    format!("<?tpl {} ?>", "}".repeat(braces))
}

/// Compile `loop`/`cond` attributes into control structures
pub fn compile_tag_scopes(buf: &str, diags: &mut Diagnostics) -> String {
    let tags = scan_tags(buf);
    let observed: BTreeSet<&str> = tags
        .iter()
        .filter(|t| !t.closing && CONTROL_DETECT.is_match(&buf[t.start..t.end]))
        .map(|t| t.name.as_str())
        .collect();
    if observed.is_empty() {
        return buf.to_string();
    }

    let mut out = String::with_capacity(buf.len() + 64);
    let mut stacks: HashMap<&str, Vec<Frame>> = HashMap::new();
    let mut last = 0;

    for tag in tags.iter().filter(|t| observed.contains(t.name.as_str())) {
        out.push_str(&buf[last..tag.start]);
        last = tag.end;
        let text = &buf[tag.start..tag.end];

        if tag.closing {
            out.push_str(text);
            if let Some(frame) = stacks.get_mut(tag.name.as_str()).and_then(Vec::pop)
                && frame.closing > 0
            {
                out.push_str(&close_code(frame.closing));
            }
            continue;
        }

        let mut prefix = String::new();
        let mut closing = 0;
        for caps in CONTROL_ATTR.captures_iter(text) {
            let expr = rewrite_vars(&caps[2]);
            let header = if &caps[1] == "cond" {
                Some(format!("if ({expr})"))
            } else {
                loop_header(&expr)
            };
            match header {
                Some(header) => {
                    prefix.push_str(&format!("<?tpl {header} {{ ?>"));
                    closing += 1;
                }
                None => diags.push(
                    DiagnosticKind::MalformedLoop,
                    tag.start,
                    caps[0].trim(),
                    Some("use `LIST=>VALUE`, `LIST=>KEY,VALUE`, `INIT;COND;STEP` or `VAR=EXPR`"),
                ),
            }
        }

        let stripped = CONTROL_ATTR.replace_all(text, "");
        let rendered = INLINE_COND.replace_all(&stripped, |caps: &regex::Captures<'_>| {
            format!(
                "<?tpl if ({}) {{ ?>{}<?tpl }} ?>",
                rewrite_vars(&caps[2]),
                &caps[1]
            )
        });

        let prefix_at = out.len();
        out.push_str(&prefix);
        out.push_str(&rendered);

        if text.ends_with("/>") || is_void(&tag.name) {
            if closing > 0 {
                out.push_str(&close_code(closing));
            }
        } else {
            stacks.entry(tag.name.as_str()).or_default().push(Frame {
                closing,
                offset: tag.start,
                text: text.to_string(),
                prefix_at,
                prefix_len: prefix.len(),
            });
        }
    }
    out.push_str(&buf[last..]);

    // unbalanced: report, and drop the opening code so the output stays well-formed
    let mut unclosed: Vec<Frame> = stacks
        .into_values()
        .flatten()
        .filter(|f| f.closing > 0)
        .collect();
    unclosed.sort_by_key(|f| std::cmp::Reverse(f.prefix_at));
    for frame in unclosed {
        diags.push(
            DiagnosticKind::UnbalancedTag,
            frame.offset,
            &frame.text,
            Some("the element's closing tag is missing"),
        );
        out.replace_range(frame.prefix_at..frame.prefix_at + frame.prefix_len, "");
    }
    out
}

/// Control header for a (rewritten) `loop` expression.
///
/// Three shapes, tried in order:
/// - `LIST=>VALUE` or `LIST=>KEY,VALUE`: guarded foreach
/// - `INIT;COND;STEP`: for
/// - `VAR=EXPR`: while the assignment is truthy
pub fn loop_header(expr: &str) -> Option<String> {
    if let Some((list, bindings)) = expr.split_once("=>") {
        let list = list.trim();
        let binding = match bindings.split_once(',') {
            Some((key, value)) => {
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() || value.is_empty() {
                    return None;
                }
                format!("{key} => {value}")
            }
            None => bindings.trim().to_string(),
        };
        if list.is_empty() || binding.is_empty() {
            return None;
        }
        return Some(format!(
            "if ({list} && count({list})) foreach ({list} as {binding})"
        ));
    }

    if expr.matches(';').count() >= 2 {
        return Some(format!("for ({expr})"));
    }

    let eq = find_assignment(expr)?;
    let (var, value) = (expr[..eq].trim(), expr[eq + 1..].trim());
    if var.is_empty() || value.is_empty() {
        return None;
    }
    Some(format!("while (({var} = {value}))"))
}

/// First `=` that is a plain assignment rather than part of `==`, `!=`, `<=`, `>=`
fn find_assignment(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    (0..bytes.len()).find(|&i| {
        bytes[i] == b'='
            && !matches!(i.checked_sub(1).map(|p| bytes[p]), Some(b'=' | b'!' | b'<' | b'>'))
            && !matches!(bytes.get(i + 1), Some(b'=' | b'>'))
    })
}

/// Every syntactically complete tag in the buffer, in order
fn scan_tags(buf: &str) -> Vec<RawTag> {
    let bytes = buf.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;
    while let Some(off) = buf[i..].find('<') {
        let start = i + off;
        i = start + 1;

        let mut j = start + 1;
        let closing = bytes.get(j) == Some(&b'/');
        if closing {
            j += 1;
        }
        let name_start = j;
        while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
            j += 1;
        }
        if j == name_start {
            continue;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        match bytes.get(j) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {}
            _ => continue,
        }
        let Some(end) = tag_end(buf, j) else {
            continue;
        };
        tags.push(RawTag {
            start,
            end,
            name: buf[name_start..j].to_ascii_lowercase(),
            closing,
        });
        i = end;
    }
    tags
}

/// End (exclusive) of a tag whose name ends at `from`.
///
/// Quoted values, `{...}` expressions and `<!--...-->` comments may contain `>`.
fn tag_end(buf: &str, mut from: usize) -> Option<usize> {
    let bytes = buf.as_bytes();
    while from < bytes.len() {
        match bytes[from] {
            b'>' => return Some(from + 1),
            q @ (b'"' | b'\'') => {
                let close = buf[from + 1..].find(q as char)?;
                from += close + 2;
            }
            b'{' => match buf[from..].find('}') {
                Some(close) => from += close + 1,
                None => from += 1,
            },
            b'<' if buf[from..].starts_with("<!--") => {
                let close = buf[from + 4..].find("-->")?;
                from += 4 + close + 3;
            }
            _ => from += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn compile(buf: &str) -> (String, Diagnostics) {
        let mut diags = Diagnostics::new(Utf8PathBuf::from("t.html"));
        let out = compile_tag_scopes(buf, &mut diags);
        (out, diags)
    }

    #[test]
    fn cond_wraps_element() {
        let (out, diags) = compile(r#"<p cond="$show" class="x">Hi</p>"#);
        assert_eq!(
            out,
            r#"<?tpl if ($__ctx->show) { ?><p class="x">Hi</p><?tpl } ?>"#
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn loop_with_key_and_value() {
        let (out, _) = compile(r#"<li loop="$list=>$k,$v">{$v}</li>"#);
        assert_eq!(
            out,
            "<?tpl if ($__ctx->list && count($__ctx->list)) foreach ($__ctx->list as $__ctx->k => $__ctx->v) { ?><li>{$v}</li><?tpl } ?>"
        );
    }

    #[test]
    fn loop_and_cond_on_one_element() {
        let (out, _) = compile(r#"<li loop="$l=>$v" cond="$v">x</li>"#);
        assert!(out.ends_with("<li>x</li><?tpl }} ?>"), "{out}");
    }

    #[test]
    fn nested_same_name_elements_balance() {
        let (out, _) = compile(r#"<div cond="$a"><div>inner</div></div><div>after</div>"#);
        assert_eq!(
            out,
            r#"<?tpl if ($__ctx->a) { ?><div><div>inner</div></div><?tpl } ?><div>after</div>"#
        );
    }

    #[test]
    fn void_and_self_closing_elements() {
        let (out, _) = compile(r#"<img cond="$a" src="x.png"><br loop="1;$i<2;$i++" />"#);
        assert_eq!(
            out,
            r#"<?tpl if ($__ctx->a) { ?><img src="x.png"><?tpl } ?><?tpl for (1;$__ctx->i<2;$__ctx->i++) { ?><br /><?tpl } ?>"#
        );
    }

    #[test]
    fn while_shape() {
        assert_eq!(
            loop_header("$__ctx->row = next($__ctx->rows)").as_deref(),
            Some("while (($__ctx->row = next($__ctx->rows)))")
        );
        assert_eq!(loop_header("$a == $b"), None);
    }

    #[test]
    fn malformed_loop_is_reported_and_not_counted() {
        let (out, diags) = compile(r#"<div loop="garbage">x</div>"#);
        assert_eq!(out, "<div>x</div>");
        assert_eq!(diags.items()[0].kind, DiagnosticKind::MalformedLoop);
    }

    #[test]
    fn unbalanced_tag_is_reported_and_unwrapped() {
        let (out, diags) = compile(r#"<section cond="$a">never closed"#);
        assert_eq!(out, "<section>never closed");
        assert_eq!(diags.items()[0].kind, DiagnosticKind::UnbalancedTag);
        assert_eq!(diags.items()[0].offset, 0);
    }

    #[test]
    fn inline_attribute_cond() {
        let (out, _) = compile(r#"<option value="1" selected="selected"|cond="$sel">One</option>"#);
        assert_eq!(
            out,
            r#"<option value="1"<?tpl if ($__ctx->sel) { ?> selected="selected"<?tpl } ?>>One</option>"#
        );
    }

    #[test]
    fn quoted_angle_brackets_stay_inside_the_tag() {
        let (out, _) = compile(r#"<a cond="$a" title="x > y" href="{$u}">t</a>"#);
        assert_eq!(
            out,
            r#"<?tpl if ($__ctx->a) { ?><a title="x > y" href="{$u}">t</a><?tpl } ?>"#
        );
    }

    #[test]
    fn untouched_without_control_attributes() {
        let src = "<div><p>plain</p></div>";
        assert_eq!(compile(src).0, src);
    }
}
