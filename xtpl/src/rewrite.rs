//! Variable rewriting for expressions copied out of template source
//!
//! Template authors write `$title`; compiled code reads `$__ctx->title`.

/// The prefix every rewritten variable reference gets
pub const CONTEXT_PREFIX: &str = "$__ctx->";

/// Rewrite bare `$name` references into context member accesses.
///
/// A `$` is rewritten when it is followed by a letter, or by `_` and then a
/// letter or digit. It is left alone when preceded by `::` or `\`, and inside
/// quoted string literals (the render script does not interpolate strings).
/// `$__ctx` itself is never rewritten, which keeps the rewrite idempotent.
pub fn rewrite_vars(expr: &str) -> String {
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len() + 16);
    let mut quote: Option<u8> = None;
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'$' if starts_variable(&bytes[i + 1..]) && !escaped(&bytes[..i]) => {
                out.push_str(&expr[last..i]);
                out.push_str(CONTEXT_PREFIX);
                last = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&expr[last.min(expr.len())..]);
    out
}

fn starts_variable(rest: &[u8]) -> bool {
    match rest {
        [c, ..] if c.is_ascii_alphabetic() => true,
        [b'_', c, ..] => c.is_ascii_alphanumeric(),
        _ => false,
    }
}

fn escaped(before: &[u8]) -> bool {
    before.ends_with(b"::") || before.ends_with(b"\\")
}

/// Quote a value as a single-quoted render-script string literal
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_plain_variables() {
        assert_eq!(rewrite_vars("$title"), "$__ctx->title");
        assert_eq!(
            rewrite_vars("$a->b && count($list)"),
            "$__ctx->a->b && count($__ctx->list)"
        );
        assert_eq!(rewrite_vars("$_x1"), "$__ctx->_x1");
    }

    #[test]
    fn leaves_qualified_and_escaped_dollars() {
        assert_eq!(rewrite_vars("Foo::$bar"), "Foo::$bar");
        assert_eq!(rewrite_vars("\\$bar"), "\\$bar");
        assert_eq!(rewrite_vars("$1 $ $__ctx"), "$1 $ $__ctx");
    }

    #[test]
    fn idempotent() {
        let once = rewrite_vars("$a + $b->c");
        assert_eq!(rewrite_vars(&once), once);
    }

    #[test]
    fn skips_string_literals() {
        assert_eq!(
            rewrite_vars(r#"$a . '$b' . "$c\"$d" . $e"#),
            r#"$__ctx->a . '$b' . "$c\"$d" . $__ctx->e"#
        );
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_literal("it's"), r"'it\'s'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }
}
