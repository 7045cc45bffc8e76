//! Form augmentation
//!
//! Every compiled `<form>...</form>` region gets the hidden fields the
//! server-side validators rely on:
//!
//! - a `ruleset="..."` attribute moves into a hidden `ruleset` input, and the
//!   ruleset file is registered for client-side validation
//! - missing `act`, `mid` and `vid` inputs are filled from the render context
//! - a missing `error_return_url` input gets the current request URI

use crate::error::DiagnosticKind;
use crate::pipeline::Diagnostics;
use crate::rewrite::quote_literal;
use crate::script::{CLOSE_TAG, OPEN_TAG};
use regex::Regex;
use std::sync::LazyLock;

static FORM_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<form[\s>]").unwrap());

static FORM_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</form>").unwrap());

static RULESET_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)\s*ruleset="([^"]*?)""#).unwrap());

static IDENTITY_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<input[^>]*\sname="(act|mid|vid)""#).unwrap());

static RETURN_URL_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<input[^>]*name="error_return_url"[^>]*>"#).unwrap());

static MODULE_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\.?/)(modules/[\w-]+)").unwrap());

/// Hidden fields filled from the context variable of the same name
pub const IDENTITY_FIELDS: [&str; 3] = ["act", "mid", "vid"];

/// A `<form ...>` opening tag and the body up to its `</form>`
struct FormRegion {
    start: usize,
    tag_end: usize,
    body_end: usize,
    end: usize,
}

/// Augment every form in `buf`.
///
/// `template_rel` is the template path relative to the application root; it
/// locates the module a bare ruleset name belongs to.
pub fn augment_forms(
    buf: &str,
    template_rel: &str,
    ruleset_dir: &str,
    diags: &mut Diagnostics,
) -> String {
    let mut out = String::with_capacity(buf.len());
    let mut last = 0;
    for form in find_forms(buf) {
        out.push_str(&buf[last..form.start]);
        let tag = &buf[form.start..form.tag_end];
        let body = &buf[form.tag_end..form.body_end];

        let (tag, ruleset_input) = match RULESET_ATTR.captures(tag) {
            Some(caps) => {
                let stripped = RULESET_ATTR.replace(tag, "").into_owned();
                let name = caps[1].replace('@', "");
                let input = hidden_input("ruleset", &name);
                match ruleset_path(&caps[1], template_rel, ruleset_dir) {
                    Some(path) => (
                        format!("<?tpl load_ruleset({}) ?>{stripped}", quote_literal(&path)),
                        input,
                    ),
                    None => {
                        diags.push(
                            DiagnosticKind::UnresolvedPath,
                            form.start,
                            caps[0].trim(),
                            Some("use `@name` for a shared ruleset outside a module"),
                        );
                        (stripped, input)
                    }
                }
            }
            None => (tag.to_string(), String::new()),
        };

        let present: Vec<String> = IDENTITY_INPUT
            .captures_iter(body)
            .map(|caps| caps[1].to_ascii_lowercase())
            .collect();
        let mut fields = String::new();
        if !RETURN_URL_INPUT.is_match(body) {
            fields.push_str(&hidden_input(
                "error_return_url",
                "<?tpl echo htmlspecialchars(request_uri()) ?>",
            ));
        }
        for name in IDENTITY_FIELDS {
            if !present.iter().any(|p| p == name) {
                fields.push_str(&hidden_input(name, &format!("<?tpl echo $__ctx->{name} ?>")));
            }
        }

        out.push_str(&tag);
        out.push_str(&fields);
        out.push_str(&ruleset_input);
        out.push_str(body);
        out.push_str(&buf[form.body_end..form.end]);
        last = form.end;
    }
    out.push_str(&buf[last..]);
    out
}

fn hidden_input(name: &str, value: &str) -> String {
    format!(r#"<input type="hidden" name="{name}" value="{value}" />"#)
}

/// Where the ruleset file named by a `ruleset` attribute lives
fn ruleset_path(declared: &str, template_rel: &str, ruleset_dir: &str) -> Option<String> {
    let name = declared.replace('@', "");
    if name.is_empty() {
        return None;
    }
    if declared.contains('@') {
        let dir = ruleset_dir.trim_end_matches('/');
        return Some(format!("{dir}/{name}.xml"));
    }
    let caps = MODULE_DIR.captures(template_rel)?;
    Some(format!("{}/ruleset/{name}.xml", &caps[1]))
}

fn find_forms(buf: &str) -> Vec<FormRegion> {
    let mut forms = Vec::new();
    let mut from = 0;
    while let Some(open) = FORM_OPEN.find_at(buf, from) {
        let start = open.start();
        let Some(tag_end) = open_tag_end(buf, start + "<form".len()) else {
            from = start + 1;
            continue;
        };
        let Some(close) = FORM_CLOSE.find_at(buf, tag_end) else {
            break;
        };
        forms.push(FormRegion {
            start,
            tag_end,
            body_end: close.start(),
            end: close.end(),
        });
        from = close.end();
    }
    forms
}

/// End (exclusive) of an opening tag whose attributes may hold `<?tpl ?>` islands
fn open_tag_end(buf: &str, mut at: usize) -> Option<usize> {
    let bytes = buf.as_bytes();
    while at < bytes.len() {
        match bytes[at] {
            b'>' => return Some(at + 1),
            b'<' if buf[at..].starts_with(OPEN_TAG) => {
                at += buf[at..].find(CLOSE_TAG)? + CLOSE_TAG.len();
            }
            b'<' => return None,
            _ => at += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn augment(buf: &str, template_rel: &str) -> (String, Diagnostics) {
        let mut diags = Diagnostics::new(Utf8PathBuf::from(template_rel));
        let out = augment_forms(buf, template_rel, "files/ruleset", &mut diags);
        (out, diags)
    }

    #[test]
    fn shared_ruleset_moves_into_a_hidden_field() {
        let (out, diags) = augment(
            r#"<form action="./" ruleset="@myrules" method="post"><input name="act" value="x" /><input type="hidden" name="mid" /><input type="hidden" name="vid" /><input type="hidden" name="error_return_url" /></form>"#,
            "modules/page/tpl/index.html",
        );
        assert!(diags.is_empty());
        assert_eq!(
            out,
            r#"<?tpl load_ruleset('files/ruleset/myrules.xml') ?><form action="./" method="post"><input type="hidden" name="ruleset" value="myrules" /><input name="act" value="x" /><input type="hidden" name="mid" /><input type="hidden" name="vid" /><input type="hidden" name="error_return_url" /></form>"#
        );
    }

    #[test]
    fn module_ruleset() {
        let (out, _) = augment(
            r#"<form ruleset="insert"></form>"#,
            "modules/board-x/skins/default/write.html",
        );
        assert!(out.starts_with("<?tpl load_ruleset('modules/board-x/ruleset/insert.xml') ?><form>"));
    }

    #[test]
    fn module_ruleset_outside_a_module_is_unresolved() {
        let (out, diags) = augment(r#"<form ruleset="insert"></form>"#, "layouts/x.html");
        assert!(out.starts_with(r#"<form><input type="hidden" name="error_return_url""#));
        assert_eq!(diags.items()[0].kind, DiagnosticKind::UnresolvedPath);
    }

    #[test]
    fn missing_fields_are_added_once_in_order() {
        let (out, _) = augment(r#"<form ruleset="@r"><p>body</p></form>"#, "x.html");
        for name in ["act", "mid", "vid", "error_return_url", "ruleset"] {
            assert_eq!(out.matches(&format!(r#"name="{name}""#)).count(), 1, "{name}");
        }
        let pos = |name: &str| out.find(&format!(r#"name="{name}""#)).unwrap();
        assert!(pos("error_return_url") < pos("act"));
        assert!(pos("act") < pos("mid") && pos("mid") < pos("vid"));
        assert!(pos("vid") < pos("ruleset"));
        assert!(out.ends_with("<p>body</p></form>"));
        assert!(!out.contains("ruleset=\""));
    }

    #[test]
    fn identity_values_come_from_the_context() {
        let (out, _) = augment("<form></form>", "x.html");
        assert!(out.contains(r#"<input type="hidden" name="mid" value="<?tpl echo $__ctx->mid ?>" />"#));
        assert!(out.contains("htmlspecialchars(request_uri())"));
    }

    #[test]
    fn code_islands_inside_the_opening_tag() {
        let (out, _) = augment(
            r#"<FORM action="<?tpl echo $__ctx->url ?>" ruleset="@r">x</FORM>"#,
            "x.html",
        );
        assert!(out.contains(r#"<FORM action="<?tpl echo $__ctx->url ?>">"#), "{out}");
        assert!(out.ends_with("x</FORM>"));
    }

    #[test]
    fn every_form_is_augmented() {
        let (out, _) = augment("<form>a</form><div/><form>b</form>", "x.html");
        assert_eq!(out.matches(r#"name="act""#).count(), 2);
    }

    #[test]
    fn unterminated_form_is_left_alone() {
        let src = "<form>never closed";
        assert_eq!(augment(src, "x.html").0, src);
    }
}
