//! The directive dispatcher
//!
//! A single left-to-right pass that recognizes, at each position and in this
//! priority order:
//!
//! - brace expressions: `{$title}` echoes, `{@ $x = 1 }` runs raw code
//! - resource directives, tag form `<load target="a.css" />` or comment form
//!   `<!--#include("header.html")-->`
//! - comment control flow: `<!--@if($a)-->`, `<!--@else-->`, `<!--@end-->`, ...
//!
//! Code islands already emitted by earlier stages are copied through untouched.

use crate::attrs::{AttrStyle, AttributeMap, parse_attributes};
use crate::error::DiagnosticKind;
use crate::paths::PathResolver;
use crate::pipeline::Diagnostics;
use crate::rewrite::{CONTEXT_PREFIX, quote_literal, rewrite_vars};
use crate::script::{CLOSE_TAG, OPEN_TAG};
use camino::Utf8Path;
use regex::Regex;
use std::sync::LazyLock;

static CONTROL_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:((?:end)?(?:if|switch|for(?:each)?|while)|end)|(else(?:if)?)|(break@)?(case|default)|(break))$",
    )
    .unwrap()
});

/// The collection of `(COLLECTION as ...)`
static FOREACH_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(\s*(.+?) .*$").unwrap());

static REMOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^https?://").unwrap());

/// Keywords a resource directive may start with, longest first
const RESOURCE_KEYWORDS: &[&str] = &["load_js_plugin", "include", "import", "unload", "load"];

/// What a resource directive asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDirective {
    Include,
    Import,
    Load,
    Unload,
    LoadJsPlugin,
}

impl ResourceDirective {
    fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "include" => ResourceDirective::Include,
            "import" => ResourceDirective::Import,
            "load" => ResourceDirective::Load,
            "unload" => ResourceDirective::Unload,
            "load_js_plugin" => ResourceDirective::LoadJsPlugin,
            _ => return None,
        })
    }
}

/// A recognized directive, before code generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `{EXPR}`
    Echo(String),
    /// `{@CODE}`
    Raw(String),
    /// `<include .../>`, `<!--%import("...")-->`, ...
    Resource {
        directive: ResourceDirective,
        /// The `("...")` argument of the comment form
        argument: Option<String>,
        attrs: AttributeMap,
    },
    /// `<!--@KEYWORD ARGS-->`
    Control { keyword: String, args: String },
}

/// A directive and the source text it was found in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveMatch {
    pub directive: Directive,
    pub start: usize,
    pub end: usize,
}

/// Find every directive in `buf`, skipping `<?tpl ... ?>` islands
pub fn scan_directives(buf: &str) -> Vec<DirectiveMatch> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let Some(off) = buf[i..].find(|c: char| c == '{' || c == '<') else {
            break;
        };
        let at = i + off;
        let rest = &buf[at..];

        if rest.starts_with(OPEN_TAG) {
            i = match rest.find(CLOSE_TAG) {
                Some(close) => at + close + CLOSE_TAG.len(),
                None => buf.len(),
            };
            continue;
        }

        let recognized = if rest.starts_with('{') {
            match_brace(rest)
        } else {
            match_resource_tag(rest)
                .or_else(|| match_resource_comment(rest))
                .or_else(|| match_control(rest))
        };

        match recognized {
            Some((directive, len)) => {
                found.push(DirectiveMatch {
                    directive,
                    start: at,
                    end: at + len,
                });
                i = at + len;
            }
            None => i = at + 1,
        }
    }
    found
}

/// `{@...}` (may span lines) or a gated single-line `{...}`
fn match_brace(rest: &str) -> Option<(Directive, usize)> {
    let body = &rest[1..];
    if let Some(code) = body.strip_prefix('@') {
        let close = code.find('}')?;
        if close == 0 {
            return None;
        }
        return Some((Directive::Raw(code[..close].to_string()), close + 3));
    }

    let line = &body[..body.find('\n').unwrap_or(body.len())];
    let close = line.find('}')?;
    let expr = &line[..close];
    if expr.is_empty() || !looks_like_expression(line) {
        return None;
    }
    Some((Directive::Echo(expr.to_string()), close + 2))
}

/// The gate that keeps plain `{ ... }` text (scripts, JSON) out of the compiler
fn looks_like_expression(s: &str) -> bool {
    let b = s.as_bytes();
    let word_len = b
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
        .count();
    match b.first() {
        Some(b'$') => b.get(1).is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_'),
        Some(b'_') if s.starts_with("__") && b.get(2).is_some_and(u8::is_ascii_uppercase) => true,
        Some(c) if c.is_ascii_digit() => true,
        Some(q @ (b'\'' | b'"')) => s[1..].contains(*q as char),
        _ if word_len > 0 => s[word_len..].starts_with('(') || s[word_len..].starts_with("::"),
        _ => false,
    }
}

/// The resource keyword `s` starts with, as a whole word
fn resource_keyword(s: &str) -> Option<&'static str> {
    RESOURCE_KEYWORDS.iter().copied().find(|k| {
        s.starts_with(k) && !s[k.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// `<include target="..." />`: attributes run to the first `/>` on the line
fn match_resource_tag(rest: &str) -> Option<(Directive, usize)> {
    let keyword = resource_keyword(&rest[1..])?;
    let directive = ResourceDirective::from_keyword(keyword)?;
    let after = 1 + keyword.len();
    let line_end = rest[after..].find('\n').map_or(rest.len(), |n| after + n);
    let close = rest[after..line_end].find("/>")? + after;
    let attrs = parse_attributes(&rest[after..close], AttrStyle::Tag);
    if attrs.is_empty() {
        return None;
    }
    Some((
        Directive::Resource {
            directive,
            argument: None,
            attrs,
        },
        close + 2,
    ))
}

/// `<!--#include("x.html")-->` or `<!--%import("a.css",media="all")-->`
fn match_resource_comment(rest: &str) -> Option<(Directive, usize)> {
    let body = rest
        .strip_prefix("<!--#")
        .or_else(|| rest.strip_prefix("<!--%"))?;
    let keyword = resource_keyword(body)?;
    let directive = ResourceDirective::from_keyword(keyword)?;
    let arg = body[keyword.len()..].strip_prefix("(\"")?;
    let arg_len = arg.find('"')?;
    if arg_len == 0 {
        return None;
    }
    let tail = &arg[arg_len + 1..];
    let line = &tail[..tail.find('\n').unwrap_or(tail.len())];
    let close = line.find(")-->")?;

    let consumed = rest.len() - tail.len() + close + 4;
    Some((
        Directive::Resource {
            directive,
            argument: Some(arg[..arg_len].to_string()),
            attrs: parse_attributes(&line[..close], AttrStyle::Comment),
        },
        consumed,
    ))
}

/// `<!--@keyword args-->`, all on one line
fn match_control(rest: &str) -> Option<(Directive, usize)> {
    let body = rest.strip_prefix("<!--@")?;
    let keyword_len = body
        .bytes()
        .take_while(|c| c.is_ascii_lowercase() || *c == b'@')
        .count();
    if keyword_len == 0 {
        return None;
    }
    let line = &body[..body.find('\n').unwrap_or(body.len())];
    let close = line[keyword_len..].find("-->")? + keyword_len;
    Some((
        Directive::Control {
            keyword: body[..keyword_len].to_string(),
            args: body[keyword_len..close].to_string(),
        },
        5 + close + 3,
    ))
}

/// Compile every directive in `buf` for the template at `template`
pub fn compile_directives(
    buf: &str,
    template: &Utf8Path,
    resolver: &PathResolver,
    diags: &mut Diagnostics,
) -> String {
    let emitter = Emitter { template, resolver };
    let matches = scan_directives(buf);
    let unbalanced = unbalanced_controls(&matches);
    let mut out = String::with_capacity(buf.len() + 128);
    let mut last = 0;
    for (m, unbalanced) in matches.iter().zip(unbalanced) {
        out.push_str(&buf[last..m.start]);
        let text = &buf[m.start..m.end];
        let emitted = match unbalanced {
            Some(help) => Err(problem(DiagnosticKind::UnbalancedTag, help)),
            None => emitter.emit(&m.directive),
        };
        match emitted {
            Ok(code) => out.push_str(&code),
            Err(problem) => {
                diags.push(problem.kind, m.start, text, Some(problem.help));
            }
        }
        last = m.end;
    }
    out.push_str(&buf[last..]);
    out
}

/// How a control comment affects block nesting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    Open,
    Close,
    /// `else`, `case`, `break`: only valid inside an open block
    Inside,
}

fn nesting(keyword: &str) -> Option<Nesting> {
    let caps = CONTROL_KEYWORD.captures(keyword)?;
    Some(match caps.get(1) {
        Some(block) if block.as_str().starts_with('e') => Nesting::Close,
        Some(_) => Nesting::Open,
        None => Nesting::Inside,
    })
}

/// For each match, why it breaks control-comment nesting, if it does.
///
/// Openers that never close and closers or branches with nothing open are
/// flagged; unbalanced directives are dropped so the output still parses.
fn unbalanced_controls(matches: &[DirectiveMatch]) -> Vec<Option<&'static str>> {
    let mut verdicts = vec![None; matches.len()];
    let mut open = Vec::new();
    for (i, m) in matches.iter().enumerate() {
        let Directive::Control { keyword, args } = &m.directive else {
            continue;
        };
        match nesting(keyword) {
            // a malformed opener is reported by the emitter and opens nothing
            Some(Nesting::Open) if emit_control(keyword, args).is_ok() => open.push(i),
            Some(Nesting::Close) if open.pop().is_none() => {
                verdicts[i] = Some("this closes a block that was never opened");
            }
            Some(Nesting::Inside) if open.is_empty() => {
                verdicts[i] = Some("this only makes sense inside an open block");
            }
            _ => {}
        }
    }
    for i in open {
        verdicts[i] = Some("this block is never closed; add `<!--@end-->`");
    }
    verdicts
}

struct Problem {
    kind: DiagnosticKind,
    help: &'static str,
}

fn problem(kind: DiagnosticKind, help: &'static str) -> Problem {
    Problem { kind, help }
}

/// `pathinfo`-style split: directory (`.` when there is none) and file name
fn split_path(target: &str) -> (&str, &str) {
    match target.rsplit_once('/') {
        Some(("", base)) => ("/", base),
        Some((dir, base)) => (dir, base),
        None => (".", target),
    }
}

fn extension(basename: &str) -> Option<String> {
    basename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

struct Emitter<'a> {
    template: &'a Utf8Path,
    resolver: &'a PathResolver,
}

impl Emitter<'_> {
    fn emit(&self, directive: &Directive) -> Result<String, Problem> {
        match directive {
            Directive::Echo(expr) => Ok(format!("<?tpl echo {} ?>", rewrite_vars(expr))),
            Directive::Raw(code) => Ok(format!("<?tpl {} ?>", rewrite_vars(code))),
            Directive::Resource {
                directive,
                argument,
                attrs,
            } => {
                let mut attrs = attrs.clone();
                if let Some(arg) = argument {
                    attrs.insert("target".to_string(), arg.clone());
                }
                self.emit_resource(*directive, &attrs)
            }
            Directive::Control { keyword, args } => emit_control(keyword, args),
        }
    }

    fn resolve(&self, dir: &str) -> Result<String, Problem> {
        self.resolver.resolve_dir(dir, self.template).ok_or(problem(
            DiagnosticKind::UnresolvedPath,
            "the directory does not exist relative to the template or the application root",
        ))
    }

    fn emit_resource(
        &self,
        directive: ResourceDirective,
        attrs: &AttributeMap,
    ) -> Result<String, Problem> {
        let Some(target) = attrs.get("target").filter(|t| !t.is_empty()) else {
            return Err(problem(
                DiagnosticKind::MalformedDirective,
                "add a `target` attribute",
            ));
        };

        match directive {
            ResourceDirective::Include => {
                let (dir, basename) = split_path(target);
                let dir = self.resolve(dir)?;
                Ok(format!(
                    "<?tpl echo include({}, {}) ?>",
                    quote_literal(&dir),
                    quote_literal(basename)
                ))
            }
            ResourceDirective::LoadJsPlugin => {
                let plugin = rewrite_vars(target);
                let plugin = if plugin.contains(CONTEXT_PREFIX) {
                    plugin
                } else {
                    quote_literal(&plugin)
                };
                Ok(format!("<?tpl load_js_plugin({plugin}); ?>"))
            }
            ResourceDirective::Import | ResourceDirective::Load | ResourceDirective::Unload => {
                self.emit_asset(directive == ResourceDirective::Unload, target, attrs)
            }
        }
    }

    fn emit_asset(
        &self,
        unload: bool,
        target: &str,
        attrs: &AttributeMap,
    ) -> Result<String, Problem> {
        let (dir, basename) = split_path(target);
        let remote = REMOTE.is_match(target);
        let ext = extension(basename).unwrap_or_default();

        let (rel_dir, target) = if remote {
            (None, target.to_string())
        } else {
            let rel_dir = self.resolve(dir)?;
            let target = match rel_dir.as_str() {
                "." if dir.starts_with('/') => format!("/{basename}"),
                "." => basename.to_string(),
                _ => format!("{rel_dir}/{basename}"),
            };
            (Some(rel_dir), target)
        };

        match (ext.as_str(), rel_dir) {
            ("xml", None) => Ok(String::new()),
            ("xml", Some(_)) if unload => Ok(String::new()),
            ("xml", Some(rel_dir)) => {
                let in_lang_dir = Utf8Path::new(dir).file_name() == Some("lang");
                if basename == "lang.xml" && in_lang_dir {
                    Ok(format!("<?tpl load_lang({}); ?>", quote_literal(&rel_dir)))
                } else {
                    Ok(format!(
                        "<?tpl compile_xml_filter({}, {}); ?>",
                        quote_literal(&rel_dir),
                        quote_literal(basename)
                    ))
                }
            }
            ("js" | "css", _) => {
                let placement = if ext == "js" { "type" } else { "media" };
                Ok(if unload {
                    let fields = resource_fields(&target, attrs, &["targetie", "media"]);
                    format!("<?tpl unload_file([{fields}]); ?>")
                } else {
                    let fields = resource_fields(
                        &target,
                        attrs,
                        &[placement, "targetie", "index", "usecdn", "cdnprefix", "cdnversion"],
                    );
                    format!("<!--#Meta:{target}--><?tpl load_file([{fields}]); ?>")
                })
            }
            _ => Err(problem(
                DiagnosticKind::MalformedDirective,
                "only .js, .css and .xml targets can be loaded",
            )),
        }
    }
}

/// `'target' => '...'` followed by every non-empty attribute in `keys`
fn resource_fields(target: &str, attrs: &AttributeMap, keys: &[&str]) -> String {
    let mut fields = vec![format!("'target' => {}", quote_literal(target))];
    for key in keys {
        if let Some(value) = attrs.get(*key).filter(|v| !v.is_empty()) {
            fields.push(format!("{} => {}", quote_literal(key), quote_literal(value)));
        }
    }
    fields.join(", ")
}

fn emit_control(keyword: &str, args: &str) -> Result<String, Problem> {
    let Some(caps) = CONTROL_KEYWORD.captures(keyword) else {
        return Err(problem(
            DiagnosticKind::UnknownDirective,
            "known keywords: if, elseif, else, for, foreach, while, switch, case, default, break, end",
        ));
    };

    if let Some(block) = caps.get(1) {
        let block = block.as_str();
        if block.starts_with('e') {
            return Ok("<?tpl } ?>".to_string());
        }
        if !args.trim_start().starts_with('(') {
            return Err(problem(
                DiagnosticKind::MalformedDirective,
                "the keyword needs a parenthesized argument",
            ));
        }
        let precheck = if block == "foreach" {
            FOREACH_SUBJECT
                .captures(args)
                .map(|c| format!("if({0}&&count({0}))", &c[1]))
                .unwrap_or_default()
        } else {
            String::new()
        };
        return Ok(format!(
            "<?tpl {}{{ ?>",
            rewrite_vars(&format!("{precheck}{block}{args}"))
        ));
    }

    if let Some(branch) = caps.get(2) {
        let branch = branch.as_str();
        if branch == "elseif" && !args.trim_start().starts_with('(') {
            return Err(problem(
                DiagnosticKind::MalformedDirective,
                "elseif needs a parenthesized condition",
            ));
        }
        return Ok(format!("<?tpl }}{branch}{}{{ ?>", rewrite_vars(args)));
    }

    if let Some(label) = caps.get(4) {
        let breaks = if caps.get(3).is_some() { "break; " } else { "" };
        if label.as_str() == "default" {
            return Ok(format!("<?tpl {breaks}default: ?>"));
        }
        let value = args
            .trim()
            .trim_matches(|c| c == '(' || c == ')')
            .trim();
        if value.is_empty() {
            return Err(problem(
                DiagnosticKind::MalformedDirective,
                "case needs a value",
            ));
        }
        return Ok(format!("<?tpl {breaks}case {}: ?>", rewrite_vars(value)));
    }

    Ok("<?tpl break; ?>".to_string())
}
