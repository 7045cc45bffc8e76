//! The compilation pipeline
//!
//! One template source goes through every stage in a fixed order, each
//! consuming and producing a whole buffer:
//!
//! 1. strip `<!--// ... -->` comments
//! 2. rewrite relative asset `src` attributes against the template's web path
//! 3. tag scopes (`loop`/`cond` attributes)
//! 4. directives (brace expressions, resource directives, comment control flow)
//! 5. strip `<block>` wrappers and leftover comments
//! 6. form augmentation
//! 7. prepend the entry-point guard
//!
//! Problems found along the way are collected as [`CompileDiagnostic`]s next
//! to the compiled code; the caller decides whether they are fatal.

use crate::directive::compile_directives;
use crate::error::{CompileDiagnostic, DiagnosticKind, Stage};
use crate::form::augment_forms;
use crate::paths::{PathResolver, rewrite_asset_sources};
use crate::tag_scope::compile_tag_scopes;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;

static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--//.*?-->").unwrap());

static BLOCK_AND_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)</?block\s*>|\s?<!--//.*?-->").unwrap());

/// Collects diagnostics for one template, tagged with the stage that raised them
#[derive(Debug)]
pub struct Diagnostics {
    file: Utf8PathBuf,
    stage: Stage,
    items: Vec<CompileDiagnostic>,
}

impl Diagnostics {
    pub fn new(file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            file: file.into(),
            stage: Stage::TagScope,
            items: Vec::new(),
        }
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Record a problem at `offset` into the current stage's input;
    /// [`relocate`](Self::relocate) maps it back to the source
    pub fn push(&mut self, kind: DiagnosticKind, offset: usize, text: &str, help: Option<&str>) {
        tracing::debug!(%kind, stage = %self.stage, offset, "compile diagnostic");
        self.items.push(CompileDiagnostic {
            kind,
            stage: self.stage,
            file: self.file.clone(),
            offset,
            text: text.to_string(),
            help: help.map(str::to_string),
        });
    }

    /// Move the current stage's offsets from `stage_input` into `source`.
    ///
    /// The n-th occurrence of a diagnostic's text in the stage input is the
    /// n-th occurrence in the source. Text an earlier stage rewrote is not in
    /// the source; it keeps its stage offset.
    pub fn relocate(&mut self, stage_input: &str, source: &str) {
        let stage = self.stage;
        for item in self
            .items
            .iter_mut()
            .filter(|d| d.stage == stage && !d.text.is_empty())
        {
            let text = item.text.as_str();
            let nth = stage_input
                .match_indices(text)
                .take_while(|(at, _)| *at < item.offset)
                .count();
            if let Some((at, _)) = source.match_indices(text).nth(nth) {
                item.offset = at;
            }
        }
    }

    pub fn items(&self) -> &[CompileDiagnostic] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<CompileDiagnostic> {
        self.items
    }
}

/// The result of compiling one template
#[derive(Debug)]
pub struct Compilation {
    /// The render script
    pub code: String,
    /// Everything that was skipped along the way; empty for a clean compile
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl Compilation {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Where the template being compiled lives
#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    /// Canonical path of the template
    pub path: &'a Utf8Path,
    /// Browser-visible directory of the template, ending in `/`
    pub web_path: &'a str,
}

/// Runs the compilation stages with a fixed set of settings
#[derive(Debug, Clone)]
pub struct Compiler {
    resolver: PathResolver,
    ruleset_dir: String,
    entry_constant: String,
}

impl Compiler {
    pub fn new(
        resolver: PathResolver,
        ruleset_dir: impl Into<String>,
        entry_constant: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            ruleset_dir: ruleset_dir.into(),
            entry_constant: entry_constant.into(),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// The guard every compiled artifact starts with
    pub fn prologue(&self) -> String {
        format!("<?tpl if (!defined('{}')) exit; ?>", self.entry_constant)
    }

    /// Compile `source`, the text of `file`
    pub fn compile(&self, file: SourceFile<'_>, source: &str) -> Compilation {
        let mut diags = Diagnostics::new(file.path);
        tracing::debug!(path = %file.path, bytes = source.len(), "compiling");

        let buf = LINE_COMMENT.replace_all(source, "");
        let buf = rewrite_asset_sources(&buf, file.web_path);

        diags.set_stage(Stage::TagScope);
        let scoped = compile_tag_scopes(&buf, &mut diags);
        diags.relocate(&buf, source);

        diags.set_stage(Stage::Directives);
        let buf = compile_directives(&scoped, file.path, &self.resolver, &mut diags);
        diags.relocate(&scoped, source);

        let buf = BLOCK_AND_COMMENT.replace_all(&buf, "");

        diags.set_stage(Stage::Forms);
        let template_rel = self.resolver.relative_to_root(file.path);
        let formed = augment_forms(&buf, &template_rel, &self.ruleset_dir, &mut diags);
        diags.relocate(&buf, source);
        let buf = formed;

        let mut code = self.prologue();
        code.push_str(&buf);
        Compilation {
            code,
            diagnostics: diags.into_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn compiler() -> (tempfile::TempDir, Compiler, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        fs::create_dir_all(root.join("modules/page/tpl")).unwrap();
        let tpl = root.join("modules/page/tpl/index.html");
        fs::write(&tpl, "").unwrap();
        let compiler = Compiler::new(PathResolver::new(root), "files/ruleset", "__XTPL__");
        (dir, compiler, tpl)
    }

    fn compile(src: &str) -> Compilation {
        let (_dir, compiler, tpl) = compiler();
        compiler.compile(
            SourceFile {
                path: &tpl,
                web_path: "/modules/page/tpl/",
            },
            src,
        )
    }

    #[test]
    fn prologue_comes_first() {
        let out = compile("hello");
        assert_eq!(out.code, "<?tpl if (!defined('__XTPL__')) exit; ?>hello");
        assert!(out.is_clean());
    }

    #[test]
    fn line_comments_leave_no_residue() {
        let out = compile("a<!--// note -->b <!--// multi\nline -->c");
        assert!(out.code.ends_with("ab c"), "{}", out.code);
    }

    #[test]
    fn block_wrappers_are_removed() {
        let out = compile(r#"<block cond="$a">x</block>"#);
        assert!(
            out.code.ends_with("<?tpl if ($__ctx->a) { ?>x<?tpl } ?>"),
            "{}",
            out.code
        );
    }

    #[test]
    fn stages_compose() {
        let out = compile(r#"<ul><li loop="$items=>$it"><img src="i.png">{$it}</li></ul>"#);
        assert_eq!(
            out.code,
            "<?tpl if (!defined('__XTPL__')) exit; ?><ul><?tpl if ($__ctx->items && count($__ctx->items)) foreach ($__ctx->items as $__ctx->it) { ?><li><img src=\"/modules/page/tpl/i.png\"><?tpl echo $__ctx->it ?></li><?tpl } ?></ul>"
        );
    }

    #[test]
    fn deterministic() {
        let src = r#"<form action="./"><p cond="$x">{$y}</p></form>"#;
        assert_eq!(compile(src).code, compile(src).code);
    }

    #[test]
    fn offsets_point_into_the_source() {
        let src = r#"<!--// note --><p cond="$a">x</p><!--@bogus--><form ruleset="@"></form>"#;
        let out = compile(src);
        assert_eq!(out.diagnostics.len(), 2);
        assert_eq!(out.diagnostics[0].offset, src.find("<!--@bogus").unwrap());
        assert_eq!(out.diagnostics[0].stage, Stage::Directives);
        assert_eq!(out.diagnostics[1].kind, DiagnosticKind::UnresolvedPath);
        assert_eq!(out.diagnostics[1].offset, src.find("ruleset=").unwrap());
    }

    #[test]
    fn repeated_text_maps_to_the_matching_occurrence() {
        let src = r#"<p cond="$a"><!--@if($x)-->a<!--@end--></p><!--@end-->"#;
        let out = compile(src);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::UnbalancedTag);
        assert_eq!(out.diagnostics[0].offset, src.rfind("<!--@end-->").unwrap());
    }

    #[test]
    fn diagnostics_carry_their_stage() {
        let out = compile("<!--@bogus-->");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].stage, Stage::Directives);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::UnknownDirective);
    }
}
