//! Handler configuration

use crate::error::TemplateError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// What to do with compile diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticPolicy {
    /// Refuse to produce code for a template with diagnostics
    #[default]
    Strict,
    /// Log each diagnostic and keep the code compiled around it
    Lenient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerConfig {
    /// Filesystem root of the application; template paths are reported relative to it
    pub app_root: Utf8PathBuf,
    /// URL prefix the application is served under
    pub web_root: String,
    /// Compiled-file directory, relative to `app_root` unless absolute
    pub cache_dir: Utf8PathBuf,
    /// Directory of shared `@name` rulesets, relative to `app_root`
    pub ruleset_dir: String,
    /// Appended to template names given without one
    pub default_extension: String,
    /// Compiler version tag; part of every cache key
    pub version: String,
    pub max_include_depth: usize,
    pub max_loop_iterations: usize,
    pub policy: DiagnosticPolicy,
    /// Constant the compiled prologue checks for
    pub entry_constant: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            app_root: Utf8PathBuf::from("."),
            web_root: String::new(),
            cache_dir: Utf8PathBuf::from("files/cache/template_compiled"),
            ruleset_dir: "files/ruleset".to_string(),
            default_extension: "html".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_include_depth: 16,
            max_loop_iterations: crate::script::DEFAULT_MAX_ITERATIONS,
            policy: DiagnosticPolicy::Strict,
            entry_constant: "__XTPL__".to_string(),
        }
    }
}

impl HandlerConfig {
    /// Configuration rooted at `app_root`, everything else default
    pub fn with_root(app_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|e| TemplateError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| TemplateError::Config(format!("{path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.max_include_depth == 0 {
            return Err(TemplateError::Config(
                "`max_include_depth` must be at least 1".to_string(),
            ));
        }
        if self.default_extension.is_empty() || self.default_extension.contains('.') {
            return Err(TemplateError::Config(format!(
                "`default_extension` must be a bare extension, got `{}`",
                self.default_extension
            )));
        }
        if self.entry_constant.is_empty() {
            return Err(TemplateError::Config(
                "`entry_constant` must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The compiled-file directory as an absolute path under `app_root`
    pub fn cache_path(&self, app_root: &Utf8Path) -> Utf8PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            app_root.join(&self.cache_dir)
        }
    }
}
