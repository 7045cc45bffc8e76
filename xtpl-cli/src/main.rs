use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use owo_colors::OwoColorize;
use std::sync::Arc;
use xtpl::{
    DiagnosticPolicy, HandlerConfig, MemoryCache, RenderContext, ResourceEvent, ResourceLog,
    TemplateHandler, Value,
};

mod cli;
mod logging;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Compile { template } => {
            let handler = TemplateHandler::new(config)?;
            let (dir, file) = split_template(&template)?;
            let code = handler.compile_direct(dir, file)?;
            println!("{code}");
        }
        Commands::Render {
            template,
            vars,
            var,
            twice,
        } => {
            let mut handler = TemplateHandler::new(config)?;
            if twice {
                handler = handler.with_cache(Arc::new(MemoryCache::new()));
            }
            let (dir, file) = split_template(&template)?;
            let mut ctx = build_context(vars.as_deref(), &var)?;
            let mut resources = ResourceLog::new();

            let html = handler.compile(dir, file, &mut ctx, &mut resources)?;
            if twice {
                handler.compile(dir, file, &mut ctx, &mut ResourceLog::new())?;
            }
            println!("{html}");

            print_resources(&resources);
            let stats = handler.stats();
            eprintln!(
                "{} compiled {}, reused {}, {:?}",
                "stats:".bright_black(),
                stats.compiled().bright_cyan(),
                stats.reused().bright_cyan(),
                stats.elapsed()
            );
        }
        Commands::Key { template } => {
            let handler = TemplateHandler::new(config)?;
            let (dir, file) = split_template(&template)?;
            let unit = handler.resolve(dir, file)?;
            println!("{} {}", "source:".bright_black(), unit.path);
            println!("{} {:016x}", "identity:".bright_black(), unit.hash);
            println!("{} {}", "cache key:".bright_black(), unit.cache_key().bright_green());
            println!(
                "{} {}",
                "compiled file:".bright_black(),
                unit.compiled_file(handler.cache_dir())
            );
            println!("{} {}", "tpl_path:".bright_black(), unit.tpl_path());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<HandlerConfig> {
    let mut config = match &cli.config {
        Some(path) => HandlerConfig::from_json_file(path)?,
        None => HandlerConfig::with_root("."),
    };
    if let Some(root) = &cli.root {
        config.app_root = root.clone();
    }
    if cli.lenient {
        config.policy = DiagnosticPolicy::Lenient;
    }
    Ok(config)
}

/// `a/b/c.html` -> (`a/b`, `c.html`)
fn split_template(template: &Utf8Path) -> Result<(&Utf8Path, &str)> {
    let file = template
        .file_name()
        .ok_or_else(|| miette!("`{template}` does not name a template file"))?;
    let dir = template.parent().unwrap_or(Utf8Path::new("."));
    let dir = if dir.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        dir
    };
    Ok((dir, file))
}

fn build_context(vars: Option<&Utf8Path>, pairs: &[String]) -> Result<RenderContext> {
    let mut ctx = match vars {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading `{path}`"))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .into_diagnostic()
                .wrap_err_with(|| format!("parsing `{path}`"))?;
            if !json.is_object() {
                return Err(miette!("`{path}` must hold a JSON object"));
            }
            RenderContext::from_json(json)
        }
        None => RenderContext::new(),
    };

    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| miette!("`--var {pair}` is not NAME=VALUE"))?;
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw));
        ctx.set(name, value);
    }
    Ok(ctx)
}

fn print_resources(log: &ResourceLog) {
    for event in &log.events {
        tracing::debug!(target: "xtpl::resources", "{}", describe_resource(event));
    }
}

fn describe_resource(event: &ResourceEvent) -> String {
    let line = match event {
        ResourceEvent::Load(req) => format!("load {} {}", req.target, req.placement),
        ResourceEvent::Unload { target, .. } => format!("unload {target}"),
        ResourceEvent::JsPlugin(name) => format!("js plugin {name}"),
        ResourceEvent::Lang(dir) => format!("lang {dir}"),
        ResourceEvent::XmlFilter { dir, file } => {
            format!("xml filter {}", Utf8PathBuf::from(dir).join(file))
        }
        ResourceEvent::Ruleset(path) => format!("ruleset {path}"),
    };
    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_lines() {
        assert_eq!(
            describe_resource(&ResourceEvent::XmlFilter {
                dir: "modules/board/tpl".into(),
                file: "insert.xml".into(),
            }),
            "xml filter modules/board/tpl/insert.xml"
        );
        assert_eq!(
            describe_resource(&ResourceEvent::Lang("modules/board/lang".into())),
            "lang modules/board/lang"
        );
        assert_eq!(describe_resource(&ResourceEvent::JsPlugin("ui".into())), "js plugin ui");
    }
}
