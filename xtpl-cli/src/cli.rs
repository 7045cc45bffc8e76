use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "xtpl", version, about = "Compile and render xtpl templates")]
pub struct Cli {
    /// JSON handler configuration
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Application root (overrides the configuration file)
    #[arg(long, global = true)]
    pub root: Option<Utf8PathBuf>,

    /// Log and skip malformed directives instead of failing
    #[arg(long, global = true)]
    pub lenient: bool,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the compiled render script of a template
    Compile {
        /// Template path, relative to the application root
        template: Utf8PathBuf,
    },
    /// Render a template and print the HTML
    Render {
        /// Template path, relative to the application root
        template: Utf8PathBuf,

        /// JSON object whose keys become template variables
        #[arg(long)]
        vars: Option<Utf8PathBuf>,

        /// A single variable as `name=value`; the value is JSON when it parses
        #[arg(long = "var", value_name = "NAME=VALUE")]
        var: Vec<String>,

        /// Render twice and report cache reuse
        #[arg(long)]
        twice: bool,
    },
    /// Show the cache key and compiled-file path of a template
    Key {
        /// Template path, relative to the application root
        template: Utf8PathBuf,
    },
}
