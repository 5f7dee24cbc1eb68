//! asmdiff CLI - compare the public surface of two .NET module sets
//!
//! Reports every property added, changed or removed between an old and a
//! new version of a set of assemblies.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::diff::DiffArgs;
use commands::snapshot::SnapshotArgs;
use config::AsmdiffConfig;
use output::{OutputConfig, OutputFormat};

/// Structural API diff for .NET assemblies.
///
/// asmdiff loads two versions of a module set into isolated contexts and
/// reports every public property that was added, changed or removed.
#[derive(Parser)]
#[command(name = "asmdiff")]
#[command(author, version)]
#[command(about = "Structural API diff for .NET assemblies")]
#[command(propagate_version = true)]
#[command(after_help = "Examples:
  asmdiff diff -s v1/ -t v2/                 Changes and deletions between two folders
  asmdiff diff -s a.dll -t b.dll --flags acd Include additions
  asmdiff diff -s v1/ -t v2/ -f IEntity      Only types implementing IEntity
  asmdiff snapshot v2/Shop.dll               Show the extracted surface")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (overrides config default)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare an old (source) and a new (target) module set
    #[command(visible_alias = "d")]
    Diff {
        /// Old version: a module file or a folder of modules
        #[arg(short, long)]
        source: PathBuf,

        /// New version: a module file or a folder of modules
        #[arg(short, long)]
        target: PathBuf,

        /// Only types named like, deriving from or implementing this type
        #[arg(short, long)]
        filter: Option<String>,

        /// Regex a module path must match to be loaded from a folder
        #[arg(short, long)]
        pattern: Option<String>,

        /// Kinds of change to report: a (additions), c (changes), d (deletions) [default: cd]
        #[arg(long)]
        flags: Option<String>,

        /// Title shown at the top of the report
        #[arg(long)]
        title: Option<String>,

        /// Also write the report as JSON into this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Show the extracted types and properties of one module set
    #[command(visible_alias = "snap")]
    Snapshot {
        /// A module file or a folder of modules
        root: PathBuf,

        /// Only types named like, deriving from or implementing this type
        #[arg(short, long)]
        filter: Option<String>,

        /// Regex a module path must match to be loaded from a folder
        #[arg(short, long)]
        pattern: Option<String>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    // Load configuration from .asmdiffrc.toml
    let config = AsmdiffConfig::load(std::path::Path::new("."));

    // Resolve output format: CLI flag > config default > Table
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format()
            .and_then(|f| f.parse().ok())
            .unwrap_or(OutputFormat::Table)
    });

    let output_config = OutputConfig::auto_detect_with_color_override(format, config.use_color());
    colored::control::set_override(output_config.use_colors());

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    match command {
        Commands::Diff {
            source,
            target,
            filter,
            pattern,
            flags,
            title,
            report_dir,
        } => commands::diff::run(
            DiffArgs {
                source,
                target,
                filter,
                pattern,
                flags,
                title,
                report_dir,
            },
            &config,
            output_config,
        ),
        Commands::Snapshot {
            root,
            filter,
            pattern,
        } => commands::snapshot::run(
            SnapshotArgs {
                root,
                filter,
                pattern,
            },
            &config,
            output_config,
        ),
    }
}
