#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod config;
mod logging;

use clap::Parser;
use commands::MapArgs;
use config::Config;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pinmap")]
#[command(author, version, about = "Generate import maps for CDN-hosted packages", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Import map file
    #[arg(long, global = true, value_name = "FILE", default_value = config::DEFAULT_MAP_FILE)]
    map: PathBuf,

    #[command(flatten)]
    map_args: MapArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install packages into the map (all mapped packages when none are given)
    Install {
        /// Packages: "react@18", "npm:lit@2|html.js", "./local/pkg"
        targets: Vec<String>,
    },

    /// Update packages to their latest in-range version
    Update {
        /// Package names (all when omitted)
        names: Vec<String>,
    },

    /// Remove packages from the map
    Uninstall {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Trace local modules and map what they import
    Link {
        /// Module paths, e.g. "./src/app.js"
        #[arg(required = true)]
        modules: Vec<String>,
    },

    /// Resolve a specifier through the map
    Resolve {
        /// Specifier to resolve
        specifier: String,

        /// Importing module, relative to the working directory
        #[arg(long)]
        parent: Option<String>,
    },
}

/// The `--cwd` override made absolute, or the process working directory.
fn working_dir(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(cwd) if cwd.is_absolute() => Ok(cwd),
        Some(cwd) => Ok(std::env::current_dir().into_diagnostic()?.join(cwd)),
        None => std::env::current_dir().into_diagnostic(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = working_dir(cli.cwd)?;

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_map_path(cli.map);

    if matches!(cli.command, Some(Commands::Version) | None) {
        return commands::version::run();
    }

    logging::init(config.verbosity, config.json_logs);

    let span = tracing::info_span!("pinmap", cwd = %config.cwd.display());
    let _guard = span.enter();

    match cli.command {
        Some(Commands::Install { targets }) => {
            commands::install::run(&config, &cli.map_args, &targets, cli.json)
        }
        Some(Commands::Update { names }) => {
            commands::update::run(&config, &cli.map_args, &names, cli.json)
        }
        Some(Commands::Uninstall { names }) => {
            commands::uninstall::run(&config, &cli.map_args, &names, cli.json)
        }
        Some(Commands::Link { modules }) => {
            commands::link::run(&config, &cli.map_args, &modules, cli.json)
        }
        Some(Commands::Resolve { specifier, parent }) => {
            commands::resolve::run(&config, &specifier, parent.as_deref(), cli.json)
        }
        Some(Commands::Version) | None => commands::version::run(),
    }
}
