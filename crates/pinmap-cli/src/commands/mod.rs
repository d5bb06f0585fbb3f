pub mod install;
pub mod link;
pub mod resolve;
pub mod uninstall;
pub mod update;
pub mod version;

use crate::config::Config;
use miette::{IntoDiagnostic, Result};
use pinmap_core::{Generator, GeneratorConfig};
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

/// Generator flags shared by the map commands.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct MapArgs {
    /// Export conditions, comma separated (default: browser,development,module,import)
    #[arg(long, global = true, value_delimiter = ',')]
    pub env: Vec<String>,

    /// Default provider, optionally with a layer (e.g. "jspm.system", "unpkg")
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Never change existing locks
    #[arg(long, global = true, conflicts_with = "latest")]
    pub freeze: bool,

    /// Resolve every package to its latest in-range version
    #[arg(long, global = true)]
    pub latest: bool,

    /// Add integrity hashes for traced modules
    #[arg(long, global = true)]
    pub integrity: bool,

    /// Only follow static imports
    #[arg(long = "static", global = true)]
    pub static_trace: bool,

    /// Print the map instead of writing it
    #[arg(long, global = true)]
    pub stdout: bool,
}

/// Convert a core error into a diagnostic carrying its code.
pub fn report(err: pinmap_core::Error, json: bool) -> miette::Report {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": false,
                "error": {"code": err.code(), "message": err.to_string()}
            })
        );
    }
    miette::miette!(code = err.code(), "{err}")
}

fn dir_url(path: &Path) -> Result<Url> {
    Url::from_directory_path(path)
        .map_err(|()| miette::miette!("Not an absolute directory path: {}", path.display()))
}

/// Build the generator config for `config` and `args`, loading the existing
/// map as input.
pub fn generator_config(config: &Config, args: &MapArgs) -> Result<GeneratorConfig> {
    let map_url = Url::from_file_path(&config.map_path)
        .map_err(|()| miette::miette!("Not an absolute path: {}", config.map_path.display()))?;

    let mut generator_config = GeneratorConfig::new(map_url)
        .with_base_url(dir_url(&config.cwd)?)
        .with_freeze(args.freeze)
        .with_latest(args.latest)
        .with_integrity(args.integrity)
        .with_static_trace(args.static_trace);
    if !args.env.is_empty() {
        generator_config = generator_config.with_env(args.env.iter().cloned());
    }
    if let Some(provider) = &args.provider {
        generator_config = generator_config.with_default_provider(provider.clone());
    }

    if let Some(source) = pinmap_util::fs::read_optional(&config.map_path).into_diagnostic()? {
        let input: serde_json::Value = serde_json::from_str(&source)
            .map_err(|e| miette::miette!("Failed to parse {}: {}", config.map_path.display(), e))?;
        debug!(path = %config.map_path.display(), "loaded existing map");
        generator_config = generator_config.with_input_map(input);
    }
    Ok(generator_config)
}

/// One generator run: a runtime, the generator, and where its map goes.
pub struct Session {
    pub runtime: Runtime,
    pub generator: Generator,
    config: Config,
    stdout: bool,
    json: bool,
}

impl Session {
    pub fn open(config: &Config, args: &MapArgs, json: bool) -> Result<Self> {
        let runtime = Runtime::new().into_diagnostic()?;
        let generator = Generator::new(generator_config(config, args)?).map_err(|e| report(e, json))?;
        Ok(Self {
            runtime,
            generator,
            config: config.clone(),
            stdout: args.stdout,
            json,
        })
    }

    /// Write the map (or print it with `--stdout`).
    pub fn finish(&self) -> Result<()> {
        let map = self.generator.get_map();
        let mut text = serde_json::to_string_pretty(&map).into_diagnostic()?;
        text.push('\n');

        if self.stdout {
            print!("{text}");
            return Ok(());
        }

        pinmap_util::fs::atomic_write(&self.config.map_path, text.as_bytes())
            .map_err(|e| miette::miette!("Failed to write {}: {}", self.config.map_path.display(), e))?;

        let info = self.generator.trace_info();
        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "ok": true,
                    "map": self.config.map_path.display().to_string(),
                    "trace": info,
                })
            );
        } else {
            eprintln!(
                "Wrote {} ({} static, {} dynamic modules)",
                self.config.map_path.display(),
                info.static_deps.len(),
                info.dynamic_deps.len()
            );
        }
        Ok(())
    }
}
