//! `pinmap resolve` command implementation.
//!
//! Resolves a specifier through the existing map file without touching the
//! network.

use super::report;
use crate::config::Config;
use miette::{IntoDiagnostic, Result};
use pinmap_core::ImportMap;
use serde_json::{json, Value};
use url::Url;

pub fn run(config: &Config, specifier: &str, parent: Option<&str>, json: bool) -> Result<()> {
    let map_url = Url::from_file_path(&config.map_path)
        .map_err(|()| miette::miette!("Not an absolute path: {}", config.map_path.display()))?;
    let source = pinmap_util::fs::read_optional(&config.map_path).into_diagnostic()?;
    let value: Value = match source {
        Some(source) => serde_json::from_str(&source)
            .map_err(|e| miette::miette!("Failed to parse {}: {}", config.map_path.display(), e))?,
        None => json!({}),
    };
    let map = ImportMap::from_json(&value, map_url.clone(), None).map_err(|e| report(e, json))?;

    let parent_url = match parent {
        Some(parent) => {
            let cwd = Url::from_directory_path(&config.cwd)
                .map_err(|()| miette::miette!("Not an absolute path: {}", config.cwd.display()))?;
            cwd.join(parent)
                .map_err(|e| miette::miette!("Invalid parent {}: {}", parent, e))?
        }
        None => map_url,
    };

    let resolved = map
        .resolve(specifier, &parent_url)
        .map_err(|e| report(e, json))?;

    if json {
        println!(
            "{}",
            json!({
                "ok": true,
                "specifier": specifier,
                "parent": parent_url.as_str(),
                "resolved": resolved.as_ref().map(Url::as_str),
            })
        );
    } else {
        match resolved {
            Some(url) => println!("{url}"),
            None => println!("null"),
        }
    }
    Ok(())
}
