//! `pinmap install` command implementation.
//!
//! Usage:
//! - `pinmap install react@18 lit` - Add packages to the map
//! - `pinmap install ./packages/ui` - Add a local package
//! - `pinmap install` - Reinstall the map's packages, e.g. after `--provider`

use super::{report, MapArgs, Session};
use crate::config::Config;
use miette::Result;
use tracing::info;

pub fn run(config: &Config, args: &MapArgs, targets: &[String], json: bool) -> Result<()> {
    info!(targets = ?targets, map = %config.map_path.display(), "install");
    let mut session = Session::open(config, args, json)?;
    session
        .runtime
        .block_on(session.generator.install(targets))
        .map_err(|e| report(e, json))?;
    session.finish()
}
