//! `pinmap link` command implementation.
//!
//! Traces local modules (`./src/app.js`) and maps everything they import,
//! without adding the modules themselves as top-level imports.

use super::{report, MapArgs, Session};
use crate::config::Config;
use miette::Result;
use tracing::info;

pub fn run(config: &Config, args: &MapArgs, modules: &[String], json: bool) -> Result<()> {
    info!(modules = ?modules, map = %config.map_path.display(), "link");
    let mut session = Session::open(config, args, json)?;
    session
        .runtime
        .block_on(session.generator.link(modules))
        .map_err(|e| report(e, json))?;
    session.finish()
}
