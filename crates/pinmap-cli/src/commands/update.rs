use super::{report, MapArgs, Session};
use crate::config::Config;
use miette::Result;
use tracing::info;

/// Move the named packages, or all of them, to their latest in-range version.
pub fn run(config: &Config, args: &MapArgs, names: &[String], json: bool) -> Result<()> {
    info!(names = ?names, map = %config.map_path.display(), "update");
    let mut session = Session::open(config, args, json)?;
    session
        .runtime
        .block_on(session.generator.update(names))
        .map_err(|e| report(e, json))?;
    session.finish()
}
