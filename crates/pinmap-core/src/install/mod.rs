//! Install decisions and the lock table.

pub mod installer;
pub mod lock;

pub use installer::{Installer, InstallerOptions};
pub use lock::{
    extract_lock_constraints_and_map, package_target_from_exact, to_package_target_map,
    ExtractedLocks, FlatResolution, InstalledResolution, LockResolutions, PackageConstraint,
    VersionConstraints,
};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How eagerly installs move to newer versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMode {
    /// Reuse any compatible lock; resolve new versions only when none fits.
    #[default]
    Default,
    /// Resolve top-level installs to their latest in-range version.
    LatestPrimaries,
    /// Resolve every install to its latest in-range version.
    LatestAll,
    /// Never move an existing lock.
    Freeze,
}

impl InstallMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::LatestPrimaries => "latest-primaries",
            Self::LatestAll => "latest-all",
            Self::Freeze => "freeze",
        }
    }

    /// Whether an install at this level skips lock reuse and asks the
    /// registry.
    #[must_use]
    pub fn uses_latest(self, top_level: bool) -> bool {
        match self {
            Self::LatestAll => true,
            Self::LatestPrimaries => top_level,
            Self::Default | Self::Freeze => false,
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "latest-primaries" => Ok(Self::LatestPrimaries),
            "latest-all" => Ok(Self::LatestAll),
            "freeze" => Ok(Self::Freeze),
            other => Err(Error::invalid_input(format!("Unknown install mode \"{other}\""))),
        }
    }
}
