//! Package identities and install targets.

pub mod manifest;
pub mod spec;

pub use manifest::PackageConfig;
pub use spec::{new_package_target, parse_pkg, parse_target, ParsedTarget};

use crate::range::SemverRange;
use std::fmt;
use url::Url;

/// A concrete package version on a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactPackage {
    pub registry: String,
    pub name: String,
    pub version: String,
}

impl ExactPackage {
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// The version as semver, when it is one.
    #[must_use]
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

impl fmt::Display for ExactPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.registry, self.name, self.version)
    }
}

/// A package name with one or more acceptable ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTarget {
    pub registry: String,
    pub name: String,
    pub ranges: Vec<SemverRange>,
    /// Prereleases are acceptable.
    pub unstable: bool,
}

impl PackageTarget {
    /// `registry:name@*`.
    #[must_use]
    pub fn wildcard(registry: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            ranges: vec![SemverRange::wildcard()],
            unstable: false,
        }
    }

    /// Whether any range admits `version`.
    #[must_use]
    pub fn admits(&self, version: &str, unstable: bool) -> bool {
        self.ranges.iter().any(|r| r.has_str(version, unstable))
    }

    /// The ranges joined with ` || `.
    #[must_use]
    pub fn range_string(&self) -> String {
        self.ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" || ")
    }
}

impl fmt::Display for PackageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.registry, self.name, self.range_string())
    }
}

/// What a name installs: a registry range or a fixed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Package(PackageTarget),
    Url(Url),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package(pkg) => pkg.fmt(f),
            Self::Url(url) => f.write_str(url.as_str()),
        }
    }
}

/// A target plus the export subpath a name maps to inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub target: Target,
    pub install_subpath: Option<String>,
}

impl InstallTarget {
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            target,
            install_subpath: None,
        }
    }

    #[must_use]
    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.install_subpath = Some(subpath.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_display() {
        let pkg = ExactPackage::new("npm", "react", "16.14.0");
        assert_eq!(pkg.to_string(), "npm:react@16.14.0");
        assert_eq!(pkg.semver().unwrap().major, 16);
    }

    #[test]
    fn test_target_display_and_admits() {
        let target = PackageTarget {
            registry: "npm".into(),
            name: "react".into(),
            ranges: crate::range::parse_ranges("^16.8.0 || ^17").unwrap(),
            unstable: false,
        };
        assert_eq!(target.to_string(), "npm:react@^16.8.0 || ^17");
        assert!(target.admits("17.0.2", false));
        assert!(!target.admits("18.0.0", false));
        assert!(!target.admits("17.1.0-rc.1", false));
        assert!(target.admits("17.1.0-rc.1", true));
    }
}
