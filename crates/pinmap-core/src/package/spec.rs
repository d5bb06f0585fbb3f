//! Specifier and install target parsing.
//!
//! Handles:
//! - `react`, `react/jsx-runtime`, `@scope/name/sub`
//! - `react@16`, `npm:react@^16.8.0 || ^17`, `react@` (prereleases)
//! - `./local-pkg`, `./local-pkg|./sub`, `file:../x`, `https://...`
//! - `user/repo` (github)

use super::{InstallTarget, PackageTarget, Target};
use crate::error::{Error, Result};
use crate::range::{parse_ranges, SemverRange};
use crate::resolver::Resolver;
use pinmap_util::url::with_trailing_slash;
use url::Url;

/// Split a bare specifier into its package name and `.`-prefixed subpath.
///
/// Returns `None` for a scope without a name (`@scope`).
#[must_use]
pub fn parse_pkg(specifier: &str) -> Option<(String, String)> {
    if specifier.is_empty() {
        return None;
    }
    // `npm:@scope/name@1/sub` carries a registry prefix before the name.
    let name_start = match specifier.find(':') {
        Some(i) if !specifier[..i].contains('/') => i + 1,
        _ => 0,
    };
    let rest = &specifier[name_start..];
    let mut sep = rest.find('/');
    if rest.starts_with('@') {
        let first = sep?;
        sep = rest[first + 1..].find('/').map(|i| i + first + 1);
    }
    let sep = sep.map(|i| i + name_start);
    Some(match sep {
        None => (specifier.to_string(), ".".to_string()),
        Some(i) => (specifier[..i].to_string(), format!(".{}", &specifier[i..])),
    })
}

fn is_local(target: &str) -> bool {
    target.starts_with("./")
        || target.starts_with("../")
        || target.starts_with('/')
        || target.find(':') == Some(1)
}

fn join(base: &Url, target: &str) -> Result<Url> {
    base.join(target).map_err(|e| Error::invalid_url(target, e))
}

/// Parse a dependency target such as `^16.8.0`, `npm:react@16`, or
/// `./local`.
///
/// `pkg_name` is the dependency's key in a manifest; with it, a bare range
/// applies to that name.
///
/// # Errors
/// Returns an error for aliases, unparseable ranges and malformed names.
pub fn new_package_target(
    target: &str,
    parent_pkg_url: &Url,
    default_registry: &str,
    pkg_name: Option<&str>,
) -> Result<Target> {
    let target = if target == "." { "./" } else { target };

    if is_local(target) {
        return join(parent_pkg_url, target).map(Target::Url);
    }

    let registry_index = target.find(':');
    let registry = match registry_index {
        Some(i) if i >= 1 => &target[..i],
        _ => default_registry,
    };

    match registry {
        "file" => {
            let rest = &target[registry.len() + 1..];
            return join(parent_pkg_url, rest).map(Target::Url);
        }
        "http" | "https" => {
            return Url::parse(target)
                .map(Target::Url)
                .map_err(|e| Error::invalid_url(target, e));
        }
        _ => {}
    }

    if let Some(i) = registry_index {
        if target[..i].find('@').is_some_and(|at| at > 0) {
            return Err(Error::UnsupportedAlias(target.to_string()));
        }
    }

    let rest_start = registry_index.map_or(0, |i| i + 1);
    let rest = &target[rest_start..];
    let mut unstable = false;

    let (name, ranges) = match rest.rfind('@').filter(|&i| i > 0) {
        Some(at) => {
            let version = &rest[at + 1..];
            if version.is_empty() {
                unstable = true;
            }
            (rest[..at].to_string(), parse_ranges(version)?)
        }
        None => match pkg_name {
            Some(pkg_name) if registry_index.is_none() => {
                (pkg_name.to_string(), parse_ranges(target)?)
            }
            _ => (rest.to_string(), vec![SemverRange::wildcard()]),
        },
    };

    let registry = if registry_index.is_none() && name.contains('/') && !name.starts_with('@') {
        "github"
    } else {
        registry
    };

    let parts = name.split('/').count();
    if name.is_empty() || parts > 2 || (parts == 1 && name.starts_with('@')) {
        return Err(Error::invalid_input(format!("Invalid package target {target}")));
    }

    Ok(Target::Package(PackageTarget {
        registry: registry.to_string(),
        name,
        ranges,
        unstable,
    }))
}

/// A user install request, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// The name the package is installed under.
    pub alias: String,
    pub target: InstallTarget,
    /// `.` or `./sub`.
    pub subpath: String,
}

impl ParsedTarget {
    /// The top-level specifier this install pins: alias plus subpath.
    #[must_use]
    pub fn pin(&self) -> String {
        format!("{}{}", self.alias, &self.subpath[1..])
    }
}

fn validate_subpath(subpath: &str, specifier: &str) -> Result<()> {
    if subpath == "." || subpath.starts_with("./") {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "Install subpath \"{subpath}\" must be \".\" or start with \"./\" in {specifier}"
        )))
    }
}

/// Parse an install request: `react@16`, `@scope/pkg/sub`, `./local|./sub`.
///
/// Local packages take their alias from their manifest name, falling back to
/// the last path segment.
///
/// # Errors
/// Returns an error for malformed specifiers or subpaths.
pub async fn parse_target(
    resolver: &Resolver,
    specifier: &str,
    parent_pkg_url: &Url,
    default_registry: &str,
) -> Result<ParsedTarget> {
    if is_local(specifier) || specifier.starts_with("file:") {
        let (location, subpath) = match specifier.split_once('|') {
            Some((location, subpath)) => (location, subpath.to_string()),
            None => (specifier, ".".to_string()),
        };
        validate_subpath(&subpath, specifier)?;

        let location = location.strip_prefix("file:").unwrap_or(location);
        let pkg_url = join(parent_pkg_url, &with_trailing_slash(location))?;
        let manifest_name = resolver
            .get_package_config(pkg_url.as_str())
            .await?
            .and_then(|pcfg| pcfg.name.clone());
        let alias = match manifest_name {
            Some(name) => name,
            None => pkg_url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(String::from)
                .ok_or_else(|| {
                    Error::invalid_input(format!("Unable to determine an alias for {specifier}"))
                })?,
        };

        return Ok(ParsedTarget {
            alias,
            target: InstallTarget::new(Target::Url(pkg_url)),
            subpath,
        });
    }

    // `lit@2|html.js` names the subpath explicitly.
    let (pkg_spec, explicit_subpath) = match specifier.split_once('|') {
        Some((pkg_spec, subpath)) => {
            let subpath = if subpath.is_empty() || subpath == "." || subpath.starts_with("./") {
                subpath.to_string()
            } else {
                format!("./{subpath}")
            };
            (pkg_spec, Some(subpath))
        }
        None => (specifier, None),
    };

    let (pkg_name, parsed_subpath) = parse_pkg(pkg_spec)
        .ok_or_else(|| Error::invalid_input(format!("Invalid package name {specifier}")))?;
    let subpath = match explicit_subpath {
        Some(subpath) if parsed_subpath == "." => subpath,
        Some(_) => {
            return Err(Error::invalid_input(format!(
                "Install subpath given twice in {specifier}"
            )))
        }
        None => parsed_subpath,
    };
    validate_subpath(&subpath, specifier)?;

    let target = new_package_target(&pkg_name, parent_pkg_url, default_registry, None)?;
    let alias = match &target {
        Target::Package(pkg) => pkg.name.clone(),
        Target::Url(_) => pkg_name.clone(),
    };

    Ok(ParsedTarget {
        alias,
        target: InstallTarget::new(target),
        subpath,
    })
}
