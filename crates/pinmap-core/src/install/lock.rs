//! The lock table: which package URL every name resolves to, per scope.
//!
//! Primary locks live at the root of the map, secondary locks under the
//! package scope that depends on them, and flattened locks under an origin
//! root scope shared by many packages. Every stored URL is a package base
//! ending in `/`.

use crate::error::{Error, Result};
use crate::importmap::ImportMap;
use crate::package::{new_package_target, parse_pkg, ExactPackage, InstallTarget, PackageConfig, PackageTarget};
use crate::range::SemverRange;
use crate::resolver::Resolver;
use pinmap_util::url::{is_mappable_scheme, is_plain, origin_root, with_trailing_slash};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// A locked package base plus the export subpath the name maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledResolution {
    pub install_url: Url,
    pub install_subpath: Option<String>,
}

impl InstalledResolution {
    #[must_use]
    pub fn new(install_url: Url) -> Self {
        Self {
            install_url,
            install_subpath: None,
        }
    }

    #[must_use]
    pub fn with_subpath(mut self, subpath: Option<String>) -> Self {
        self.install_subpath = subpath;
        self
    }
}

impl fmt::Display for InstalledResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.install_subpath {
            Some(subpath) => write!(f, "{}|{subpath}", self.install_url),
            None => f.write_str(self.install_url.as_str()),
        }
    }
}

/// A lock hoisted to an origin root scope, valid for one export subpath
/// (or a `/`-terminated subpath prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatResolution {
    pub export_subpath: String,
    pub resolution: InstalledResolution,
}

fn check_scope(scope: &str) -> Result<()> {
    if scope.ends_with('/') {
        Ok(())
    } else {
        Err(Error::internal(format!("package scope {scope} must end in '/'")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockResolutions {
    pub primary: BTreeMap<String, InstalledResolution>,
    pub secondary: BTreeMap<String, BTreeMap<String, InstalledResolution>>,
    pub flattened: BTreeMap<String, BTreeMap<String, Vec<FlatResolution>>>,
}

impl LockResolutions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `name` at top level or under `scope`.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] for a scope without its trailing `/`.
    pub fn get_resolution(
        &self,
        name: &str,
        scope: Option<&str>,
    ) -> Result<Option<&InstalledResolution>> {
        match scope {
            None => Ok(self.primary.get(name)),
            Some(scope) => {
                check_scope(scope)?;
                Ok(self.secondary.get(scope).and_then(|locks| locks.get(name)))
            }
        }
    }

    /// Store a lock. Returns whether the table changed.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when the scope or the install URL lacks its
    /// trailing `/`.
    pub fn set_resolution(
        &mut self,
        name: &str,
        resolution: InstalledResolution,
        scope: Option<&str>,
    ) -> Result<bool> {
        if !resolution.install_url.as_str().ends_with('/') {
            return Err(Error::internal(format!(
                "install URL {} for {name} must end in '/'",
                resolution.install_url
            )));
        }
        let locks = match scope {
            None => &mut self.primary,
            Some(scope) => {
                check_scope(scope)?;
                self.secondary.entry(scope.to_string()).or_default()
            }
        };
        if locks.get(name) == Some(&resolution) {
            return Ok(false);
        }
        locks.insert(name.to_string(), resolution);
        Ok(true)
    }

    pub fn remove_primary(&mut self, name: &str) -> Option<InstalledResolution> {
        self.primary.remove(name)
    }

    pub fn add_flattened(&mut self, scope: &str, name: &str, flat: FlatResolution) {
        let entries = self
            .flattened
            .entry(scope.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();
        if !entries.contains(&flat) {
            entries.push(flat);
        }
    }

    /// A flattened lock applying to `name` imported at `subpath` from a
    /// package under `pkg_scope`. Deeper flattened scopes win.
    #[must_use]
    pub fn get_flattened_resolution(
        &self,
        name: &str,
        pkg_scope: &str,
        subpath: &str,
    ) -> Option<&InstalledResolution> {
        self.flattened
            .iter()
            .rev()
            .filter(|(scope, _)| pkg_scope.starts_with(scope.as_str()))
            .filter_map(|(_, names)| names.get(name))
            .flatten()
            .find(|flat| {
                flat.export_subpath == subpath
                    || (flat.export_subpath.ends_with('/')
                        && subpath.starts_with(flat.export_subpath.as_str()))
            })
            .map(|flat| &flat.resolution)
    }

    /// Merge `other`; its locks win.
    pub fn extend(&mut self, other: LockResolutions) {
        self.primary.extend(other.primary);
        for (scope, locks) in other.secondary {
            self.secondary.entry(scope).or_default().extend(locks);
        }
        for (scope, names) in other.flattened {
            for (name, flats) in names {
                for flat in flats {
                    self.add_flattened(&scope, &name, flat);
                }
            }
        }
    }

    /// Every `(scope, name, lock)`, primaries with no scope.
    #[must_use]
    pub fn entries(&self) -> Vec<(Option<&str>, &str, &InstalledResolution)> {
        let primary = self
            .primary
            .iter()
            .map(|(name, res)| (None, name.as_str(), res));
        let secondary = self.secondary.iter().flat_map(|(scope, locks)| {
            locks
                .iter()
                .map(move |(name, res)| (Some(scope.as_str()), name.as_str(), res))
        });
        primary.chain(secondary).collect()
    }

    /// Every distinct locked package URL, flattened locks included.
    #[must_use]
    pub fn install_urls(&self) -> Vec<&Url> {
        let mut urls: Vec<&Url> = self
            .entries()
            .into_iter()
            .map(|(_, _, res)| &res.install_url)
            .chain(
                self.flattened
                    .values()
                    .flat_map(BTreeMap::values)
                    .flatten()
                    .map(|flat| &flat.resolution.install_url),
            )
            .collect();
        urls.sort();
        urls.dedup();
        urls
    }
}

/// A range an install requested, remembered for later upgrade decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConstraint {
    pub alias: String,
    pub scope: Option<String>,
    pub target: PackageTarget,
}

/// Requested ranges per installed alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraints {
    pub primary: BTreeMap<String, PackageTarget>,
    pub secondary: BTreeMap<String, BTreeMap<String, PackageTarget>>,
}

impl VersionConstraints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, alias: &str, target: PackageTarget, scope: Option<&str>) {
        match scope {
            None => {
                self.primary.insert(alias.to_string(), target);
            }
            Some(scope) => {
                self.secondary
                    .entry(scope.to_string())
                    .or_default()
                    .insert(alias.to_string(), target);
            }
        }
    }

    /// Every constraint on `registry:name`, under any alias.
    #[must_use]
    pub fn constraints_for(&self, registry: &str, name: &str) -> Vec<PackageConstraint> {
        let matches = |target: &PackageTarget| target.registry == registry && target.name == name;
        let primary = self
            .primary
            .iter()
            .filter(|(_, target)| matches(target))
            .map(|(alias, target)| PackageConstraint {
                alias: alias.clone(),
                scope: None,
                target: target.clone(),
            });
        let secondary = self.secondary.iter().flat_map(|(scope, targets)| {
            targets
                .iter()
                .filter(|(_, target)| matches(target))
                .map(move |(alias, target)| PackageConstraint {
                    alias: alias.clone(),
                    scope: Some(scope.clone()),
                    target: target.clone(),
                })
        });
        primary.chain(secondary).collect()
    }

    pub fn extend(&mut self, other: VersionConstraints) {
        self.primary.extend(other.primary);
        for (scope, targets) in other.secondary {
            self.secondary.entry(scope).or_default().extend(targets);
        }
    }
}

/// Dependency targets declared by a manifest. `devDependencies` only count
/// for the top-level package.
///
/// A name declared in several sections takes the target of the last of
/// `peerDependencies`, `optionalDependencies`, `dependencies`,
/// `devDependencies`.
///
/// Unparseable entries are skipped; a broken range in some transitive
/// manifest must not fail the install.
#[must_use]
pub fn to_package_target_map(
    pcfg: &PackageConfig,
    pkg_url: &Url,
    default_registry: &str,
    include_dev: bool,
) -> BTreeMap<String, InstallTarget> {
    let mut sections = vec![
        &pcfg.peer_dependencies,
        &pcfg.optional_dependencies,
        &pcfg.dependencies,
    ];
    if include_dev {
        sections.push(&pcfg.dev_dependencies);
    }

    let mut targets = BTreeMap::new();
    for deps in sections {
        for (name, target) in deps {
            match new_package_target(target, pkg_url, default_registry, Some(name)) {
                Ok(target) => {
                    targets.insert(name.clone(), InstallTarget::new(target));
                }
                Err(e) => {
                    debug!(package = %name, target = %target, manifest = %pkg_url, error = %e, "skipping dependency");
                }
            }
        }
    }
    targets
}

/// The range a lock implies: `^version` for stable releases, the exact
/// version for prereleases and non-semver versions.
#[must_use]
pub fn package_target_from_exact(pkg: &ExactPackage) -> PackageTarget {
    let (ranges, unstable) = match pkg.semver() {
        Some(version) if version.pre.is_empty() => (vec![SemverRange::caret(&version)], false),
        Some(version) => (vec![SemverRange::exact(&version)], true),
        None => (
            vec![SemverRange::parse(&pkg.version).unwrap_or_else(|_| SemverRange::wildcard())],
            false,
        ),
    };
    PackageTarget {
        registry: pkg.registry.clone(),
        name: pkg.name.clone(),
        ranges,
        unstable,
    }
}

/// An input map split into locks, constraints and the mappings that are not
/// locks.
#[derive(Debug, Clone)]
pub struct ExtractedLocks {
    pub locks: LockResolutions,
    pub constraints: VersionConstraints,
    /// Custom mappings, kept verbatim.
    pub residual: ImportMap,
}

struct Lockable {
    pkg_name: String,
    subpath: String,
    pkg: ExactPackage,
    resolution: InstalledResolution,
}

/// Whether `key -> target` is a standard package mapping: a provider URL
/// reached through the export named by the key's subpath.
async fn lockable(resolver: &Resolver, key: &str, target: &Url) -> Result<Option<Lockable>> {
    if key.starts_with('#') || key.ends_with('/') || (!is_plain(key) && !is_mappable_scheme(key)) {
        return Ok(None);
    }
    if target.scheme() == "node" {
        return Ok(None);
    }
    let Some((pkg_name, subpath)) = parse_pkg(key) else {
        return Ok(None);
    };
    let Some((provider, parsed)) = resolver.parse_url_pkg(target.as_str()) else {
        return Ok(None);
    };
    let pkg_url = resolver.pkg_to_url(&parsed.pkg, &provider)?;
    let file = parsed.subpath.as_deref().unwrap_or(".");
    let Some(export) = resolver.get_export_resolution(&pkg_url, file).await? else {
        return Ok(None);
    };

    let install_subpath = if export == subpath {
        None
    } else if subpath == "." {
        Some(export)
    } else {
        return Ok(None);
    };

    Ok(Some(Lockable {
        pkg_name,
        subpath,
        pkg: parsed.pkg,
        resolution: InstalledResolution::new(pkg_url).with_subpath(install_subpath),
    }))
}

async fn declared_targets(
    resolver: &Resolver,
    pkg_url: &Url,
    default_registry: &str,
    include_dev: bool,
) -> Result<BTreeMap<String, InstallTarget>> {
    let pcfg = resolver
        .get_package_config(pkg_url.as_str())
        .await?
        .unwrap_or_default();
    Ok(to_package_target_map(&pcfg, pkg_url, default_registry, include_dev))
}

fn constraint_for(
    declared: &BTreeMap<String, InstallTarget>,
    name: &str,
    pkg: &ExactPackage,
) -> PackageTarget {
    match declared.get(name).map(|t| &t.target) {
        Some(crate::package::Target::Package(target)) => target.clone(),
        _ => package_target_from_exact(pkg),
    }
}

/// Decompose an input map into locks, constraints and residual mappings.
///
/// Top-level package mappings become primary locks, mappings in package
/// scopes become secondary locks, and mappings in origin root scopes become
/// flattened locks. Constraints come from the declaring manifest, else from
/// the locked version.
///
/// # Errors
/// Returns manifest fetch errors and invalid lock URLs.
pub async fn extract_lock_constraints_and_map(
    map: &ImportMap,
    resolver: &Resolver,
    base_url: &Url,
    default_registry: &str,
) -> Result<ExtractedLocks> {
    let mut locks = LockResolutions::new();
    let mut constraints = VersionConstraints::new();
    let mut residual =
        ImportMap::new(map.base_url().clone()).with_root_url(map.root_url().cloned());
    residual.integrity = map.integrity.clone();
    residual.depcache = map.depcache.clone();

    let base_declared = declared_targets(resolver, base_url, default_registry, true).await?;

    for (key, target) in &map.imports {
        let resolved = target.as_deref().and_then(|t| map.resolve_target(t));
        let lock = match &resolved {
            Some(url) => lockable(resolver, key, url).await?,
            None => None,
        };
        let Some(lock) = lock else {
            residual.set(key, target.clone(), None);
            continue;
        };
        if locks.primary.contains_key(&lock.pkg_name) {
            continue;
        }
        debug!(name = %lock.pkg_name, resolution = %lock.resolution, "primary lock from input map");
        let constraint = constraint_for(&base_declared, &lock.pkg_name, &lock.pkg);
        constraints.add(&lock.pkg_name, constraint, None);
        locks.set_resolution(&lock.pkg_name, lock.resolution, None)?;
    }

    for (scope, mappings) in &map.scopes {
        let Some(scope_url) = map.resolve_target(scope) else {
            for (key, target) in mappings {
                residual.set(key, target.clone(), Some(scope));
            }
            continue;
        };
        let flat = scope_url.as_str() == origin_root(&scope_url);
        let pkg_scope = if flat {
            None
        } else {
            let base = resolver.get_package_base(&scope_url).await?;
            (base == scope_url).then_some(base)
        };
        let declared = match &pkg_scope {
            Some(pkg_scope) => declared_targets(resolver, pkg_scope, default_registry, false).await?,
            None => BTreeMap::new(),
        };

        for (key, target) in mappings {
            let resolved = target.as_deref().and_then(|t| map.resolve_target(t));
            let lock = match (&resolved, flat || pkg_scope.is_some()) {
                (Some(url), true) => lockable(resolver, key, url).await?,
                _ => None,
            };
            let Some(lock) = lock else {
                residual.set(key, target.clone(), Some(scope));
                continue;
            };

            if flat {
                locks.add_flattened(
                    scope_url.as_str(),
                    &lock.pkg_name,
                    FlatResolution {
                        export_subpath: lock.subpath,
                        resolution: lock.resolution,
                    },
                );
            } else if let Some(pkg_scope) = &pkg_scope {
                let constraint = constraint_for(&declared, &lock.pkg_name, &lock.pkg);
                constraints.add(&lock.pkg_name, constraint, Some(pkg_scope.as_str()));
                locks.set_resolution(&lock.pkg_name, lock.resolution, Some(pkg_scope.as_str()))?;
            }
        }
    }

    Ok(ExtractedLocks {
        locks,
        constraints,
        residual,
    })
}

/// `url` as a package base.
pub(crate) fn base_url_of(url: &Url) -> Result<Url> {
    let href = with_trailing_slash(url.as_str());
    Url::parse(&href).map_err(|e| Error::invalid_url(&href, e))
}
