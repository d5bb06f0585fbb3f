//! Install decisions.
//!
//! The installer maps `(name, scope)` pairs to locked package URLs. Existing
//! locks are reused whenever they satisfy the requested range, so the
//! registry is only asked when nothing installed fits (or the mode asks for
//! the latest release). Every change to the lock table raises the
//! `new_installs` flag the trace loop waits on.

use super::lock::{
    base_url_of, to_package_target_map, ExtractedLocks, InstalledResolution, LockResolutions,
    PackageConstraint, VersionConstraints,
};
use super::InstallMode;
use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::package::{new_package_target, ExactPackage, InstallTarget, PackageTarget, Target};
use crate::provider::ProviderRef;
use crate::resolver::builtins::{builtin_name, CORE_PACKAGE};
use crate::resolver::Resolver;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Installer settings taken from the generator config.
#[derive(Debug, Clone)]
pub struct InstallerOptions {
    /// Package scope of top-level installs.
    pub install_base_url: Url,
    /// `name` or `name.layer`.
    pub default_provider: String,
    pub default_registry: String,
    /// Provider per package name, `registry:` prefix or `/`-terminated name
    /// prefix.
    pub providers: BTreeMap<String, String>,
    /// Forced targets per package name.
    pub resolutions: BTreeMap<String, String>,
}

impl InstallerOptions {
    #[must_use]
    pub fn new(install_base_url: Url) -> Self {
        Self {
            install_base_url,
            default_provider: "jspm".to_string(),
            default_registry: "npm".to_string(),
            providers: BTreeMap::new(),
            resolutions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            install_base_url: config.install_base_url(),
            default_provider: config.default_provider.clone(),
            default_registry: config.default_registry.clone(),
            providers: config.providers.clone(),
            resolutions: config.resolutions.clone(),
        }
    }

    #[must_use]
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = provider.into();
        self
    }

    #[must_use]
    pub fn with_provider(mut self, key: impl Into<String>, provider: impl Into<String>) -> Self {
        self.providers.insert(key.into(), provider.into());
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.resolutions.insert(name.into(), target.into());
        self
    }
}

#[derive(Debug, Default)]
struct InstallState {
    locks: LockResolutions,
    constraints: VersionConstraints,
}

#[derive(Debug)]
pub struct Installer {
    resolver: Arc<Resolver>,
    options: InstallerOptions,
    state: RwLock<InstallState>,
    new_installs: AtomicBool,
    installing: AtomicBool,
}

impl Installer {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, options: InstallerOptions) -> Self {
        Self {
            resolver,
            options,
            state: RwLock::new(InstallState::default()),
            new_installs: AtomicBool::new(false),
            installing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn options(&self) -> &InstallerOptions {
        &self.options
    }

    /// Open an install batch.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when a batch is already open.
    pub fn start_install(&self) -> Result<()> {
        self.installing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::internal("an install is already in progress"))
    }

    pub fn finish_install(&self) {
        self.installing.store(false, Ordering::Release);
    }

    /// Clear the dirty flag, returning its previous value.
    pub fn reset_new_installs(&self) -> bool {
        self.new_installs.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn has_new_installs(&self) -> bool {
        self.new_installs.load(Ordering::Acquire)
    }

    /// A snapshot of the lock table.
    pub async fn locks(&self) -> LockResolutions {
        self.state.read().await.locks.clone()
    }

    pub async fn constraints(&self) -> VersionConstraints {
        self.state.read().await.constraints.clone()
    }

    /// Merge locks extracted from an input map.
    pub async fn add_locks(&self, extracted: &ExtractedLocks) {
        let mut state = self.state.write().await;
        state.locks.extend(extracted.locks.clone());
        state.constraints.extend(extracted.constraints.clone());
    }

    pub async fn remove_primary(&self, name: &str) -> Option<InstalledResolution> {
        let mut state = self.state.write().await;
        state.constraints.primary.remove(name);
        state.locks.remove_primary(name)
    }

    /// Drop every lock and constraint.
    pub async fn clear(&self) {
        *self.state.write().await = InstallState::default();
    }

    /// The provider serving `target`.
    ///
    /// An exact name entry in the provider map wins, then a `registry:`
    /// entry, then the longest `/`-terminated name prefix. Builtin registries
    /// go to their own provider.
    #[must_use]
    pub fn get_provider(&self, target: &PackageTarget) -> ProviderRef {
        let providers = self.resolver.providers();
        let by_name = self
            .options
            .providers
            .get(&target.name)
            .or_else(|| {
                self.options
                    .providers
                    .get(&format!("{}:{}", target.registry, target.name))
            })
            .or_else(|| self.options.providers.get(&format!("{}:", target.registry)))
            .or_else(|| {
                self.options
                    .providers
                    .iter()
                    .filter(|(key, _)| key.ends_with('/') && target.name.starts_with(key.as_str()))
                    .max_by_key(|(key, _)| key.len())
                    .map(|(_, provider)| provider)
            });

        if let Some(provider) = by_name {
            return providers.provider_ref(provider);
        }
        match target.registry.as_str() {
            registry @ ("node" | "deno" | "denoland") if providers.get(registry).is_some() => {
                providers.provider_ref(registry)
            }
            _ => providers.provider_ref(&self.options.default_provider),
        }
    }

    async fn set_resolution(
        &self,
        name: &str,
        resolution: InstalledResolution,
        scope: Option<&Url>,
        constraint: Option<PackageTarget>,
    ) -> Result<InstalledResolution> {
        let scope = scope.map(Url::as_str);
        let mut state = self.state.write().await;
        let changed = state
            .locks
            .set_resolution(name, resolution.clone(), scope)?;
        if let Some(constraint) = constraint {
            state.constraints.add(name, constraint, scope);
        }
        drop(state);

        if changed {
            debug!(name, scope = scope.unwrap_or("<root>"), resolution = %resolution, "locked");
            self.new_installs.store(true, Ordering::Release);
        }
        Ok(resolution)
    }

    /// The highest installed version of `target`'s package that `target`
    /// admits, with the provider it is installed from.
    async fn best_existing_match(&self, target: &PackageTarget) -> Option<(ExactPackage, ProviderRef)> {
        let urls: Vec<Url> = {
            let state = self.state.read().await;
            state.locks.install_urls().into_iter().cloned().collect()
        };
        urls.iter()
            .filter_map(|url| self.resolver.parse_url_pkg(url.as_str()))
            .filter(|(_, parsed)| {
                parsed.pkg.registry == target.registry
                    && parsed.pkg.name == target.name
                    && target.admits(&parsed.pkg.version, target.unstable)
            })
            .filter_map(|(provider, parsed)| {
                let version = parsed.pkg.semver()?;
                Some((version, parsed.pkg, provider))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, pkg, provider)| (pkg, provider))
    }

    /// Locks of `pkg`'s package: `(scope, alias, provider, version)`.
    async fn package_locks(&self, pkg: &ExactPackage) -> Vec<(Option<String>, String, ProviderRef, String)> {
        let state = self.state.read().await;
        state
            .locks
            .entries()
            .into_iter()
            .filter_map(|(scope, alias, resolution)| {
                let (provider, parsed) = self.resolver.parse_url_pkg(resolution.install_url.as_str())?;
                (parsed.pkg.registry == pkg.registry && parsed.pkg.name == pkg.name).then(|| {
                    (
                        scope.map(String::from),
                        alias.to_string(),
                        provider,
                        parsed.pkg.version,
                    )
                })
            })
            .collect()
    }

    async fn package_constraints(&self, pkg: &ExactPackage) -> Vec<PackageConstraint> {
        let state = self.state.read().await;
        state.constraints.constraints_for(&pkg.registry, &pkg.name)
    }

    async fn relock(
        &self,
        scope: Option<&str>,
        alias: &str,
        provider: &ProviderRef,
        pkg: &ExactPackage,
    ) -> Result<()> {
        let install_url = self.resolver.pkg_to_url(pkg, provider)?;
        let mut state = self.state.write().await;
        let subpath = state
            .locks
            .get_resolution(alias, scope)?
            .and_then(|res| res.install_subpath.clone());
        let changed = state.locks.set_resolution(
            alias,
            InstalledResolution::new(install_url).with_subpath(subpath),
            scope,
        )?;
        drop(state);
        if changed {
            debug!(alias, scope = scope.unwrap_or("<root>"), to = %pkg, "upgraded lock");
            self.new_installs.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Move every constrained lock of `latest`'s package to `latest` if all
    /// the constraints admit it. Returns whether the upgrade happened.
    ///
    /// Locks without a recorded constraint are left alone.
    async fn try_upgrade_all_to(&self, latest: &ExactPackage) -> Result<bool> {
        let constraints = self.package_constraints(latest).await;
        if constraints
            .iter()
            .any(|c| !c.target.admits(&latest.version, c.target.unstable))
        {
            return Ok(false);
        }
        for (scope, alias, provider, version) in self.package_locks(latest).await {
            let constrained = constraints
                .iter()
                .any(|c| c.alias == alias && c.scope == scope);
            if constrained && version != latest.version {
                self.relock(scope.as_deref(), &alias, &provider, latest).await?;
            }
        }
        Ok(true)
    }

    /// Move the locks of `latest`'s package whose constraints admit it.
    async fn upgrade_supported_to(&self, latest: &ExactPackage) -> Result<()> {
        let constraints = self.package_constraints(latest).await;
        for (scope, alias, provider, version) in self.package_locks(latest).await {
            if version == latest.version {
                continue;
            }
            let admits = constraints
                .iter()
                .find(|c| c.alias == alias && c.scope == scope)
                .is_some_and(|c| c.target.admits(&latest.version, c.target.unstable));
            if admits {
                self.relock(scope.as_deref(), &alias, &provider, latest).await?;
            }
        }
        Ok(())
    }

    /// Lock `pkg_name` in `pkg_scope` (top level when `None`) to a version of
    /// `target`.
    ///
    /// A configured resolution for `pkg_name` replaces `target` whatever the
    /// mode.
    ///
    /// # Errors
    /// Returns [`Error::VersionNotFound`] when the registry has nothing in
    /// range, and provider errors unchanged.
    pub async fn install_target(
        &self,
        pkg_name: &str,
        target: InstallTarget,
        mode: InstallMode,
        pkg_scope: Option<&Url>,
        parent_url: &str,
    ) -> Result<InstalledResolution> {
        let target = match self.options.resolutions.get(pkg_name) {
            Some(resolution) => {
                debug!(name = pkg_name, resolution = %resolution, "applying resolution override");
                InstallTarget {
                    target: new_package_target(
                        resolution,
                        &self.options.install_base_url,
                        &self.options.default_registry,
                        Some(pkg_name),
                    )?,
                    install_subpath: target.install_subpath,
                }
            }
            None => target,
        };
        let install_subpath = target.install_subpath;

        let pkg_target = match target.target {
            Target::Url(url) => {
                let resolution =
                    InstalledResolution::new(base_url_of(&url)?).with_subpath(install_subpath);
                return self.set_resolution(pkg_name, resolution, pkg_scope, None).await;
            }
            Target::Package(pkg_target) => pkg_target,
        };

        let top_level = pkg_scope.is_none();
        let provider = self.get_provider(&pkg_target);
        let existing = self.best_existing_match(&pkg_target).await;

        let lock = |pkg: &ExactPackage, provider: &ProviderRef| -> Result<InstalledResolution> {
            Ok(InstalledResolution::new(self.resolver.pkg_to_url(pkg, provider)?)
                .with_subpath(install_subpath.clone()))
        };

        if !mode.uses_latest(top_level) {
            if let Some((pkg, _)) = &existing {
                debug!(name = pkg_name, target = %pkg_target, reuse = %pkg, "existing lock in range");
                let resolution = lock(pkg, &provider)?;
                return self
                    .set_resolution(pkg_name, resolution, pkg_scope, Some(pkg_target))
                    .await;
            }
        }

        let latest = self
            .resolver
            .resolve_latest_target(&pkg_target, &provider, Some(parent_url))
            .await?;

        if !top_level && mode != InstallMode::Freeze {
            if let Some((pkg, _)) = &existing {
                if pkg != &latest && !self.try_upgrade_all_to(&latest).await? {
                    debug!(name = pkg_name, latest = %latest, keep = %pkg, "upgrade incompatible, keeping lock");
                    let resolution = lock(pkg, &provider)?;
                    return self
                        .set_resolution(pkg_name, resolution, pkg_scope, Some(pkg_target))
                        .await;
                }
            }
        }

        let resolution = lock(&latest, &provider)?;
        let resolution = self
            .set_resolution(pkg_name, resolution, pkg_scope, Some(pkg_target))
            .await?;
        self.upgrade_supported_to(&latest).await?;
        Ok(resolution)
    }

    fn is_in_range(&self, resolution: &InstalledResolution, declared: Option<&InstallTarget>) -> bool {
        match declared.map(|t| &t.target) {
            None => true,
            Some(Target::Url(url)) => base_url_of(url).is_ok_and(|url| url == resolution.install_url),
            Some(Target::Package(target)) => self
                .resolver
                .parse_url_pkg(resolution.install_url.as_str())
                .is_some_and(|(_, parsed)| {
                    parsed.pkg.name == target.name && target.admits(&parsed.pkg.version, target.unstable)
                }),
        }
    }

    /// Resolve a bare import of `pkg_name` from the package at `pkg_scope`
    /// (the install base when `None`).
    ///
    /// Existing locks win when in range. Otherwise the importing manifest's
    /// declared range is installed, then builtins. Returns `None` when the
    /// package is neither declared nor a builtin.
    ///
    /// # Errors
    /// Returns manifest, registry and invariant errors.
    pub async fn install(
        &self,
        pkg_name: &str,
        mode: InstallMode,
        pkg_scope: Option<&Url>,
        subpath: &str,
        parent_url: &str,
    ) -> Result<Option<InstalledResolution>> {
        if self.options.resolutions.contains_key(pkg_name) {
            let target = InstallTarget::new(Target::Package(PackageTarget::wildcard(
                &self.options.default_registry,
                pkg_name,
            )));
            return self
                .install_target(pkg_name, target, mode, pkg_scope, parent_url)
                .await
                .map(Some);
        }

        let top_level = pkg_scope.is_none();
        let scope_url = pkg_scope.unwrap_or(&self.options.install_base_url);
        let pcfg = self
            .resolver
            .get_package_config(scope_url.as_str())
            .await?
            .unwrap_or_default();
        let declared = to_package_target_map(
            &pcfg,
            scope_url,
            &self.options.default_registry,
            top_level,
        );
        let declared_target = declared.get(pkg_name);

        let (existing, flattened) = {
            let state = self.state.read().await;
            let existing = state
                .locks
                .get_resolution(pkg_name, pkg_scope.map(Url::as_str))?
                .cloned();
            let flattened = state
                .locks
                .get_flattened_resolution(pkg_name, scope_url.as_str(), subpath)
                .cloned();
            (existing, flattened)
        };

        if let Some(existing) = existing {
            if top_level
                || mode == InstallMode::Freeze
                || self.is_in_range(&existing, declared_target)
            {
                return Ok(Some(existing));
            }
        }

        if !top_level {
            if let Some(flat) = flattened.filter(|flat| self.is_in_range(flat, declared_target)) {
                debug!(name = pkg_name, scope = %scope_url, resolution = %flat, "using flattened lock");
                let constraint = match declared_target.map(|t| &t.target) {
                    Some(Target::Package(target)) => Some(target.clone()),
                    _ => None,
                };
                return self
                    .set_resolution(pkg_name, flat, pkg_scope, constraint)
                    .await
                    .map(Some);
            }
        }

        if let Some(target) = declared_target {
            return self
                .install_target(pkg_name, target.clone(), mode, pkg_scope, parent_url)
                .await
                .map(Some);
        }

        if let Some(builtin) = builtin_name(pkg_name) {
            let target = InstallTarget::new(Target::Package(PackageTarget::wildcard(
                "npm",
                CORE_PACKAGE,
            )))
            .with_subpath(format!("./nodelibs/{builtin}"));
            return self
                .install_target(pkg_name, target, mode, pkg_scope, parent_url)
                .await
                .map(Some);
        }

        Ok(None)
    }

    /// Install `pkg_name` at top level from its bare name, for imports no
    /// manifest declares.
    ///
    /// # Errors
    /// Returns registry errors and invalid package names.
    pub async fn install_fallback(
        &self,
        pkg_name: &str,
        mode: InstallMode,
        parent_url: &str,
    ) -> Result<InstalledResolution> {
        debug!(name = pkg_name, parent = parent_url, "undeclared import, installing latest");
        let target = new_package_target(
            pkg_name,
            &self.options.install_base_url,
            &self.options.default_registry,
            None,
        )?;
        self.install_target(pkg_name, InstallTarget::new(target), mode, None, parent_url)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SourceAnalyzer;
    use crate::config::default_env;
    use crate::fetch::{Fetch, MemoryFetcher};
    use crate::provider::ProviderRegistry;
    use crate::range::parse_ranges;
    use serde_json::json;

    const BASE: &str = "file:///app/";

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn installer(fetcher: MemoryFetcher, options: InstallerOptions) -> (Arc<MemoryFetcher>, Installer) {
        let fetcher = Arc::new(fetcher);
        let dyn_fetcher: Arc<dyn Fetch> = Arc::clone(&fetcher) as Arc<dyn Fetch>;
        let resolver = Resolver::new(
            ProviderRegistry::standard(Arc::clone(&dyn_fetcher)),
            dyn_fetcher,
            Arc::new(SourceAnalyzer),
            default_env(),
        );
        (fetcher, Installer::new(Arc::new(resolver), options))
    }

    fn pkg(name: &str, range: &str) -> PackageTarget {
        PackageTarget {
            registry: "npm".into(),
            name: name.into(),
            ranges: parse_ranges(range).unwrap(),
            unstable: false,
        }
    }

    fn target(name: &str, range: &str) -> InstallTarget {
        InstallTarget::new(Target::Package(pkg(name, range)))
    }

    fn registry() -> MemoryFetcher {
        MemoryFetcher::new()
            .with_text("https://ga.jspm.io/npm:react@16", "16.14.0")
            .with_text("https://ga.jspm.io/npm:react@17", "17.0.2")
            .with_text("https://ga.jspm.io/npm:react", "18.2.0")
            .with_text("https://ga.jspm.io/npm:@jspm/core", "2.0.1")
    }

    #[tokio::test]
    async fn test_lock_reuse_skips_registry() {
        let (fetcher, installer) = installer(registry(), InstallerOptions::new(u(BASE)));
        let first = installer
            .install_target("react", target("react", "^16.8.0"), InstallMode::Default, None, BASE)
            .await
            .unwrap();
        assert_eq!(
            first.install_url.as_str(),
            "https://ga.jspm.io/npm:react@16.14.0/"
        );
        assert!(installer.reset_new_installs());

        let scope = u("https://ga.jspm.io/npm:react-dom@16.14.0/");
        let second = installer
            .install_target("react", target("react", "16"), InstallMode::Default, Some(&scope), BASE)
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(fetcher.request_count("https://ga.jspm.io/npm:react@16").await, 1);
        assert!(installer.has_new_installs());
    }

    #[tokio::test]
    async fn test_freeze_keeps_lock() {
        let (_, installer) = installer(registry(), InstallerOptions::new(u(BASE)));
        installer
            .install_target("react", target("react", "17.0.1"), InstallMode::Default, None, BASE)
            .await
            .unwrap();

        let frozen = installer
            .install_target("react", target("react", "17"), InstallMode::Freeze, None, BASE)
            .await
            .unwrap();
        assert_eq!(frozen.install_url.as_str(), "https://ga.jspm.io/npm:react@17.0.1/");

        let latest = installer
            .install_target("react", target("react", "17"), InstallMode::LatestPrimaries, None, BASE)
            .await
            .unwrap();
        assert_eq!(latest.install_url.as_str(), "https://ga.jspm.io/npm:react@17.0.2/");
    }

    #[tokio::test]
    async fn test_resolution_override_beats_freeze() {
        let options = InstallerOptions::new(u(BASE)).with_resolution("lit-html", "2.6.1");
        let (_, installer) = installer(MemoryFetcher::new(), options);
        let mut locks = LockResolutions::new();
        locks
            .set_resolution(
                "lit-html",
                InstalledResolution::new(u("https://ga.jspm.io/npm:lit-html@2.7.0/")),
                None,
            )
            .unwrap();
        installer
            .add_locks(&ExtractedLocks {
                locks,
                constraints: VersionConstraints::new(),
                residual: crate::importmap::ImportMap::new(u(BASE)),
            })
            .await;

        let resolution = installer
            .install("lit-html", InstallMode::Freeze, None, ".", BASE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            resolution.install_url.as_str(),
            "https://ga.jspm.io/npm:lit-html@2.6.1/"
        );
    }

    #[tokio::test]
    async fn test_incompatible_versions_coexist() {
        let fetcher = registry()
            .with_json(
                "file:///app/pkg-a/package.json",
                &json!({"name": "pkg-a", "dependencies": {"react": "^16.8.0"}}),
            )
            .with_json(
                "file:///app/pkg-b/package.json",
                &json!({"name": "pkg-b", "dependencies": {"react": "^17.0.0"}}),
            );
        let (_, installer) = installer(fetcher, InstallerOptions::new(u(BASE)));
        let a = u("file:///app/pkg-a/");
        let b = u("file:///app/pkg-b/");

        let in_a = installer
            .install("react", InstallMode::Default, Some(&a), ".", "file:///app/pkg-a/index.js")
            .await
            .unwrap()
            .unwrap();
        let in_b = installer
            .install("react", InstallMode::Default, Some(&b), ".", "file:///app/pkg-b/index.js")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(in_a.install_url.as_str(), "https://ga.jspm.io/npm:react@16.14.0/");
        assert_eq!(in_b.install_url.as_str(), "https://ga.jspm.io/npm:react@17.0.2/");
        let locks = installer.locks().await;
        assert_eq!(locks.secondary.len(), 2);
        assert!(locks.primary.is_empty());
    }

    #[tokio::test]
    async fn test_secondary_upgrades_compatible_locks() {
        let fetcher = MemoryFetcher::new()
            .with_text("https://ga.jspm.io/npm:dep@1", "1.4.0")
            .with_json(
                "file:///app/pkg-b/package.json",
                &json!({"dependencies": {"dep": "^1.3.0"}}),
            );
        let (_, installer) = installer(fetcher, InstallerOptions::new(u(BASE)));
        let a = u("file:///app/pkg-a/");
        installer
            .install_target("dep", target("dep", "1.2.0"), InstallMode::Default, Some(&a), BASE)
            .await
            .unwrap();
        // Record a looser constraint for pkg-a so the bump is allowed there.
        installer
            .state
            .write()
            .await
            .constraints
            .add("dep", pkg("dep", "^1.0.0"), Some(a.as_str()));

        let b = u("file:///app/pkg-b/");
        installer
            .install("dep", InstallMode::Default, Some(&b), ".", BASE)
            .await
            .unwrap();

        let locks = installer.locks().await;
        for scope in [a.as_str(), b.as_str()] {
            assert_eq!(
                locks.get_resolution("dep", Some(scope)).unwrap().unwrap().install_url.as_str(),
                "https://ga.jspm.io/npm:dep@1.4.0/"
            );
        }
    }

    fn react_lock(version: &str) -> InstalledResolution {
        InstalledResolution::new(u(&format!("https://ga.jspm.io/npm:react@{version}/")))
    }

    fn react_in(locks: &LockResolutions, scope: &Url) -> String {
        locks
            .get_resolution("react", Some(scope.as_str()))
            .unwrap()
            .unwrap()
            .install_url
            .to_string()
    }

    #[tokio::test]
    async fn test_latest_all_keeps_lock_when_constraint_rejects_latest() {
        let (_, installer) = installer(registry(), InstallerOptions::new(u(BASE)));
        let a = u("file:///app/pkg-a/");
        installer
            .install_target("react", target("react", "^16.8.0"), InstallMode::Default, Some(&a), BASE)
            .await
            .unwrap();

        let b = u("file:///app/pkg-b/");
        let wildcard = InstallTarget::new(Target::Package(PackageTarget::wildcard("npm", "react")));
        let kept = installer
            .install_target("react", wildcard, InstallMode::LatestAll, Some(&b), BASE)
            .await
            .unwrap();

        assert_eq!(kept.install_url.as_str(), "https://ga.jspm.io/npm:react@16.14.0/");
        let locks = installer.locks().await;
        assert_eq!(react_in(&locks, &a), "https://ga.jspm.io/npm:react@16.14.0/");
        assert_eq!(react_in(&locks, &b), "https://ga.jspm.io/npm:react@16.14.0/");
    }

    #[tokio::test]
    async fn test_upgrade_skips_unconstrained_locks() {
        let (_, installer) = installer(registry(), InstallerOptions::new(u(BASE)));
        let a = u("file:///app/pkg-a/");
        let c = u("file:///app/pkg-c/");
        let mut locks = LockResolutions::new();
        locks
            .set_resolution("react", react_lock("16.2.0"), Some(a.as_str()))
            .unwrap();
        locks
            .set_resolution("react", react_lock("16.0.0"), Some(c.as_str()))
            .unwrap();
        let mut constraints = VersionConstraints::new();
        constraints.add("react", pkg("react", "^16.2.0"), Some(a.as_str()));
        installer
            .add_locks(&ExtractedLocks {
                locks,
                constraints,
                residual: crate::importmap::ImportMap::new(u(BASE)),
            })
            .await;

        let b = u("file:///app/pkg-b/");
        installer
            .install_target("react", target("react", "16"), InstallMode::LatestAll, Some(&b), BASE)
            .await
            .unwrap();

        let locks = installer.locks().await;
        assert_eq!(react_in(&locks, &a), "https://ga.jspm.io/npm:react@16.14.0/");
        assert_eq!(react_in(&locks, &b), "https://ga.jspm.io/npm:react@16.14.0/");
        assert_eq!(react_in(&locks, &c), "https://ga.jspm.io/npm:react@16.0.0/");
    }

    #[tokio::test]
    async fn test_builtin_installs_core() {
        let (_, installer) = installer(registry(), InstallerOptions::new(u(BASE)));
        let resolution = installer
            .install("fs", InstallMode::Default, None, ".", BASE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            resolution.to_string(),
            "https://ga.jspm.io/npm:@jspm/core@2.0.1/|./nodelibs/fs"
        );
        assert!(installer
            .install("not-declared", InstallMode::Default, None, ".", BASE)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_url_target_locked_directly() {
        let (fetcher, installer) = installer(MemoryFetcher::new(), InstallerOptions::new(u(BASE)));
        let resolution = installer
            .install_target(
                "local",
                InstallTarget::new(Target::Url(u("file:///app/local"))).with_subpath("./lib.js"),
                InstallMode::LatestAll,
                None,
                BASE,
            )
            .await
            .unwrap();
        assert_eq!(resolution.install_url.as_str(), "file:///app/local/");
        assert_eq!(resolution.install_subpath.as_deref(), Some("./lib.js"));
        assert!(fetcher.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_version_not_found() {
        let (_, installer) = installer(MemoryFetcher::new(), InstallerOptions::new(u(BASE)));
        let err = installer
            .install_target("nope", target("nope", "^1.0.0"), InstallMode::Default, None, BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionNotFound { .. }));
        assert_eq!(err.code(), crate::error::codes::VERSION_NOT_FOUND);
    }

    #[test]
    fn test_reentrant_install_rejected() {
        let (_, installer) = installer(MemoryFetcher::new(), InstallerOptions::new(u(BASE)));
        installer.start_install().unwrap();
        assert!(installer.start_install().unwrap_err().is_internal());
        installer.finish_install();
        installer.start_install().unwrap();
    }

    #[test]
    fn test_provider_precedence() {
        let options = InstallerOptions::new(u(BASE))
            .with_provider("react", "unpkg")
            .with_provider("npm:", "jsdelivr")
            .with_provider("@scope/", "skypack");
        let (_, installer) = installer(MemoryFetcher::new(), options);
        let pick = |registry: &str, name: &str| {
            installer
                .get_provider(&PackageTarget::wildcard(registry, name))
                .to_string()
        };
        assert_eq!(pick("npm", "react"), "unpkg");
        assert_eq!(pick("npm", "lit"), "jsdelivr");
        assert_eq!(pick("github", "@scope/pkg"), "skypack");
        assert_eq!(pick("github", "user/repo"), "jspm");
        assert_eq!(pick("node", "fs"), "node");
        assert_eq!(pick("deno", "path"), "deno");
    }
}
