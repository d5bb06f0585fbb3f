//! The generator session: one resolver, installer and trace map behind the
//! operations the CLI exposes.
//!
//! Every mutating operation re-traces the pins and replaces the stored map,
//! so entries no pin reaches disappear.

use crate::analysis::{Analyzer, SourceAnalyzer};
use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::fetch::{Fetch, HttpFetcher};
use crate::importmap::ImportMap;
use crate::install::{
    extract_lock_constraints_and_map, package_target_from_exact, InstallMode, Installer,
    InstallerOptions,
};
use crate::package::{parse_target, InstallTarget, ParsedTarget, Target};
use crate::provider::ProviderRegistry;
use crate::resolver::Resolver;
use crate::trace::{TraceInfo, TraceMap, TraceOptions};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    resolver: Arc<Resolver>,
    installer: Arc<Installer>,
    trace: TraceMap,
    /// Specifiers traced from the install base.
    pins: Vec<String>,
    pending_input: Option<Value>,
    map: ImportMap,
    info: TraceInfo,
}

impl Generator {
    /// A session fetching over the network.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new()?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// A session over `fetcher` with the built-in providers and analyzer.
    #[must_use]
    pub fn with_fetcher(config: GeneratorConfig, fetcher: Arc<dyn Fetch>) -> Self {
        let providers = ProviderRegistry::standard(Arc::clone(&fetcher));
        Self::with_parts(config, fetcher, providers, Arc::new(SourceAnalyzer))
    }

    #[must_use]
    pub fn with_parts(
        config: GeneratorConfig,
        fetcher: Arc<dyn Fetch>,
        providers: ProviderRegistry,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        let resolver = Arc::new(Resolver::new(providers, fetcher, analyzer, config.env.clone()));
        let installer = Arc::new(Installer::new(
            Arc::clone(&resolver),
            InstallerOptions::from_config(&config),
        ));
        let trace = TraceMap::new(
            Arc::clone(&resolver),
            Arc::clone(&installer),
            TraceOptions::from_config(&config),
        );
        let map = ImportMap::new(config.map_url.clone()).with_root_url(config.root_url.clone());

        Self {
            pending_input: config.input_map.clone(),
            config,
            resolver,
            installer,
            trace,
            pins: Vec::new(),
            map,
            info: TraceInfo::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Specifiers currently traced into the map.
    #[must_use]
    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    async fn apply_pending_input(&mut self) -> Result<()> {
        if let Some(input) = self.pending_input.take() {
            let map_url = self.config.map_url.clone();
            self.load_map(&input, &map_url).await?;
        }
        Ok(())
    }

    async fn load_map(&mut self, json: &Value, map_url: &Url) -> Result<()> {
        let map = ImportMap::from_json(json, map_url.clone(), self.config.root_url.clone())?;
        let extracted = extract_lock_constraints_and_map(
            &map,
            &self.resolver,
            &self.config.install_base_url(),
            &self.config.default_registry,
        )
        .await?;
        debug!(
            primary = extracted.locks.primary.len(),
            scopes = extracted.locks.secondary.len(),
            residual = extracted.residual.imports.len(),
            "loaded input map"
        );
        self.installer.add_locks(&extracted).await;
        self.trace.add_input_map(&extracted.residual).await;

        for (key, target) in &map.imports {
            if target.is_some() && !key.ends_with('/') && !self.pins.contains(key) {
                self.pins.push(key.clone());
            }
        }
        self.map.extend(&map, false);
        Ok(())
    }

    /// Load an existing import map: its package mappings become locks, the
    /// rest is kept verbatim. `map_url` defaults to the configured map URL.
    ///
    /// # Errors
    /// Returns an error for malformed maps and manifest fetch failures.
    pub async fn add_mappings(&mut self, json: &Value, map_url: Option<&Url>) -> Result<()> {
        self.apply_pending_input().await?;
        let map_url = map_url.cloned().unwrap_or_else(|| self.config.map_url.clone());
        self.load_map(json, &map_url).await
    }

    /// Install `targets` with the configured mode.
    ///
    /// # Errors
    /// See [`Generator::install_with_mode`].
    pub async fn install<S: AsRef<str>>(&mut self, targets: &[S]) -> Result<()> {
        let mode = self.config.install_mode();
        self.install_with_mode(targets, mode).await
    }

    /// Install `targets` (`react@16`, `./pkg`, `npm:lit@2|html.js`) and
    /// rebuild the map. With no targets, every primary lock is reinstalled
    /// against the current providers.
    ///
    /// # Errors
    /// Returns invalid specifiers, registry failures and trace errors. Locks
    /// made before a failure are kept; pins added by a failed install are not.
    pub async fn install_with_mode<S: AsRef<str>>(
        &mut self,
        targets: &[S],
        mode: InstallMode,
    ) -> Result<()> {
        self.apply_pending_input().await?;
        self.installer.start_install()?;
        let result = self.install_targets(targets, mode).await;
        self.installer.finish_install();

        let mut added: Vec<String> = Vec::new();
        for pin in result? {
            if !self.pins.contains(&pin) && !added.contains(&pin) {
                added.push(pin);
            }
        }
        self.pins.extend(added.iter().cloned());
        let rebuilt = self.rebuild(mode).await;
        if rebuilt.is_err() {
            self.pins.retain(|pin| !added.contains(pin));
        }
        rebuilt
    }

    /// Lock every target at the top level, returning the pins they add.
    async fn install_targets<S: AsRef<str>>(
        &self,
        targets: &[S],
        mode: InstallMode,
    ) -> Result<Vec<String>> {
        let base = self.config.install_base_url();
        let registry = self.config.default_registry.clone();

        let mut pins = Vec::new();
        let installs: Vec<(String, InstallTarget)> = if targets.is_empty() {
            self.installer
                .locks()
                .await
                .primary
                .into_iter()
                .filter_map(|(name, resolution)| {
                    let (_, parsed) = self.resolver.parse_url_pkg(resolution.install_url.as_str())?;
                    let target = InstallTarget {
                        target: Target::Package(package_target_from_exact(&parsed.pkg)),
                        install_subpath: resolution.install_subpath,
                    };
                    Some((name, target))
                })
                .collect()
        } else {
            let parsed = try_join_all(
                targets
                    .iter()
                    .map(|t| parse_target(&self.resolver, t.as_ref(), &base, &registry)),
            )
            .await?;
            pins.extend(parsed.iter().map(ParsedTarget::pin));
            parsed
                .into_iter()
                .map(|parsed| (parsed.alias, parsed.target))
                .collect()
        };

        let installer = &self.installer;
        let parent = base.as_str();
        let resolutions = try_join_all(installs.into_iter().map(|(name, target)| async move {
            let resolution = installer
                .install_target(&name, target, mode, None, parent)
                .await?;
            Ok::<_, Error>((name, resolution))
        }))
        .await?;
        for (name, resolution) in resolutions {
            info!(name = %name, resolution = %resolution, "installed");
        }
        Ok(pins)
    }

    /// Move primaries to their latest in-range version. With no names,
    /// every primary is updated.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for names with no install.
    pub async fn update<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.apply_pending_input().await?;
        let locks = self.installer.locks().await;
        let constraints = self.installer.constraints().await;
        let names: Vec<String> = if names.is_empty() {
            locks.primary.keys().cloned().collect()
        } else {
            names.iter().map(|n| n.as_ref().to_string()).collect()
        };

        let mut installs = Vec::with_capacity(names.len());
        for name in names {
            let resolution = locks
                .primary
                .get(&name)
                .ok_or_else(|| Error::invalid_input(format!("No \"{name}\" install found")))?;
            let Some((_, parsed)) = self.resolver.parse_url_pkg(resolution.install_url.as_str())
            else {
                debug!(name = %name, url = %resolution.install_url, "not a registry package, skipping update");
                continue;
            };
            let target = constraints
                .primary
                .get(&name)
                .cloned()
                .unwrap_or_else(|| package_target_from_exact(&parsed.pkg));
            installs.push((
                name,
                InstallTarget {
                    target: Target::Package(target),
                    install_subpath: resolution.install_subpath.clone(),
                },
            ));
        }

        self.installer.start_install()?;
        let installer = &self.installer;
        let parent = self.config.install_base_url();
        let result = try_join_all(installs.into_iter().map(|(name, target)| {
            let parent = parent.as_str();
            async move {
                installer
                    .install_target(&name, target, InstallMode::LatestPrimaries, None, parent)
                    .await
            }
        }))
        .await;
        self.installer.finish_install();
        result?;
        self.rebuild(InstallMode::LatestPrimaries).await
    }

    /// Remove installs and the pins that use them, then re-trace so scopes
    /// only the removed packages used are dropped.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for names with no install.
    pub async fn uninstall<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.apply_pending_input().await?;
        for name in names {
            let name = name.as_ref();
            let prefix = format!("{name}/");
            let pin_count = self.pins.len();
            self.pins.retain(|pin| pin != name && !pin.starts_with(&prefix));
            let removed_pins = pin_count != self.pins.len();
            let removed_lock = self.installer.remove_primary(name).await.is_some();
            self.trace.remove_input_import(name).await;
            if !removed_pins && !removed_lock {
                return Err(Error::invalid_input(format!("No \"{name}\" install found")));
            }
            info!(name, "uninstalled");
        }
        let mode = self.config.install_mode();
        self.rebuild(mode).await
    }

    /// Trace local modules into the map without installing them.
    ///
    /// # Errors
    /// Returns trace errors.
    pub async fn link<S: AsRef<str>>(&mut self, specifiers: &[S]) -> Result<()> {
        self.apply_pending_input().await?;
        for specifier in specifiers {
            let specifier = specifier.as_ref().to_string();
            if !self.pins.contains(&specifier) {
                self.pins.push(specifier);
            }
        }
        let mode = self.config.install_mode();
        self.rebuild(mode).await
    }

    async fn rebuild(&mut self, mode: InstallMode) -> Result<()> {
        self.installer.start_install()?;
        let traced = self.trace.extract_map(&self.pins, mode).await;
        self.installer.finish_install();
        let (traced, info) = traced?;

        let mut map = self.trace.input_map().await;
        map.extend(&traced, false);
        debug!(
            imports = map.imports.len(),
            scopes = map.scopes.len(),
            static_deps = info.static_deps.len(),
            dynamic_deps = info.dynamic_deps.len(),
            "map rebuilt"
        );
        self.map = map;
        self.info = info;
        Ok(())
    }

    /// Resolve `specifier` through the current map, from `parent` or the map
    /// URL. `None` for null mappings.
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] for unmapped bare specifiers.
    pub fn resolve(&self, specifier: &str, parent: Option<&Url>) -> Result<Option<Url>> {
        let parent = parent.unwrap_or(&self.config.map_url);
        self.map.resolve(specifier, parent)
    }

    /// The current map, relative to the map URL, flattened and sorted.
    #[must_use]
    pub fn get_map(&self) -> Value {
        let mut map = self.map.clone();
        map.rebase(self.config.map_url.clone(), self.config.root_url.clone())
            .flatten();
        map.to_json()
    }

    /// Modules reached by the last rebuild.
    #[must_use]
    pub fn trace_info(&self) -> &TraceInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchResponse, MemoryFetcher};
    use serde_json::json;

    fn config() -> GeneratorConfig {
        GeneratorConfig::new(Url::parse("file:///app/importmap.json").unwrap())
    }

    fn js(body: &str) -> FetchResponse {
        FetchResponse::ok(body.to_string(), Some("application/javascript"))
    }

    fn registry() -> MemoryFetcher {
        MemoryFetcher::new()
            .with_text("https://ga.jspm.io/npm:lit", "2.6.1")
            .with_json(
                "https://ga.jspm.io/npm:lit@2.6.1/package.json",
                &json!({"name": "lit", "exports": {".": "./index.js", "./html.js": "./html.js"}}),
            )
            .with_response("https://ga.jspm.io/npm:lit@2.6.1/index.js", js("export const lit = 1;"))
            .with_response("https://ga.jspm.io/npm:lit@2.6.1/html.js", js("export const html = 1;"))
    }

    #[tokio::test]
    async fn test_install_subpath_target() {
        let mut generator = Generator::with_fetcher(config(), Arc::new(registry()));
        generator.install(&["lit|html.js"]).await.unwrap();
        assert_eq!(generator.pins(), ["lit/html.js"]);
        assert_eq!(
            generator.get_map(),
            json!({"imports": {"lit/html.js": "https://ga.jspm.io/npm:lit@2.6.1/html.js"}})
        );
    }

    #[tokio::test]
    async fn test_update_unknown_name() {
        let mut generator = Generator::with_fetcher(config(), Arc::new(registry()));
        let err = generator.update(&["react"]).await.unwrap_err();
        assert_eq!(err.to_string(), "No \"react\" install found");
        let err = generator.uninstall(&["react"]).await.unwrap_err();
        assert_eq!(err.to_string(), "No \"react\" install found");
    }

    #[tokio::test]
    async fn test_resolve_through_map() {
        let mut generator = Generator::with_fetcher(config(), Arc::new(registry()));
        generator.install(&["lit"]).await.unwrap();
        let url = generator.resolve("lit", None).unwrap().unwrap();
        assert_eq!(url.as_str(), "https://ga.jspm.io/npm:lit@2.6.1/index.js");
        assert!(generator.resolve("missing", None).is_err());
        assert_eq!(
            generator.trace_info().static_deps,
            vec!["https://ga.jspm.io/npm:lit@2.6.1/index.js".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pending_input_map_applied_once() {
        let config = config().with_input_map(json!({
            "imports": {"lit": "https://ga.jspm.io/npm:lit@2.6.1/index.js"}
        }));
        let fetcher = Arc::new(registry());
        let mut generator = Generator::with_fetcher(config, Arc::clone(&fetcher) as Arc<dyn Fetch>);
        generator.link(&["lit"]).await.unwrap();
        assert_eq!(generator.pins(), ["lit"]);
        assert_eq!(
            generator.get_map()["imports"]["lit"],
            "https://ga.jspm.io/npm:lit@2.6.1/index.js"
        );
        // The lock came from the input map, not the registry.
        assert_eq!(fetcher.request_count("https://ga.jspm.io/npm:lit").await, 0);
    }
}
