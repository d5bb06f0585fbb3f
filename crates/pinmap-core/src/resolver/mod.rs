//! Package-aware module resolution.
//!
//! The resolver owns everything that does not depend on install decisions:
//! provider dispatch, manifest fetching, `exports`/`imports` resolution,
//! the legacy `main`/`browser` fallbacks and module analysis.
//!
//! Manifests and existence probes are cached per session. Concurrent
//! requests for the same URL share one fetch.

pub mod builtins;
pub mod exports;

use crate::analysis::{AnalyzeMode, Analyzer, ModuleFormat, SourceAnalysis};
use crate::cache::OnceMap;
use crate::error::{imported_from, Error, Result};
use crate::fetch::Fetch;
use crate::package::{ExactPackage, PackageConfig, PackageTarget};
use crate::provider::{ConfigLookup, Provider, ProviderRef, ProviderRegistry, UrlPackage};
use async_recursion::async_recursion;
use pinmap_util::url::{dir_url, origin_root};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// Manifest statuses that mean "no manifest" rather than a fault.
const ABSENT_STATUSES: [u16; 4] = [401, 403, 404, 406];

/// Extensions probed after a CommonJS path, in order.
const CJS_EXTENSIONS: [&str; 3] = [".js", ".json", ".node"];

/// A fetched and analyzed module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub analysis: SourceAnalysis,
    /// Source length in bytes.
    pub size: usize,
    /// `sha384-<base64>` of the source.
    pub integrity: String,
}

/// Resolution services for one generator session.
#[derive(Debug)]
pub struct Resolver {
    providers: ProviderRegistry,
    fetcher: Arc<dyn Fetch>,
    analyzer: Arc<dyn Analyzer>,
    env: Vec<String>,
    cjs_env: Vec<String>,
    configs: OnceMap<Option<Arc<PackageConfig>>>,
    exists: OnceMap<bool>,
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| Error::invalid_url(path, e))
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::invalid_url(url, e))
}

fn extension(url: &Url) -> &str {
    let file = url.path().rsplit('/').next().unwrap_or("");
    file.rsplit_once('.').map_or("", |(_, ext)| ext)
}

impl Resolver {
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        fetcher: Arc<dyn Fetch>,
        analyzer: Arc<dyn Analyzer>,
        env: Vec<String>,
    ) -> Self {
        let cjs_env = crate::config::cjs_env(&env);
        Self {
            providers,
            fetcher,
            analyzer,
            env,
            cjs_env,
            configs: OnceMap::new(),
            exists: OnceMap::new(),
        }
    }

    /// Export conditions, in priority order.
    #[must_use]
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Conditions for modules imported from CommonJS.
    #[must_use]
    pub fn cjs_env(&self) -> &[String] {
        &self.cjs_env
    }

    fn env_for(&self, cjs: bool) -> &[String] {
        if cjs {
            &self.cjs_env
        } else {
            &self.env
        }
    }

    fn is_browser(&self) -> bool {
        self.env.iter().any(|c| c == "browser")
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn fetcher(&self) -> &Arc<dyn Fetch> {
        &self.fetcher
    }

    /// The provider registered under `provider.name`.
    ///
    /// # Errors
    /// Returns an error when no such provider is registered.
    pub fn provider(&self, provider: &ProviderRef) -> Result<&Arc<dyn Provider>> {
        self.providers.get(&provider.name).ok_or_else(|| {
            Error::invalid_input(format!(
                "No provider named \"{}\" has been defined",
                provider.name
            ))
        })
    }

    /// Package base URL of `pkg` on `provider`.
    ///
    /// # Errors
    /// Returns an error for unknown providers, unsupported layers, or a
    /// provider URL without a trailing `/`.
    pub fn pkg_to_url(&self, pkg: &ExactPackage, provider: &ProviderRef) -> Result<Url> {
        let url = self.provider(provider)?.pkg_to_url(pkg, &provider.layer)?;
        if !url.ends_with('/') {
            return Err(Error::internal(format!(
                "provider {provider} returned package URL {url} without a trailing '/'"
            )));
        }
        parse_url(&url)
    }

    /// The package and provider a URL belongs to.
    #[must_use]
    pub fn parse_url_pkg(&self, url: &str) -> Option<(ProviderRef, UrlPackage)> {
        self.providers.parse_url_pkg(url)
    }

    /// The highest version admitted by `target` on `provider`.
    ///
    /// # Errors
    /// Returns [`Error::VersionNotFound`] when nothing is in range, and
    /// provider errors unchanged.
    pub async fn resolve_latest_target(
        &self,
        target: &PackageTarget,
        provider: &ProviderRef,
        parent_url: Option<&str>,
    ) -> Result<ExactPackage> {
        let resolved = self
            .provider(provider)?
            .resolve_latest_target(target, &provider.layer, parent_url)
            .await?;
        match resolved {
            Some(pkg) => {
                debug!(target = %target, provider = %provider, resolved = %pkg, "resolved latest");
                Ok(pkg)
            }
            None => Err(Error::VersionNotFound {
                registry: target.registry.clone(),
                name: target.name.clone(),
                range: target.range_string(),
                parent_url: parent_url.map(String::from),
            }),
        }
    }

    /// The manifest of the package based at `pkg_url`, or `None` when the
    /// package has none.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when `pkg_url` lacks its trailing `/`,
    /// and [`Error::FetchStatus`] for statuses outside the absence set.
    pub async fn get_package_config(&self, pkg_url: &str) -> Result<Option<Arc<PackageConfig>>> {
        if !pkg_url.ends_with('/') {
            return Err(Error::internal(format!(
                "package URL {pkg_url} must end in '/'"
            )));
        }
        self.configs
            .get_or_try_init(pkg_url, || self.fetch_package_config(pkg_url))
            .await
    }

    async fn fetch_package_config(&self, pkg_url: &str) -> Result<Option<Arc<PackageConfig>>> {
        if let Some((provider_ref, _)) = self.providers.parse_url_pkg(pkg_url) {
            if let Some(provider) = self.providers.get(&provider_ref.name) {
                match provider.get_package_config(pkg_url).await? {
                    ConfigLookup::Defer => {}
                    ConfigLookup::Absent => return Ok(None),
                    ConfigLookup::Found(pcfg) => return Ok(Some(Arc::new(pcfg))),
                }
            }
        }

        let base = parse_url(pkg_url)?;
        if !matches!(base.scheme(), "file" | "http" | "https") {
            return Ok(None);
        }
        let url = join(&base, "package.json")?;
        let response = self.fetcher.fetch(&url).await?;
        trace!(url = %url, status = response.status, "package config");

        if ABSENT_STATUSES.contains(&response.status) {
            return Ok(None);
        }
        if !response.is_ok() {
            return Err(Error::FetchStatus {
                url: url.to_string(),
                status: response.status,
                body: response.text().into_owned(),
            });
        }
        if !response.is_json() {
            return Ok(None);
        }
        Ok(PackageConfig::from_slice(&response.body).map(Arc::new))
    }

    /// The package base containing `url`.
    ///
    /// Provider URLs map directly to their package. Other URLs walk up to the
    /// nearest directory with a manifest, ending at the origin root.
    ///
    /// # Errors
    /// Returns manifest fetch errors.
    pub async fn get_package_base(&self, url: &Url) -> Result<Url> {
        if let Some((provider, parsed)) = self.parse_url_pkg(url.as_str()) {
            return self.pkg_to_url(&parsed.pkg, &provider);
        }

        if matches!(url.scheme(), "file" | "http" | "https") {
            let mut dir = dir_url(url);
            loop {
                if self.get_package_config(dir.as_str()).await?.is_some() {
                    return Ok(dir);
                }
                let parent = join(&dir, "../")?;
                if parent == dir {
                    break;
                }
                dir = parent;
            }
        }

        parse_url(&origin_root(url))
    }

    /// Every export of the package at `pkg_url`, as subpath to absolute URL.
    /// Pattern exports keep their `*`.
    ///
    /// # Errors
    /// Returns manifest fetch errors.
    pub async fn resolve_exports(
        &self,
        pkg_url: &Url,
        cjs: bool,
        filter: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let pcfg = self
            .get_package_config(pkg_url.as_str())
            .await?
            .unwrap_or_default();
        let exports = exports::exports_map(&pcfg, self.env_for(cjs), filter);
        Ok(exports
            .into_iter()
            .map(|(subpath, target)| {
                let relative = match target.strip_prefix("./") {
                    Some(rest) => rest,
                    None if target == "." => "",
                    None => target.as_str(),
                };
                (subpath, format!("{pkg_url}{relative}"))
            })
            .collect())
    }

    /// Resolve one export subpath of a package.
    ///
    /// Without an `exports` field, `.` goes through the legacy main lookup
    /// and other subpaths resolve as plain paths.
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] when the subpath is not exported or
    /// no main entry exists.
    pub async fn resolve_export(
        &self,
        pkg_url: &Url,
        subpath: &str,
        cjs: bool,
        specifier: &str,
        parent_url: Option<&str>,
    ) -> Result<Url> {
        let env = self.env_for(cjs);
        let pcfg = self
            .get_package_config(pkg_url.as_str())
            .await?
            .unwrap_or_default();

        match &pcfg.exports {
            Some(exports) => {
                let target = exports::resolve_export_subpath(exports, subpath, env)
                    .ok_or_else(|| {
                        Error::export_not_defined(subpath, pkg_url.as_str(), specifier, parent_url)
                    })?;
                join(pkg_url, &target)
            }
            None if subpath == "." => {
                let main = exports::legacy_main(&pcfg, env);
                self.legacy_main_resolve(main, pkg_url, specifier, parent_url)
                    .await
            }
            None => join(pkg_url, subpath),
        }
    }

    /// Probe `main`, then its extension and index variants, then the package
    /// index files.
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] when no candidate exists.
    pub async fn legacy_main_resolve(
        &self,
        main: Option<&str>,
        pkg_url: &Url,
        specifier: &str,
        parent_url: Option<&str>,
    ) -> Result<Url> {
        let candidates: Vec<String> = match main {
            Some(main) => {
                let main = main.trim_start_matches("./");
                let dir = main.trim_end_matches('/');
                vec![
                    main.to_string(),
                    format!("{main}.js"),
                    format!("{main}.json"),
                    format!("{main}.node"),
                    format!("{dir}/index.js"),
                    format!("{dir}/index.json"),
                    format!("{dir}/index.node"),
                ]
            }
            None => vec![
                "index.js".to_string(),
                "index.json".to_string(),
                "index.node".to_string(),
            ],
        };

        for candidate in &candidates {
            if candidate.is_empty() || candidate.ends_with('/') {
                continue;
            }
            let url = join(pkg_url, candidate)?;
            if self.exists(&url).await? {
                return Ok(url);
            }
        }

        Err(Error::ModuleNotFound {
            message: format!(
                "Unable to resolve {} main in {pkg_url} resolving {specifier}{}",
                main.unwrap_or("index"),
                imported_from(parent_url)
            ),
            pkg_url: Some(pkg_url.to_string()),
            pkg_name: None,
            parent_url: parent_url.map(String::from),
        })
    }

    /// Whether `url` can be fetched. Cached per URL.
    ///
    /// # Errors
    /// Returns transport errors.
    pub async fn exists(&self, url: &Url) -> Result<bool> {
        self.exists
            .get_or_try_init(url.as_str(), || async {
                let response = self.fetcher.fetch(url).await?;
                Ok(response.is_ok())
            })
            .await
    }

    /// Apply CommonJS path probing and the browser field to a resolved URL.
    ///
    /// Probing only happens when the importer is CommonJS; ESM paths are
    /// exact.
    ///
    /// # Errors
    /// Returns [`Error::Unimplemented`] for browser remaps to `false` or to
    /// another package.
    #[async_recursion]
    pub async fn finalize_resolve(
        &self,
        url: Url,
        parent_is_cjs: bool,
        pkg_url: &Url,
    ) -> Result<Url> {
        let mut url = url;

        if parent_is_cjs && matches!(url.scheme(), "file" | "http" | "https") {
            url = self.probe_cjs(url).await?;
        }

        if !self.is_browser() || !url.as_str().starts_with(pkg_url.as_str()) {
            return Ok(url);
        }
        let Some(pcfg) = self.get_package_config(pkg_url.as_str()).await? else {
            return Ok(url);
        };
        let Some(browser) = pcfg.browser_map() else {
            return Ok(url);
        };

        let subpath = format!("./{}", &url.as_str()[pkg_url.as_str().len()..]);
        let Some(target) = browser.get(&subpath) else {
            return Ok(url);
        };
        match target {
            Value::String(target) if target.starts_with("./") => {
                let mapped = join(pkg_url, target)?;
                if mapped == url {
                    return Ok(url);
                }
                debug!(from = %url, to = %mapped, "browser field remap");
                self.finalize_resolve(mapped, parent_is_cjs, pkg_url).await
            }
            Value::Bool(false) => Err(Error::Unimplemented(format!(
                "empty browser map for {subpath} in {url}"
            ))),
            other => Err(Error::Unimplemented(format!(
                "external browser map for {subpath} to {other} in {url}"
            ))),
        }
    }

    #[async_recursion]
    async fn probe_cjs(&self, url: Url) -> Result<Url> {
        let href = url.as_str().trim_end_matches('/').to_string();
        let dir = parse_url(&format!("{href}/"))?;

        if self.exists(&join(&dir, "package.json")?).await? {
            let pcfg = self
                .get_package_config(dir.as_str())
                .await?
                .unwrap_or_default();
            let main = exports::legacy_main(&pcfg, &self.cjs_env);
            let resolved = self.legacy_main_resolve(main, &dir, &href, None).await?;
            return self.probe_cjs(resolved).await;
        }
        for index in ["index.js", "index.json", "index.node"] {
            let candidate = join(&dir, index)?;
            if self.exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        let exact = parse_url(&href)?;
        if self.exists(&exact).await? {
            return Ok(exact);
        }
        for ext in CJS_EXTENSIONS {
            let candidate = parse_url(&format!("{href}{ext}"))?;
            if self.exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Ok(exact)
    }

    /// Resolve a `#private` specifier through the `imports` field of the
    /// package at `pkg_url`.
    ///
    /// Returns the raw target: package-relative (`./x`) or a bare specifier.
    ///
    /// # Errors
    /// Returns manifest fetch errors.
    pub async fn resolve_imports(
        &self,
        pkg_url: &Url,
        specifier: &str,
        cjs: bool,
    ) -> Result<Option<String>> {
        let Some(pcfg) = self.get_package_config(pkg_url.as_str()).await? else {
            return Ok(None);
        };
        let Some(imports) = pcfg.imports.as_ref() else {
            return Ok(None);
        };
        Ok(exports::resolve_imports(imports, specifier, self.env_for(cjs)))
    }

    /// The export subpath through which `subpath` (a `./file` path inside
    /// the package) is reachable, if any.
    ///
    /// # Errors
    /// Returns manifest fetch errors.
    pub async fn get_export_resolution(
        &self,
        pkg_url: &Url,
        subpath: &str,
    ) -> Result<Option<String>> {
        let pcfg = self
            .get_package_config(pkg_url.as_str())
            .await?
            .unwrap_or_default();
        let map = exports::exports_map(&pcfg, &self.env, None);
        if subpath == "." {
            return Ok(map.contains_key(".").then(|| ".".to_string()));
        }
        Ok(exports::export_for_target(&map, subpath))
    }

    /// Whether the CDN converted the module at `url` from CommonJS, marked
    /// by a `<subpath>!cjs` export key.
    ///
    /// # Errors
    /// Returns manifest fetch errors.
    pub async fn was_commonjs(&self, url: &Url) -> Result<bool> {
        let pkg_url = self.get_package_base(url).await?;
        let Some(subpath) = url.as_str().strip_prefix(pkg_url.as_str()) else {
            return Ok(false);
        };
        let Some(pcfg) = self.get_package_config(pkg_url.as_str()).await? else {
            return Ok(false);
        };
        let key = format!("./{subpath}!cjs");
        Ok(pcfg
            .exports
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|exports| exports.contains_key(&key)))
    }

    /// Fetch and analyze the module at `url`.
    ///
    /// A parse failure refetches once before surfacing. Under `file:`,
    /// sources without module syntax are re-read as CommonJS unless their
    /// package declares `"type": "module"`.
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] for a 404, [`Error::FetchStatus`]
    /// for other failures and [`Error::Parse`] after the retry.
    pub async fn analyze(
        &self,
        url: &Url,
        parent_url: Option<&str>,
        system: bool,
    ) -> Result<ModuleInfo> {
        let mode = if system {
            AnalyzeMode::System
        } else {
            AnalyzeMode::Esm
        };
        let mut retried = false;

        loop {
            let response = self.fetcher.fetch(url).await?;
            if response.status == 404 {
                return Err(Error::ModuleNotFound {
                    message: format!("Module not found: {url}{}", imported_from(parent_url)),
                    pkg_url: None,
                    pkg_name: None,
                    parent_url: parent_url.map(String::from),
                });
            }
            if !response.is_ok() {
                return Err(Error::FetchStatus {
                    url: url.to_string(),
                    status: response.status,
                    body: response.text().into_owned(),
                });
            }

            let analysis = match self.analyzer.analyze_source(&response.body, url, mode) {
                Ok(analysis) => analysis,
                Err(err @ Error::Parse { .. }) if !retried => {
                    debug!(url = %url, error = %err, "parse failed, refetching");
                    retried = true;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let analysis = if self.is_commonjs_boundary(url, &analysis).await? {
                self.analyzer
                    .analyze_source(&response.body, url, AnalyzeMode::CommonJs)?
            } else {
                analysis
            };

            trace!(url = %url, format = %analysis.format, deps = analysis.deps.len(), "analyzed");
            return Ok(ModuleInfo {
                analysis,
                size: response.body.len(),
                integrity: pinmap_util::hash::integrity(&response.body),
            });
        }
    }

    async fn is_commonjs_boundary(&self, url: &Url, analysis: &SourceAnalysis) -> Result<bool> {
        if url.scheme() != "file"
            || analysis.has_module_syntax
            || analysis.format != ModuleFormat::Esm
        {
            return Ok(false);
        }
        match extension(url) {
            "cjs" => Ok(true),
            "js" | "node" => {
                let pkg_url = self.get_package_base(url).await?;
                let is_module = self
                    .get_package_config(pkg_url.as_str())
                    .await?
                    .is_some_and(|pcfg| pcfg.is_module());
                Ok(!is_module)
            }
            _ => Ok(false),
        }
    }
}
