//! The trace: walk the module graph from the pinned specifiers, letting the
//! installer lock every bare import on the way, until a full pass locks
//! nothing new. The converged graph is then written out as an import map.
//!
//! Each pass records, per `specifier##parent` edge, where the specifier
//! resolved. Modules are fetched and analyzed once per session, keyed by URL.

mod entry;

pub use entry::TraceEntry;

use crate::cache::OnceMap;
use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::importmap::{ImportMap, MapLookup};
use crate::install::{InstallMode, InstalledResolution, Installer};
use crate::package::parse_pkg;
use crate::resolver::builtins::builtin_name;
use crate::resolver::exports;
use crate::resolver::Resolver;
use async_recursion::async_recursion;
use futures::future::try_join_all;
use pinmap_util::url::{is_mappable_scheme, is_plain, is_url};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};
use url::Url;

/// Full passes allowed before an install is declared divergent.
const MAX_INSTALL_PASSES: usize = 100;

/// Protocols a non-bare specifier may resolve to.
const ALLOWED_PROTOCOLS: [&str; 5] = ["file", "https", "http", "node", "data"];

#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Package scope of the pins.
    pub base_url: Url,
    /// Base of the produced map.
    pub map_url: Url,
    pub root_url: Option<Url>,
    pub ignore: Vec<String>,
    pub static_trace: bool,
    pub system: bool,
    pub integrity: bool,
    pub depcache: bool,
}

impl TraceOptions {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            map_url: base_url.clone(),
            base_url,
            root_url: None,
            ignore: Vec::new(),
            static_trace: false,
            system: false,
            integrity: false,
            depcache: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            base_url: config.install_base_url(),
            map_url: config.map_url.clone(),
            root_url: config.root_url.clone(),
            ignore: config.ignore.clone(),
            static_trace: config.static_trace,
            system: config.system,
            integrity: config.integrity,
            depcache: config.depcache,
        }
    }
}

/// Modules reached by the last map extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInfo {
    pub static_deps: Vec<String>,
    pub dynamic_deps: Vec<String>,
}

#[derive(Debug, Default)]
struct TracePass {
    seen: Mutex<HashSet<String>>,
    resolved: Mutex<HashMap<String, Option<Url>>>,
}

fn edge_key(specifier: &str, parent: &Url) -> String {
    format!("{specifier}##{parent}")
}

fn is_traceable(url: &Url) -> bool {
    matches!(url.scheme(), "file" | "http" | "https")
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| Error::invalid_url(path, e))
}

#[derive(Debug)]
pub struct TraceMap {
    resolver: Arc<Resolver>,
    installer: Arc<Installer>,
    options: TraceOptions,
    /// User mappings that are not locks.
    input_map: RwLock<ImportMap>,
    traced: OnceMap<Arc<TraceEntry>>,
}

impl TraceMap {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, installer: Arc<Installer>, options: TraceOptions) -> Self {
        let input_map = ImportMap::new(options.map_url.clone()).with_root_url(options.root_url.clone());
        Self {
            resolver,
            installer,
            options,
            input_map: RwLock::new(input_map),
            traced: OnceMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Add custom mappings consulted during resolution.
    pub async fn add_input_map(&self, map: &ImportMap) {
        self.input_map.write().await.extend(map, false);
    }

    /// Remove a top-level custom mapping and its subpaths.
    pub async fn remove_input_import(&self, name: &str) {
        let prefix = format!("{name}/");
        self.input_map
            .write()
            .await
            .imports
            .retain(|key, _| key != name && !key.starts_with(&prefix));
    }

    pub async fn input_map(&self) -> ImportMap {
        self.input_map.read().await.clone()
    }

    fn is_ignored(&self, specifier: &str) -> bool {
        self.options.ignore.iter().any(|ignored| {
            ignored == specifier
                || parse_pkg(specifier).is_some_and(|(name, _)| &name == ignored)
        })
    }

    /// Whether modules of `parent_pkg` resolve against the top-level locks.
    fn is_top_level(&self, parent_pkg: &Url, parent: &Url) -> bool {
        let base = self.options.base_url.as_str();
        base.starts_with(parent_pkg.as_str()) && parent.as_str().starts_with(base)
    }

    fn keeps_builtins(&self) -> bool {
        self.resolver.env().iter().any(|c| c == "node" || c == "deno")
    }

    /// Resolve `specifier` imported from `parent`, installing as needed.
    ///
    /// Returns `None` for ignored specifiers and null mappings.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for unsupported protocols and
    /// malformed specifiers, and resolution and install errors unchanged.
    #[async_recursion]
    pub async fn resolve(
        &self,
        specifier: &str,
        parent: &Url,
        cjs_parent: bool,
        mode: InstallMode,
    ) -> Result<Option<Url>> {
        if self.is_ignored(specifier) {
            trace!(specifier, parent = %parent, "ignored");
            return Ok(None);
        }

        if !is_plain(specifier) && !is_mappable_scheme(specifier) {
            let url = join(parent, specifier)?;
            if !ALLOWED_PROTOCOLS.contains(&url.scheme()) {
                return Err(Error::invalid_input(format!(
                    "Unsupported protocol {}: for {specifier} imported from {parent}",
                    url.scheme()
                )));
            }
            if !is_traceable(&url) {
                return Ok(Some(url));
            }
            let pkg_url = self.resolver.get_package_base(&url).await?;
            let resolved = self.resolver.finalize_resolve(url, cjs_parent, &pkg_url).await?;
            debug!(specifier, parent = %parent, resolved = %resolved, step = "url", "resolved");
            return Ok(Some(resolved));
        }

        let parent_pkg = self.resolver.get_package_base(parent).await?;

        let scoped = self.input_map.read().await.resolve_scoped(specifier, parent)?;
        match scoped {
            MapLookup::Hit(url) => {
                debug!(specifier, parent = %parent, resolved = %url, step = "scope", "resolved");
                return self.finalize(url, cjs_parent).await.map(Some);
            }
            MapLookup::Null => return Ok(None),
            MapLookup::Miss => {}
        }

        let pkg_name_and_subpath = parse_pkg(specifier);
        if let Some((pkg_name, subpath)) = &pkg_name_and_subpath {
            let pcfg = self.resolver.get_package_config(parent_pkg.as_str()).await?;
            let own_name = pcfg
                .as_ref()
                .is_some_and(|pcfg| pcfg.name.as_deref() == Some(pkg_name.as_str()) && pcfg.exports.is_some());
            if own_name {
                let url = self
                    .resolver
                    .resolve_export(&parent_pkg, subpath, cjs_parent, specifier, Some(parent.as_str()))
                    .await?;
                let resolved = self.resolver.finalize_resolve(url, cjs_parent, &parent_pkg).await?;
                debug!(specifier, parent = %parent, resolved = %resolved, step = "self", "resolved");
                return Ok(Some(resolved));
            }
        }

        if specifier.starts_with('#') {
            let target = self
                .resolver
                .resolve_imports(&parent_pkg, specifier, cjs_parent)
                .await?
                .ok_or_else(|| {
                    Error::module_not_found(format!(
                        "Unable to resolve \"{specifier}\" from {parent}: not defined in the imports of {parent_pkg}"
                    ))
                })?;
            debug!(specifier, parent = %parent, target = %target, step = "imports", "private import");
            if target.starts_with("./") || is_url(&target) {
                let url = join(&parent_pkg, &target)?;
                return self
                    .resolver
                    .finalize_resolve(url, cjs_parent, &parent_pkg)
                    .await
                    .map(Some);
            }
            return self.resolve(&target, parent, cjs_parent, mode).await;
        }

        if self.keeps_builtins() {
            if let Some(builtin) = builtin_name(specifier) {
                let url = join(&self.options.base_url, &format!("node:{builtin}"))?;
                debug!(specifier, parent = %parent, resolved = %url, step = "builtin", "resolved");
                return Ok(Some(url));
            }
        }

        let (pkg_name, subpath) = pkg_name_and_subpath
            .ok_or_else(|| Error::invalid_input(format!("Invalid specifier {specifier}")))?;
        let scope = (!self.is_top_level(&parent_pkg, parent)).then_some(&parent_pkg);

        if let Some(installed) = self
            .installer
            .install(&pkg_name, mode, scope, &subpath, parent.as_str())
            .await?
        {
            let resolved = self
                .resolve_installed(&installed, &subpath, specifier, parent, cjs_parent)
                .await?;
            debug!(specifier, parent = %parent, resolved = %resolved, step = "install", "resolved");
            return Ok(Some(resolved));
        }

        let root = self.input_map.read().await.resolve_root(specifier)?;
        match root {
            MapLookup::Hit(url) => {
                debug!(specifier, parent = %parent, resolved = %url, step = "imports", "resolved");
                return self.finalize(url, cjs_parent).await.map(Some);
            }
            MapLookup::Null => return Ok(None),
            MapLookup::Miss => {}
        }

        let installed = self
            .installer
            .install_fallback(&pkg_name, mode, parent.as_str())
            .await?;
        let resolved = self
            .resolve_installed(&installed, &subpath, specifier, parent, cjs_parent)
            .await?;
        debug!(specifier, parent = %parent, resolved = %resolved, step = "fallback", "resolved");
        Ok(Some(resolved))
    }

    async fn finalize(&self, url: Url, cjs_parent: bool) -> Result<Url> {
        if !is_traceable(&url) {
            return Ok(url);
        }
        let pkg_url = self.resolver.get_package_base(&url).await?;
        self.resolver.finalize_resolve(url, cjs_parent, &pkg_url).await
    }

    async fn resolve_installed(
        &self,
        installed: &InstalledResolution,
        subpath: &str,
        specifier: &str,
        parent: &Url,
        cjs_parent: bool,
    ) -> Result<Url> {
        let pkg_url = &installed.install_url;
        let narrow = installed
            .install_subpath
            .as_deref()
            .filter(|_| pkg_url.scheme() != "node");
        if narrow.is_some() {
            let narrowed = self
                .resolver
                .resolve_exports(pkg_url, cjs_parent, narrow)
                .await?;
            if let Some(href) = exports::lookup_export(&narrowed, subpath) {
                let url = Url::parse(&href).map_err(|e| Error::invalid_url(&href, e))?;
                return self.resolver.finalize_resolve(url, cjs_parent, pkg_url).await;
            }
        }

        let subpath = match &installed.install_subpath {
            Some(install_subpath) if subpath == "." => install_subpath.clone(),
            Some(install_subpath) => format!("{install_subpath}{}", &subpath[1..]),
            None => subpath.to_string(),
        };

        if pkg_url.scheme() == "node" {
            let name = pkg_url.as_str().trim_end_matches('/');
            let href = format!("{name}{}", subpath.trim_start_matches('.'));
            return Url::parse(&href).map_err(|e| Error::invalid_url(&href, e));
        }

        let url = self
            .resolver
            .resolve_export(pkg_url, &subpath, cjs_parent, specifier, Some(parent.as_str()))
            .await?;
        self.resolver.finalize_resolve(url, cjs_parent, pkg_url).await
    }

    async fn trace_entry(&self, url: &Url, parent: &Url) -> Result<Arc<TraceEntry>> {
        self.traced
            .get_or_try_init(url.as_str(), || async {
                let info = self
                    .resolver
                    .analyze(url, Some(parent.as_str()), self.options.system)
                    .await?;
                let was_cjs = self.resolver.was_commonjs(url).await?;
                Ok(Arc::new(TraceEntry::new(info, was_cjs)))
            })
            .await
    }

    #[async_recursion]
    async fn visit(
        &self,
        specifier: &str,
        parent: &Url,
        cjs_parent: bool,
        mode: InstallMode,
        pass: &TracePass,
    ) -> Result<()> {
        let key = edge_key(specifier, parent);
        if !pass.seen.lock().await.insert(key.clone()) {
            return Ok(());
        }

        let resolved = self.resolve(specifier, parent, cjs_parent, mode).await?;
        pass.resolved.lock().await.insert(key, resolved.clone());
        let Some(url) = resolved.filter(is_traceable) else {
            return Ok(());
        };

        let entry = self.trace_entry(&url, parent).await?;
        let cjs = entry.is_commonjs();
        let deps = entry.traced_deps(self.options.static_trace);
        try_join_all(
            deps.into_iter()
                .map(|dep| self.visit(dep, &url, cjs, mode, pass)),
        )
        .await?;
        Ok(())
    }

    /// Trace `pins` until a full pass installs nothing new.
    async fn converge(&self, pins: &[String], mode: InstallMode) -> Result<TracePass> {
        let base = &self.options.base_url;
        for pass_number in 1..=MAX_INSTALL_PASSES {
            self.installer.reset_new_installs();
            let pass = TracePass::default();
            try_join_all(
                pins.iter()
                    .map(|pin| self.visit(pin, base, false, mode, &pass)),
            )
            .await?;
            if !self.installer.has_new_installs() {
                debug!(passes = pass_number, pins = pins.len(), "trace converged");
                return Ok(pass);
            }
            trace!(pass = pass_number, "new installs, tracing again");
        }
        Err(Error::internal(format!(
            "install did not converge after {MAX_INSTALL_PASSES} passes"
        )))
    }

    /// Trace `pins` to convergence and build the import map of everything
    /// they reach. Entries are absolute; the map is based at the map URL.
    ///
    /// # Errors
    /// Returns the first resolution, install or analysis error.
    pub async fn extract_map(
        &self,
        pins: &[String],
        mode: InstallMode,
    ) -> Result<(ImportMap, TraceInfo)> {
        let pass = self.converge(pins, mode).await?;
        let resolved = pass.resolved.into_inner();

        let mut map = ImportMap::new(self.options.map_url.clone())
            .with_root_url(self.options.root_url.clone());
        let mut info = TraceInfo::default();
        let mut expanded = HashSet::new();
        let mut dynamic_seeds = VecDeque::new();

        let pins: VecDeque<(String, Url, bool)> = pins
            .iter()
            .map(|pin| (pin.clone(), self.options.base_url.clone(), false))
            .collect();
        let mut assembly = Assembly {
            resolved: &resolved,
            map: &mut map,
            expanded: &mut expanded,
        };
        self.assemble(&mut assembly, pins, &mut info.static_deps, Some(&mut dynamic_seeds))
            .await?;
        if !self.options.static_trace {
            self.assemble(&mut assembly, dynamic_seeds, &mut info.dynamic_deps, None)
                .await?;
        }
        Ok((map, info))
    }

    /// Breadth-first walk over resolved edges, recording mappings.
    ///
    /// With `dynamic_seeds`, only static edges are followed and dynamic ones
    /// are collected for a later walk; without, every edge is followed.
    async fn assemble(
        &self,
        assembly: &mut Assembly<'_>,
        mut queue: VecDeque<(String, Url, bool)>,
        modules: &mut Vec<String>,
        mut dynamic_seeds: Option<&mut VecDeque<(String, Url, bool)>>,
    ) -> Result<()> {
        let mut edges = HashSet::new();
        while let Some((specifier, parent, cjs_parent)) = queue.pop_front() {
            let key = edge_key(&specifier, &parent);
            if !edges.insert(key.clone()) {
                continue;
            }
            let Some(Some(url)) = assembly.resolved.get(&key) else {
                continue;
            };
            let entry = if is_traceable(url) {
                self.traced.get(url.as_str()).await
            } else {
                None
            };
            let was_cjs = entry.as_ref().is_some_and(|e| e.was_cjs);
            self.record(assembly.map, &specifier, &parent, url, was_cjs)
                .await?;

            let Some(entry) = entry else {
                continue;
            };
            if !assembly.expanded.insert(url.clone()) {
                continue;
            }
            modules.push(url.to_string());
            if self.options.integrity {
                assembly.map.set_integrity(url.as_str(), &entry.integrity);
            }
            if self.options.depcache && !entry.deps.is_empty() {
                assembly.map.set_depcache(url.as_str(), entry.deps.clone());
            }

            let cjs = entry.is_commonjs();
            for dep in &entry.deps {
                queue.push_back((dep.clone(), url.clone(), cjs));
            }
            if self.options.static_trace {
                continue;
            }
            let dynamic = entry.dynamic_deps.iter().chain(&entry.cjs_lazy_deps);
            match dynamic_seeds.as_deref_mut() {
                Some(seeds) => seeds.extend(dynamic.map(|dep| (dep.clone(), url.clone(), cjs))),
                None => queue.extend(dynamic.map(|dep| (dep.clone(), url.clone(), cjs))),
            }
        }
        Ok(())
    }

    /// Write the mapping for one edge. Bare specifiers map at top level or in
    /// the importing package's scope; URLs only when resolution moved them.
    async fn record(
        &self,
        map: &mut ImportMap,
        specifier: &str,
        parent: &Url,
        resolved: &Url,
        was_cjs: bool,
    ) -> Result<()> {
        let parent_pkg = self.resolver.get_package_base(parent).await?;
        let scope = (!self.is_top_level(&parent_pkg, parent)).then(|| parent_pkg.to_string());

        let key = if is_plain(specifier) || is_mappable_scheme(specifier) {
            specifier.to_string()
        } else {
            let natural = join(parent, specifier)?;
            if &natural == resolved && !was_cjs {
                return Ok(());
            }
            natural.to_string()
        };
        map.set(&key, Some(resolved.to_string()), scope.as_deref());
        Ok(())
    }
}

struct Assembly<'a> {
    resolved: &'a HashMap<String, Option<Url>>,
    map: &'a mut ImportMap,
    expanded: &'a mut HashSet<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SourceAnalyzer;
    use crate::config::default_env;
    use crate::fetch::{Fetch, FetchResponse, MemoryFetcher};
    use crate::install::InstallerOptions;
    use crate::package::{InstallTarget, PackageTarget, Target};
    use crate::provider::ProviderRegistry;
    use serde_json::json;

    const BASE: &str = "file:///app/";

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn js(body: &str) -> FetchResponse {
        FetchResponse::ok(body.to_string(), Some("application/javascript"))
    }

    fn trace_map(fetcher: MemoryFetcher, env: Vec<String>, options: TraceOptions) -> TraceMap {
        let fetcher: Arc<dyn Fetch> = Arc::new(fetcher);
        let resolver = Arc::new(Resolver::new(
            ProviderRegistry::standard(Arc::clone(&fetcher)),
            fetcher,
            Arc::new(SourceAnalyzer),
            env,
        ));
        let installer = Arc::new(Installer::new(
            Arc::clone(&resolver),
            InstallerOptions::new(options.base_url.clone()),
        ));
        TraceMap::new(resolver, installer, options)
    }

    fn app() -> MemoryFetcher {
        MemoryFetcher::new()
            .with_json(
                "file:///app/package.json",
                &json!({"name": "app", "dependencies": {"dep": "^1.0.0"}, "imports": {"#util": "./src/util.js"}}),
            )
            .with_response(
                "file:///app/src/main.js",
                js("import dep from 'dep';\nimport './util.js';\nimport '#util';\nconst lazy = () => import('./lazy.js');"),
            )
            .with_response("file:///app/src/util.js", js("export const util = 1;"))
            .with_response("file:///app/src/lazy.js", js("export default 1;"))
            .with_text("https://ga.jspm.io/npm:dep@1", "1.2.0")
            .with_json(
                "https://ga.jspm.io/npm:dep@1.2.0/package.json",
                &json!({"name": "dep", "version": "1.2.0", "exports": {".": "./index.js"}, "dependencies": {"inner": "^2"}}),
            )
            .with_response(
                "https://ga.jspm.io/npm:dep@1.2.0/index.js",
                js("import inner from 'inner';\nexport default inner;"),
            )
            .with_text("https://ga.jspm.io/npm:inner@2", "2.0.1")
            .with_json(
                "https://ga.jspm.io/npm:inner@2.0.1/package.json",
                &json!({"name": "inner", "version": "2.0.1", "exports": {".": "./inner.js"}}),
            )
            .with_response("https://ga.jspm.io/npm:inner@2.0.1/inner.js", js("export default 2;"))
    }

    #[tokio::test]
    async fn test_extract_map_scopes_dependencies() {
        let trace = trace_map(app(), default_env(), TraceOptions::new(u(BASE)));
        let pins = vec!["./src/main.js".to_string()];
        let (map, info) = trace.extract_map(&pins, InstallMode::Default).await.unwrap();

        assert_eq!(
            map.imports["dep"].as_deref(),
            Some("https://ga.jspm.io/npm:dep@1.2.0/index.js")
        );
        assert_eq!(
            map.scopes["https://ga.jspm.io/npm:dep@1.2.0/"]["inner"].as_deref(),
            Some("https://ga.jspm.io/npm:inner@2.0.1/inner.js")
        );
        assert!(!map.imports.contains_key("./src/main.js"));
        assert!(info.static_deps.contains(&"file:///app/src/main.js".to_string()));
        assert_eq!(info.dynamic_deps, vec!["file:///app/src/lazy.js".to_string()]);
    }

    #[tokio::test]
    async fn test_static_trace_skips_dynamic_imports() {
        let mut options = TraceOptions::new(u(BASE));
        options.static_trace = true;
        options.integrity = true;
        options.depcache = true;
        let trace = trace_map(app(), default_env(), options);
        let (map, info) = trace
            .extract_map(&["./src/main.js".to_string()], InstallMode::Default)
            .await
            .unwrap();
        assert!(info.dynamic_deps.is_empty());
        assert!(!map.integrity.contains_key("file:///app/src/lazy.js"));
        assert!(map.integrity["file:///app/src/main.js"].starts_with("sha384-"));
        assert_eq!(
            map.depcache["https://ga.jspm.io/npm:dep@1.2.0/index.js"],
            vec!["inner".to_string()]
        );
    }

    #[tokio::test]
    async fn test_convergence_is_idempotent() {
        let trace = trace_map(app(), default_env(), TraceOptions::new(u(BASE)));
        let pins = vec!["./src/main.js".to_string()];
        let (first, _) = trace.extract_map(&pins, InstallMode::Default).await.unwrap();
        let (second, _) = trace.extract_map(&pins, InstallMode::Default).await.unwrap();
        assert!(!trace.installer.has_new_installs());
        assert_eq!(first.to_json(), second.to_json());
    }

    #[tokio::test]
    async fn test_private_imports_and_unsupported_protocols() {
        let trace = trace_map(app(), default_env(), TraceOptions::new(u(BASE)));
        let parent = u("file:///app/src/main.js");
        let util = trace
            .resolve("#util", &parent, false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(util.unwrap().as_str(), "file:///app/src/util.js");

        let err = trace
            .resolve("ftp://x.dev/a.js", &parent, false, InstallMode::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let data = trace
            .resolve("data:text/javascript,export{}", &parent, false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(data.unwrap().scheme(), "data");
    }

    #[tokio::test]
    async fn test_builtins_by_environment() {
        let node_env: Vec<String> = ["node", "module", "import"].iter().map(|s| s.to_string()).collect();
        let trace = trace_map(app(), node_env, TraceOptions::new(u(BASE)));
        let parent = u("file:///app/src/main.js");
        let fs = trace
            .resolve("fs", &parent, false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(fs.unwrap().as_str(), "node:fs");

        let browser = trace_map(
            app()
                .with_text("https://ga.jspm.io/npm:@jspm/core", "2.0.1")
                .with_json(
                    "https://ga.jspm.io/npm:@jspm/core@2.0.1/package.json",
                    &json!({"name": "@jspm/core", "exports": {"./nodelibs/fs": "./nodelibs/browser/fs.js"}}),
                ),
            default_env(),
            TraceOptions::new(u(BASE)),
        );
        let fs = browser
            .resolve("node:fs", &parent, false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(
            fs.unwrap().as_str(),
            "https://ga.jspm.io/npm:@jspm/core@2.0.1/nodelibs/browser/fs.js"
        );
    }

    #[tokio::test]
    async fn test_ignore_and_input_map() {
        let mut options = TraceOptions::new(u(BASE));
        options.ignore.push("ignored".into());
        let trace = trace_map(app(), default_env(), options);
        let mut input = ImportMap::new(u("file:///app/importmap.json"));
        input.set("custom", Some("./vendor/custom.js".into()), None);
        input.set("dep", Some("./vendor/dep.js".into()), Some("./src/"));
        trace.add_input_map(&input).await;

        let parent = u("file:///app/src/main.js");
        let mode = InstallMode::Default;
        assert_eq!(trace.resolve("ignored", &parent, false, mode).await.unwrap(), None);
        let custom = trace.resolve("custom", &parent, false, mode).await.unwrap();
        assert_eq!(custom.unwrap().as_str(), "file:///app/vendor/custom.js");
        let scoped = trace.resolve("dep", &parent, false, mode).await.unwrap();
        assert_eq!(scoped.unwrap().as_str(), "file:///app/vendor/dep.js");
    }

    #[tokio::test]
    async fn test_subpath_install_narrows_exports() {
        let fetcher = app()
            .with_json(
                "https://ga.jspm.io/npm:dep@1.2.0/package.json",
                &json!({"name": "dep", "exports": {
                    ".": "./index.js",
                    "./directives/*": {"browser": "./directives/*.browser.js", "default": "./directives/*.js"}
                }}),
            )
            .with_response(
                "https://ga.jspm.io/npm:dep@1.2.0/directives/repeat.browser.js",
                js("export const repeat = 1;"),
            );
        let trace = trace_map(fetcher, default_env(), TraceOptions::new(u(BASE)));
        let target = InstallTarget::new(Target::Package(PackageTarget {
            registry: "npm".into(),
            name: "dep".into(),
            ranges: crate::range::parse_ranges("^1.0.0").unwrap(),
            unstable: false,
        }))
        .with_subpath("./directives");
        trace
            .installer
            .install_target("dep", target, InstallMode::Default, None, BASE)
            .await
            .unwrap();
        let resolved = trace
            .resolve("dep/repeat", &u(BASE), false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(
            resolved.unwrap().as_str(),
            "https://ga.jspm.io/npm:dep@1.2.0/directives/repeat.browser.js"
        );
    }

    #[tokio::test]
    async fn test_primary_install_resolves_subpath() {
        let fetcher = app().with_json(
            "https://ga.jspm.io/npm:dep@1.2.0/package.json",
            &json!({"name": "dep", "exports": {".": "./index.js", "./feature": "./feature.js"}}),
        );
        let trace = trace_map(fetcher, default_env(), TraceOptions::new(u(BASE)));
        let target = InstallTarget::new(Target::Package(PackageTarget {
            registry: "npm".into(),
            name: "dep".into(),
            ranges: crate::range::parse_ranges("^1.0.0").unwrap(),
            unstable: false,
        }));
        trace
            .installer
            .install_target("dep", target, InstallMode::Default, None, BASE)
            .await
            .unwrap();
        let resolved = trace
            .resolve("dep/feature", &u(BASE), false, InstallMode::Default)
            .await
            .unwrap();
        assert_eq!(
            resolved.unwrap().as_str(),
            "https://ga.jspm.io/npm:dep@1.2.0/feature.js"
        );
    }
}
