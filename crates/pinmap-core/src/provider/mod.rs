//! Registry backends.
//!
//! A [`Provider`] translates between package identities and CDN URLs and
//! answers version ranges against its registry. Providers are found by name
//! through the [`ProviderRegistry`], or by matching a URL against the CDN
//! roots they declare.

pub mod deno;
pub mod esmsh;
pub mod jsdelivr;
pub mod jspm;
pub mod lookup;
pub mod node;
pub mod node_modules;
pub mod skypack;
pub mod unpkg;

pub use lookup::JspmLookup;

use crate::error::Result;
use crate::fetch::Fetch;
use crate::package::{ExactPackage, PackageConfig, PackageTarget};
use futures::future::BoxFuture;
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Layer used when a provider string names none.
pub const DEFAULT_LAYER: &str = "default";

/// A provider name plus one of its URL layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRef {
    pub name: String,
    pub layer: String,
}

impl ProviderRef {
    #[must_use]
    pub fn new(name: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer: layer.into(),
        }
    }

    /// Split `name.layer` at the first dot.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.split_once('.') {
            Some((name, layer)) => Self::new(name, layer),
            None => Self::new(input, DEFAULT_LAYER),
        }
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.layer == DEFAULT_LAYER {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.name, self.layer)
        }
    }
}

/// A package recovered from one of its URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPackage {
    pub pkg: ExactPackage,
    pub layer: String,
    /// `./sub/path` below the package base, if the URL had one.
    pub subpath: Option<String>,
}

/// A provider's answer for a package manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigLookup {
    /// Fetch `package.json` from the package base.
    Defer,
    /// The package has no manifest.
    Absent,
    Found(PackageConfig),
}

/// A registry backend.
pub trait Provider: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// CDN URL prefixes this provider serves. Rootless providers are tried
    /// after every rooted one.
    fn roots(&self) -> Vec<String>;

    /// Package base URL, ending in `/`.
    ///
    /// # Errors
    /// Returns an error for registries or layers the provider cannot serve.
    fn pkg_to_url(&self, pkg: &ExactPackage, layer: &str) -> Result<String>;

    /// Inverse of [`Provider::pkg_to_url`]. `None` for foreign URLs.
    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage>;

    /// The highest version admitted by `target`, or `None` when the registry
    /// has nothing in range. Errors are reserved for registry faults.
    fn resolve_latest_target<'a>(
        &'a self,
        target: &'a PackageTarget,
        layer: &'a str,
        parent_url: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ExactPackage>>>;

    /// Manifest override for CDNs that do not serve `package.json` at the
    /// package base.
    fn get_package_config<'a>(&'a self, _pkg_url: &'a str) -> BoxFuture<'a, Result<ConfigLookup>> {
        Box::pin(async { Ok(ConfigLookup::Defer) })
    }
}

/// Providers by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in provider. Version lookups share one cache.
    #[must_use]
    pub fn standard(fetcher: Arc<dyn Fetch>) -> Self {
        let lookup = Arc::new(JspmLookup::new(Arc::clone(&fetcher)));
        let jspm: Arc<dyn Provider> = Arc::new(jspm::JspmProvider::new(Arc::clone(&lookup)));
        let deno: Arc<dyn Provider> = Arc::new(deno::DenoProvider::new(Arc::clone(&fetcher)));

        let mut registry = Self::new();
        registry.register("jspm", Arc::clone(&jspm));
        registry.register(
            "jsdelivr",
            Arc::new(jsdelivr::JsdelivrProvider::new(Arc::clone(&lookup))),
        );
        registry.register("unpkg", Arc::new(unpkg::UnpkgProvider::new(Arc::clone(&lookup))));
        registry.register(
            "skypack",
            Arc::new(skypack::SkypackProvider::new(Arc::clone(&lookup))),
        );
        registry.register("esm.sh", Arc::new(esmsh::EsmShProvider::new(Arc::clone(&lookup))));
        registry.register("node", Arc::new(node::NodeProvider::new(jspm)));
        registry.register(
            "node_modules",
            Arc::new(node_modules::NodeModulesProvider::new(fetcher)),
        );
        registry.register("deno", Arc::clone(&deno));
        registry.register("denoland", deno);
        registry
    }

    /// Add or replace a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    /// Parse a `provider[.layer]` string. Registered names containing a dot
    /// (`esm.sh`) take precedence over the split.
    #[must_use]
    pub fn provider_ref(&self, input: &str) -> ProviderRef {
        if self.providers.contains_key(input) {
            return ProviderRef::new(input, DEFAULT_LAYER);
        }
        for name in self.providers.keys().filter(|n| n.contains('.')) {
            if let Some(layer) = input
                .strip_prefix(name.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
            {
                return ProviderRef::new(name.clone(), layer);
            }
        }
        ProviderRef::parse(input)
    }

    /// The provider serving `url`: longest matching CDN root first, then
    /// rootless providers that recognise it.
    #[must_use]
    pub fn parse_url_pkg(&self, url: &str) -> Option<(ProviderRef, UrlPackage)> {
        let mut best: Option<(usize, &String, &Arc<dyn Provider>)> = None;
        for (name, provider) in &self.providers {
            for root in provider.roots() {
                if url.starts_with(&root) && best.as_ref().map_or(true, |(len, ..)| root.len() > *len)
                {
                    best = Some((root.len(), name, provider));
                }
            }
        }

        if let Some((_, name, provider)) = best {
            if let Some(parsed) = provider.parse_url_pkg(url) {
                let provider_ref = ProviderRef::new(name.clone(), parsed.layer.clone());
                return Some((provider_ref, parsed));
            }
        }

        self.providers
            .iter()
            .filter(|(_, p)| p.roots().is_empty())
            .find_map(|(name, provider)| {
                provider.parse_url_pkg(url).map(|parsed| {
                    (ProviderRef::new(name.clone(), parsed.layer.clone()), parsed)
                })
            })
    }
}

fn name_version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^((?:@[^/\\%@]+/)?[^./\\%@][^/\\%@]*)@([^/]+)(/.*)?$").ok()
    })
    .as_ref()
}

/// Split `name@version/sub/path` into name, version and `./sub/path`.
pub(crate) fn parse_name_version(rest: &str) -> Option<(String, String, Option<String>)> {
    let captures = name_version_regex()?.captures(rest)?;
    let name = captures.get(1)?.as_str().to_string();
    let version = captures.get(2)?.as_str().to_string();
    let subpath = captures
        .get(3)
        .map(|m| m.as_str())
        .filter(|s| *s != "/")
        .map(|s| format!(".{s}"));
    Some((name, version, subpath))
}
