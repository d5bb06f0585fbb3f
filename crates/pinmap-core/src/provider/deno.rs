//! deno.land: the standard library (`deno` registry) and third-party
//! modules under `/x/` (`denoland` registry).
//!
//! Modules are not npm packages; every package gets a synthetic manifest
//! mapping `.` to `mod.ts`.

use super::{parse_name_version, ConfigLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::cache::OnceMap;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::package::{ExactPackage, PackageConfig, PackageTarget};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use url::Url;

pub const CDN: &str = "https://deno.land/";
pub const VERSIONS_CDN: &str = "https://cdn.deno.land/";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct VersionList {
    latest: Option<String>,
    versions: Vec<String>,
}

#[derive(Debug)]
pub struct DenoProvider {
    fetcher: Arc<dyn Fetch>,
    /// Modules whose tags carry a `v` prefix.
    v_prefixed: RwLock<HashSet<String>>,
    versions: OnceMap<Option<VersionList>>,
}

impl DenoProvider {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            v_prefixed: RwLock::new(HashSet::new()),
            versions: OnceMap::new(),
        }
    }

    fn mark_v_prefixed(&self, name: &str) {
        if let Ok(mut set) = self.v_prefixed.write() {
            set.insert(name.to_string());
        }
    }

    fn is_v_prefixed(&self, name: &str) -> bool {
        self.v_prefixed
            .read()
            .map_or(false, |set| set.contains(name))
    }

    async fn version_list(&self, name: &str) -> Result<Option<VersionList>> {
        let list_url = format!("{VERSIONS_CDN}{name}/meta/versions.json");
        let fetcher = Arc::clone(&self.fetcher);
        self.versions
            .get_or_try_init(name, || async move {
                let url = Url::parse(&list_url).map_err(|e| Error::invalid_url(&list_url, e))?;
                let response = fetcher.fetch(&url).await?;
                if response.status == 404 {
                    return Ok(None);
                }
                if !response.is_ok() {
                    return Err(Error::FetchStatus {
                        url: list_url,
                        status: response.status,
                        body: response.text().into_owned(),
                    });
                }
                Ok(Some(serde_json::from_slice(&response.body)?))
            })
            .await
    }

    async fn resolve(&self, target: &PackageTarget) -> Result<Option<ExactPackage>> {
        let Some(list) = self.version_list(&target.name).await? else {
            return Ok(None);
        };

        let mut best: Option<semver::Version> = None;
        for tag in list.versions.iter().chain(list.latest.iter()) {
            let bare = match tag.strip_prefix('v') {
                Some(bare) => {
                    self.mark_v_prefixed(&target.name);
                    bare
                }
                None => tag.as_str(),
            };
            let Ok(version) = semver::Version::parse(bare) else {
                continue;
            };
            if target.ranges.iter().any(|r| r.has(&version, target.unstable))
                && best.as_ref().map_or(true, |b| version > *b)
            {
                best = Some(version);
            }
        }

        Ok(best.map(|v| ExactPackage::new(target.registry.clone(), target.name.clone(), v.to_string())))
    }
}

impl Provider for DenoProvider {
    fn name(&self) -> &str {
        "deno"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        match pkg.registry.as_str() {
            "deno" => Ok(format!("{CDN}{}@{}/", pkg.name, pkg.version)),
            "denoland" => {
                let v = if self.is_v_prefixed(&pkg.name) { "v" } else { "" };
                Ok(format!("{CDN}x/{}@{v}{}/", pkg.name, pkg.version))
            }
            other => Err(Error::invalid_input(format!(
                "deno.land does not serve the {other} registry"
            ))),
        }
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let rest = url.strip_prefix(CDN)?;
        let (registry, rest) = match rest.strip_prefix("x/") {
            Some(rest) => ("denoland", rest),
            None => ("deno", rest),
        };
        let (name, version, subpath) = parse_name_version(rest)?;
        let version = match version.strip_prefix('v') {
            Some(bare) => {
                self.mark_v_prefixed(&name);
                bare.to_string()
            }
            None => version,
        };
        Some(UrlPackage {
            pkg: ExactPackage::new(registry, name, version),
            layer: DEFAULT_LAYER.to_string(),
            subpath,
        })
    }

    fn resolve_latest_target<'a>(
        &'a self,
        target: &'a PackageTarget,
        _layer: &'a str,
        _parent_url: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ExactPackage>>> {
        Box::pin(self.resolve(target))
    }

    fn get_package_config<'a>(&'a self, pkg_url: &'a str) -> BoxFuture<'a, Result<ConfigLookup>> {
        let found = pkg_url.starts_with(CDN);
        Box::pin(async move {
            if !found {
                return Ok(ConfigLookup::Defer);
            }
            Ok(ConfigLookup::Found(PackageConfig {
                exports: Some(json!({
                    ".": "./mod.ts",
                    "./*.ts": "./*.ts",
                    "./*.js": "./*.js",
                    "./*": "./*/mod.ts"
                })),
                ..PackageConfig::default()
            }))
        })
    }
}
