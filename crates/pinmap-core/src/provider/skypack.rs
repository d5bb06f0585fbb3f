//! Skypack: `https://cdn.skypack.dev/react@16.14.0/`.

use super::{parse_name_version, JspmLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::{Error, Result};
use crate::package::{ExactPackage, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const CDN: &str = "https://cdn.skypack.dev/";

#[derive(Debug, Clone)]
pub struct SkypackProvider {
    lookup: Arc<JspmLookup>,
}

impl SkypackProvider {
    #[must_use]
    pub fn new(lookup: Arc<JspmLookup>) -> Self {
        Self { lookup }
    }
}

impl Provider for SkypackProvider {
    fn name(&self) -> &str {
        "skypack"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        if pkg.registry != "npm" {
            return Err(Error::invalid_input(format!(
                "Skypack does not serve the {} registry",
                pkg.registry
            )));
        }
        Ok(format!("{CDN}{}@{}/", pkg.name, pkg.version))
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let (name, version, subpath) = parse_name_version(url.strip_prefix(CDN)?)?;
        Some(UrlPackage {
            pkg: ExactPackage::new("npm", name, version),
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
        Box::pin(self.lookup.resolve(target))
    }
}
