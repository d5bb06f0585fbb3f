//! jsDelivr: `https://cdn.jsdelivr.net/npm/react@16.14.0/`.

use super::{parse_name_version, JspmLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::Result;
use crate::package::{ExactPackage, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const CDN: &str = "https://cdn.jsdelivr.net/";

#[derive(Debug, Clone)]
pub struct JsdelivrProvider {
    lookup: Arc<JspmLookup>,
}

impl JsdelivrProvider {
    #[must_use]
    pub fn new(lookup: Arc<JspmLookup>) -> Self {
        Self { lookup }
    }
}

impl Provider for JsdelivrProvider {
    fn name(&self) -> &str {
        "jsdelivr"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        Ok(format!("{CDN}{}/{}@{}/", pkg.registry, pkg.name, pkg.version))
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let (registry, rest) = url.strip_prefix(CDN)?.split_once('/')?;
        let (name, version, subpath) = parse_name_version(rest)?;
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
        Box::pin(self.lookup.resolve(target))
    }
}
