//! unpkg: `https://unpkg.com/react@16.14.0/`. npm only.

use super::{parse_name_version, JspmLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::{Error, Result};
use crate::package::{ExactPackage, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const CDN: &str = "https://unpkg.com/";

#[derive(Debug, Clone)]
pub struct UnpkgProvider {
    lookup: Arc<JspmLookup>,
}

impl UnpkgProvider {
    #[must_use]
    pub fn new(lookup: Arc<JspmLookup>) -> Self {
        Self { lookup }
    }
}

impl Provider for UnpkgProvider {
    fn name(&self) -> &str {
        "unpkg"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        if pkg.registry != "npm" {
            return Err(Error::invalid_input(format!(
                "unpkg does not serve the {} registry",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    #[test]
    fn test_npm_only() {
        let p = UnpkgProvider::new(Arc::new(JspmLookup::new(Arc::new(MemoryFetcher::new()))));
        assert_eq!(
            p.pkg_to_url(&ExactPackage::new("npm", "lit", "2.6.1"), "default")
                .unwrap(),
            "https://unpkg.com/lit@2.6.1/"
        );
        assert!(p
            .pkg_to_url(&ExactPackage::new("github", "user/repo", "1.0.0"), "default")
            .is_err());
        assert_eq!(
            p.parse_url_pkg("https://unpkg.com/lit@2.6.1/index.js")
                .unwrap()
                .pkg,
            ExactPackage::new("npm", "lit", "2.6.1")
        );
    }
}
