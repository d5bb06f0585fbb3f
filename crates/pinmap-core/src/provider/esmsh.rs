//! esm.sh: `https://esm.sh/*react@16.14.0/`.
//!
//! The `*` prefix asks esm.sh to leave dependencies external so the import
//! map can resolve them.

use super::{parse_name_version, JspmLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::{Error, Result};
use crate::package::{ExactPackage, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const CDN: &str = "https://esm.sh/";

#[derive(Debug, Clone)]
pub struct EsmShProvider {
    lookup: Arc<JspmLookup>,
}

impl EsmShProvider {
    #[must_use]
    pub fn new(lookup: Arc<JspmLookup>) -> Self {
        Self { lookup }
    }
}

/// Strip a `v123/` build prefix.
fn strip_build_prefix(rest: &str) -> &str {
    if let Some((head, tail)) = rest.split_once('/') {
        if head.len() > 1
            && head.starts_with('v')
            && head[1..].chars().all(|c| c.is_ascii_digit())
        {
            return tail;
        }
    }
    rest
}

impl Provider for EsmShProvider {
    fn name(&self) -> &str {
        "esm.sh"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        if pkg.registry != "npm" {
            return Err(Error::invalid_input(format!(
                "esm.sh does not serve the {} registry",
                pkg.registry
            )));
        }
        Ok(format!("{CDN}*{}@{}/", pkg.name, pkg.version))
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let rest = strip_build_prefix(url.strip_prefix(CDN)?);
        let rest = rest.strip_prefix('*').unwrap_or(rest);
        let (name, version, subpath) = parse_name_version(rest)?;
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
    fn test_urls() {
        let p = EsmShProvider::new(Arc::new(JspmLookup::new(Arc::new(MemoryFetcher::new()))));
        let pkg = ExactPackage::new("npm", "react", "18.2.0");
        assert_eq!(
            p.pkg_to_url(&pkg, "default").unwrap(),
            "https://esm.sh/*react@18.2.0/"
        );
        assert_eq!(
            p.parse_url_pkg("https://esm.sh/*react@18.2.0/index.js").unwrap().pkg,
            pkg
        );
        assert_eq!(
            p.parse_url_pkg("https://esm.sh/v135/react@18.2.0/es2022/react.mjs")
                .unwrap()
                .subpath
                .as_deref(),
            Some("./es2022/react.mjs")
        );
    }
}
