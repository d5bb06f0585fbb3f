//! The jspm CDN: `https://ga.jspm.io/npm:react@16.14.0/`.

use super::{parse_name_version, JspmLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::{Error, Result};
use crate::package::{ExactPackage, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const CDN: &str = "https://ga.jspm.io/";
pub const SYSTEM_CDN: &str = "https://ga.system.jspm.io/";

#[derive(Debug, Clone)]
pub struct JspmProvider {
    lookup: Arc<JspmLookup>,
}

impl JspmProvider {
    #[must_use]
    pub fn new(lookup: Arc<JspmLookup>) -> Self {
        Self { lookup }
    }
}

fn cdn_for_layer(layer: &str) -> Option<&'static str> {
    match layer {
        DEFAULT_LAYER => Some(CDN),
        "system" => Some(SYSTEM_CDN),
        _ => None,
    }
}

impl Provider for JspmProvider {
    fn name(&self) -> &str {
        "jspm"
    }

    fn roots(&self) -> Vec<String> {
        vec![CDN.to_string(), SYSTEM_CDN.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, layer: &str) -> Result<String> {
        let cdn = cdn_for_layer(layer)
            .ok_or_else(|| Error::invalid_input(format!("Unknown jspm layer \"{layer}\"")))?;
        Ok(format!("{cdn}{}:{}@{}/", pkg.registry, pkg.name, pkg.version))
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let (layer, rest) = if let Some(rest) = url.strip_prefix(CDN) {
            (DEFAULT_LAYER, rest)
        } else {
            ("system", url.strip_prefix(SYSTEM_CDN)?)
        };
        let (registry, rest) = match rest.split_once(':') {
            Some((registry, rest))
                if !registry.is_empty() && registry.chars().all(|c| c.is_ascii_lowercase()) =>
            {
                (registry, rest)
            }
            _ => ("npm", rest),
        };
        let (name, version, subpath) = parse_name_version(rest)?;
        Some(UrlPackage {
            pkg: ExactPackage::new(registry, name, version),
            layer: layer.to_string(),
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

    fn provider() -> JspmProvider {
        JspmProvider::new(Arc::new(JspmLookup::new(Arc::new(MemoryFetcher::new()))))
    }

    #[test]
    fn test_pkg_to_url_layers() {
        let pkg = ExactPackage::new("npm", "react", "16.14.0");
        let p = provider();
        assert_eq!(
            p.pkg_to_url(&pkg, "default").unwrap(),
            "https://ga.jspm.io/npm:react@16.14.0/"
        );
        assert_eq!(
            p.pkg_to_url(&pkg, "system").unwrap(),
            "https://ga.system.jspm.io/npm:react@16.14.0/"
        );
        assert!(p.pkg_to_url(&pkg, "cjs").is_err());
    }

    #[test]
    fn test_parse_url_pkg() {
        let p = provider();
        let parsed = p
            .parse_url_pkg("https://ga.jspm.io/npm:@jspm/core@2.0.1/nodelibs/browser/fs.js")
            .unwrap();
        assert_eq!(parsed.pkg, ExactPackage::new("npm", "@jspm/core", "2.0.1"));
        assert_eq!(parsed.layer, "default");
        assert_eq!(parsed.subpath.as_deref(), Some("./nodelibs/browser/fs.js"));

        let system = p
            .parse_url_pkg("https://ga.system.jspm.io/npm:react@16.14.0/")
            .unwrap();
        assert_eq!(system.layer, "system");
        assert_eq!(system.subpath, None);

        assert!(p.parse_url_pkg("https://unpkg.com/react@16.14.0/").is_none());
        assert!(p.parse_url_pkg("https://ga.jspm.io/npm:react").is_none());
    }
}
