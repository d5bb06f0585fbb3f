//! Node.js builtins as `node:` URLs. Registry packages go to jspm.

use super::{ConfigLookup, Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::Result;
use crate::package::{ExactPackage, PackageConfig, PackageTarget};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const SCHEME: &str = "node:";

#[derive(Debug, Clone)]
pub struct NodeProvider {
    fallback: Arc<dyn Provider>,
}

impl NodeProvider {
    #[must_use]
    pub fn new(fallback: Arc<dyn Provider>) -> Self {
        Self { fallback }
    }
}

impl Provider for NodeProvider {
    fn name(&self) -> &str {
        "node"
    }

    fn roots(&self) -> Vec<String> {
        vec![SCHEME.to_string()]
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, layer: &str) -> Result<String> {
        if pkg.registry == "node" {
            Ok(format!("{SCHEME}{}/", pkg.name))
        } else {
            self.fallback.pkg_to_url(pkg, layer)
        }
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let Some(name) = url.strip_prefix(SCHEME) else {
            return self.fallback.parse_url_pkg(url);
        };
        let name = name.trim_end_matches('/');
        if name.is_empty() {
            return None;
        }
        Some(UrlPackage {
            pkg: ExactPackage::new("node", name, ""),
            layer: DEFAULT_LAYER.to_string(),
            subpath: None,
        })
    }

    fn resolve_latest_target<'a>(
        &'a self,
        target: &'a PackageTarget,
        layer: &'a str,
        parent_url: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ExactPackage>>> {
        if target.registry == "node" {
            let pkg = ExactPackage::new("node", target.name.clone(), "");
            return Box::pin(async move { Ok(Some(pkg)) });
        }
        self.fallback.resolve_latest_target(target, layer, parent_url)
    }

    fn get_package_config<'a>(&'a self, pkg_url: &'a str) -> BoxFuture<'a, Result<ConfigLookup>> {
        if pkg_url.starts_with(SCHEME) {
            return Box::pin(async { Ok(ConfigLookup::Found(PackageConfig::default())) });
        }
        self.fallback.get_package_config(pkg_url)
    }
}
