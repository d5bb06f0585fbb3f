//! Packages from a local `node_modules` tree.
//!
//! Installed packages have no registry version, so the version field carries
//! the package base URL, base64url encoded. Resolution walks up from the
//! importer looking for `node_modules/<name>/package.json`.

use super::{Provider, UrlPackage, DEFAULT_LAYER};
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::package::{ExactPackage, PackageTarget};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::BoxFuture;
use pinmap_util::url::dir_url;
use std::sync::Arc;
use url::Url;

const SEGMENT: &str = "/node_modules/";

#[derive(Debug, Clone)]
pub struct NodeModulesProvider {
    fetcher: Arc<dyn Fetch>,
}

impl NodeModulesProvider {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    async fn find(&self, name: &str, parent_url: &str) -> Result<Option<ExactPackage>> {
        let parent = Url::parse(parent_url).map_err(|e| Error::invalid_url(parent_url, e))?;
        let mut dir = dir_url(&parent);
        let relative = format!("node_modules/{name}/");

        loop {
            if !dir.path().ends_with(SEGMENT) {
                let candidate = dir
                    .join(&relative)
                    .map_err(|e| Error::invalid_url(&relative, e))?;
                let manifest = candidate
                    .join("package.json")
                    .map_err(|e| Error::invalid_url("package.json", e))?;
                if self.fetcher.fetch(&manifest).await?.status == 200 {
                    let version = URL_SAFE_NO_PAD.encode(candidate.as_str());
                    return Ok(Some(ExactPackage::new("node_modules", name, version)));
                }
            }
            let up = dir.join("..").map_err(|e| Error::invalid_url("..", e))?;
            if up == dir {
                return Ok(None);
            }
            dir = up;
        }
    }
}

impl Provider for NodeModulesProvider {
    fn name(&self) -> &str {
        "node_modules"
    }

    fn roots(&self) -> Vec<String> {
        Vec::new()
    }

    fn pkg_to_url(&self, pkg: &ExactPackage, _layer: &str) -> Result<String> {
        URL_SAFE_NO_PAD
            .decode(&pkg.version)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|url| url.ends_with('/'))
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "Invalid node_modules package version for {}",
                    pkg.name
                ))
            })
    }

    fn parse_url_pkg(&self, url: &str) -> Option<UrlPackage> {
        let start = url.rfind(SEGMENT)? + SEGMENT.len();
        let after = &url[start..];
        let mut parts = after.split('/');
        let first = parts.next().filter(|s| !s.is_empty())?;
        let name_len = if first.starts_with('@') {
            let second = parts.next().filter(|s| !s.is_empty())?;
            first.len() + 1 + second.len()
        } else {
            first.len()
        };
        let name = &after[..name_len];
        let rest = &after[name_len..];
        let base = format!("{}/", &url[..start + name_len]);
        let subpath = (!rest.is_empty() && rest != "/").then(|| format!(".{rest}"));

        Some(UrlPackage {
            pkg: ExactPackage::new("node_modules", name, URL_SAFE_NO_PAD.encode(base)),
            layer: DEFAULT_LAYER.to_string(),
            subpath,
        })
    }

    fn resolve_latest_target<'a>(
        &'a self,
        target: &'a PackageTarget,
        _layer: &'a str,
        parent_url: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<ExactPackage>>> {
        Box::pin(async move {
            match parent_url {
                Some(parent) => self.find(&target.name, parent).await,
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;

    #[test]
    fn test_parse_scoped() {
        let p = NodeModulesProvider::new(Arc::new(MemoryFetcher::new()));
        let parsed = p
            .parse_url_pkg("file:///app/node_modules/a/node_modules/@lit/task/index.js")
            .unwrap();
        assert_eq!(parsed.pkg.name, "@lit/task");
        assert_eq!(parsed.subpath.as_deref(), Some("./index.js"));
        assert_eq!(
            p.pkg_to_url(&parsed.pkg, "default").unwrap(),
            "file:///app/node_modules/a/node_modules/@lit/task/"
        );
        assert!(p.parse_url_pkg("file:///app/src/index.js").is_none());
    }

    #[tokio::test]
    async fn test_walks_up_from_parent() {
        let fetcher = MemoryFetcher::new()
            .with_text("file:///app/node_modules/react/package.json", "{}");
        let p = NodeModulesProvider::new(Arc::new(fetcher));
        let target = PackageTarget::wildcard("npm", "react");

        let found = p
            .resolve_latest_target(&target, "default", Some("file:///app/src/deep/main.js"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            p.pkg_to_url(&found, "default").unwrap(),
            "file:///app/node_modules/react/"
        );

        let missing = PackageTarget::wildcard("npm", "vue");
        assert!(p
            .resolve_latest_target(&missing, "default", Some("file:///app/main.js"))
            .await
            .unwrap()
            .is_none());
    }
}
