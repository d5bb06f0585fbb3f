//! Version lookups against the jspm CDN.
//!
//! `GET https://ga.jspm.io/npm:react@16` answers with the latest `16.x`
//! version as plain text. Every registry-backed CDN provider resolves its
//! ranges through this endpoint and shares one cache per session.

use crate::cache::OnceMap;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::package::{ExactPackage, PackageTarget};
use crate::range::{sort_descending, RangeKind, SemverRange};
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// The lookup CDN root.
pub const LOOKUP_CDN: &str = "https://ga.jspm.io/";

/// Range lookups with one cache entry per `(package, token)`.
#[derive(Debug)]
pub struct JspmLookup {
    fetcher: Arc<dyn Fetch>,
    cdn: String,
    cache: OnceMap<Option<String>>,
}

impl JspmLookup {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self::with_cdn(fetcher, LOOKUP_CDN)
    }

    #[must_use]
    pub fn with_cdn(fetcher: Arc<dyn Fetch>, cdn: impl Into<String>) -> Self {
        Self {
            fetcher,
            cdn: cdn.into(),
            cache: OnceMap::new(),
        }
    }

    /// The highest version admitted by any of the target's ranges.
    ///
    /// Ranges are tried from highest to lowest; the first that resolves wins.
    ///
    /// # Errors
    /// Returns an error when the lookup endpoint fails.
    pub async fn resolve(&self, target: &PackageTarget) -> Result<Option<ExactPackage>> {
        let mut ranges = target.ranges.clone();
        sort_descending(&mut ranges);
        for range in &ranges {
            if let Some(version) = self.resolve_range(target, range).await? {
                return Ok(Some(ExactPackage::new(
                    target.registry.clone(),
                    target.name.clone(),
                    version,
                )));
            }
        }
        Ok(None)
    }

    async fn resolve_range(
        &self,
        target: &PackageTarget,
        range: &SemverRange,
    ) -> Result<Option<String>> {
        let unstable = target.unstable;
        let in_range = |version: &Option<String>| {
            version
                .as_deref()
                .is_some_and(|v| range.has_str(v, unstable))
        };

        match range.kind() {
            RangeKind::Exact => Ok(range.floor().map(ToString::to_string)),
            RangeKind::Wildcard => self.lookup(target, "", unstable).await,
            RangeKind::Tag(tag) if tag == "latest" => self.lookup(target, "", unstable).await,
            RangeKind::Tag(tag) => self.lookup(target, tag, unstable).await,
            RangeKind::Major => {
                let Some(major) = range.major_token() else {
                    return Ok(None);
                };
                let version = self.lookup(target, &major, unstable).await?;
                if in_range(&version) {
                    return Ok(version);
                }
                // The latest of the major is below the range floor.
                debug!(package = %target.name, range = %range, "major lookup below range, trying minor");
                self.minor(target, range).await
            }
            RangeKind::Stable => self.minor(target, range).await,
            RangeKind::Complex => {
                let latest = self.lookup(target, "", unstable).await?;
                if in_range(&latest) {
                    return Ok(latest);
                }
                let Some(major) = range.major_token() else {
                    return Ok(None);
                };
                let version = self.lookup(target, &major, unstable).await?;
                Ok(version.filter(|v| range.has_str(v, unstable)))
            }
        }
    }

    async fn minor(&self, target: &PackageTarget, range: &SemverRange) -> Result<Option<String>> {
        let Some(minor) = range.minor_token() else {
            return Ok(None);
        };
        let version = self.lookup(target, &minor, target.unstable).await?;
        Ok(version.filter(|v| range.has_str(v, target.unstable)))
    }

    async fn lookup(
        &self,
        target: &PackageTarget,
        token: &str,
        unstable: bool,
    ) -> Result<Option<String>> {
        let at = if !token.is_empty() || unstable { "@" } else { "" };
        let lookup_url = format!(
            "{}{}:{}{at}{token}",
            self.cdn, target.registry, target.name
        );
        let fetcher = Arc::clone(&self.fetcher);
        let key = lookup_url.clone();

        self.cache
            .get_or_try_init(&key, || async move {
                let url = Url::parse(&lookup_url).map_err(|e| Error::invalid_url(&lookup_url, e))?;
                let response = fetcher.fetch(&url).await?;
                trace!(url = %url, status = response.status, "version lookup");
                if response.is_ok() {
                    let version = response.text().trim().to_string();
                    Ok((!version.is_empty()).then_some(version))
                } else if response.status == 404 {
                    Ok(None)
                } else {
                    Err(Error::FetchStatus {
                        url: lookup_url,
                        status: response.status,
                        body: response.text().into_owned(),
                    })
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchResponse, MemoryFetcher};
    use crate::range::parse_ranges;

    fn target(name: &str, range: &str) -> PackageTarget {
        PackageTarget {
            registry: "npm".into(),
            name: name.into(),
            ranges: parse_ranges(range).unwrap(),
            unstable: false,
        }
    }

    fn lookup(fetcher: MemoryFetcher) -> (Arc<MemoryFetcher>, JspmLookup) {
        let fetcher = Arc::new(fetcher);
        let lookup = JspmLookup::new(Arc::clone(&fetcher) as Arc<dyn Fetch>);
        (fetcher, lookup)
    }

    #[tokio::test]
    async fn test_exact_needs_no_request() {
        let (fetcher, lookup) = lookup(MemoryFetcher::new());
        let pkg = lookup.resolve(&target("react", "16.14.0")).await.unwrap();
        assert_eq!(pkg, Some(ExactPackage::new("npm", "react", "16.14.0")));
        assert!(fetcher.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_major_lookup_cached() {
        let (fetcher, lookup) = lookup(
            MemoryFetcher::new().with_text("https://ga.jspm.io/npm:react@16", "16.14.0\n"),
        );
        let first = lookup.resolve(&target("react", "^16.8.0")).await.unwrap();
        let second = lookup.resolve(&target("react", "16")).await.unwrap();
        assert_eq!(first.unwrap().version, "16.14.0");
        assert_eq!(second.unwrap().version, "16.14.0");
        assert_eq!(fetcher.request_count("https://ga.jspm.io/npm:react@16").await, 1);
    }

    #[tokio::test]
    async fn test_major_downgrade_falls_back_to_minor() {
        let (_, lookup) = lookup(
            MemoryFetcher::new()
                .with_text("https://ga.jspm.io/npm:pkg@2", "2.3.0")
                .with_text("https://ga.jspm.io/npm:pkg@2.4", "2.4.0-rc.1"),
        );
        // The latest 2.x is below ^2.4.0 and the 2.4 line has no stable release.
        assert_eq!(lookup.resolve(&target("pkg", "^2.4.0")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wildcard_and_unstable() {
        let (fetcher, lookup) = lookup(
            MemoryFetcher::new()
                .with_text("https://ga.jspm.io/npm:lit", "2.6.1")
                .with_text("https://ga.jspm.io/npm:lit@", "3.0.0-pre.1"),
        );
        let stable = lookup.resolve(&target("lit", "*")).await.unwrap().unwrap();
        assert_eq!(stable.version, "2.6.1");

        let mut unstable = target("lit", "*");
        unstable.unstable = true;
        let pre = lookup.resolve(&unstable).await.unwrap().unwrap();
        assert_eq!(pre.version, "3.0.0-pre.1");
        assert_eq!(fetcher.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_or_ranges_highest_first() {
        let (_, lookup) = lookup(
            MemoryFetcher::new()
                .with_text("https://ga.jspm.io/npm:react@17", "17.0.2")
                .with_text("https://ga.jspm.io/npm:react@16", "16.14.0"),
        );
        let pkg = lookup
            .resolve(&target("react", "^16.8.0 || ^17.0.0"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pkg.version, "17.0.2");
    }

    #[tokio::test]
    async fn test_not_found_and_errors() {
        let (_, lookup) = lookup(MemoryFetcher::new().with_response(
            "https://ga.jspm.io/npm:broken@1",
            FetchResponse::status(503),
        ));
        assert_eq!(lookup.resolve(&target("missing", "1")).await.unwrap(), None);

        let err = lookup.resolve(&target("broken", "1")).await.unwrap_err();
        assert!(matches!(err, Error::FetchStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_tag_lookup() {
        let (_, lookup) = lookup(
            MemoryFetcher::new().with_text("https://ga.jspm.io/npm:react@next", "18.3.0-next.1"),
        );
        let pkg = lookup.resolve(&target("react", "next")).await.unwrap().unwrap();
        assert_eq!(pkg.version, "18.3.0-next.1");
    }
}
