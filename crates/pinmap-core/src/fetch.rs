//! Fetching of manifests, modules and version lookups.
//!
//! Every network and filesystem read goes through the [`Fetch`] trait so the
//! generator can run against a CDN, a local `node_modules` tree, or an
//! in-memory fixture set.

use crate::error::{Error, Result};
use crate::version::USER_AGENT;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::Client;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// A fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    /// A 200 response with an explicit content type.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            status: 200,
            content_type: content_type.map(String::from),
            body: body.into(),
        }
    }

    /// A 200 response with the content type implied by the URL extension.
    #[must_use]
    pub fn for_url(url: &str, body: impl Into<Bytes>) -> Self {
        Self::ok(body, content_type_for(url))
    }

    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::status(404)
    }

    /// 200 and 304 both carry usable content.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.status, 200 | 304)
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.split(';').next().is_some_and(|m| m.trim().ends_with("json")))
    }

    /// The body as text, lossily decoded.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Content type implied by a URL's extension.
#[must_use]
pub fn content_type_for(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    if ext.contains('/') {
        return None;
    }
    match ext {
        "json" => Some("application/json"),
        "js" | "mjs" | "cjs" => Some("application/javascript"),
        "ts" | "tsx" | "mts" | "cts" | "jsx" => Some("application/typescript"),
        "wasm" => Some("application/wasm"),
        "css" => Some("text/css"),
        _ => None,
    }
}

/// Source of bytes for a URL.
///
/// Implementations report absence through the response status; errors are
/// reserved for transport failures.
pub trait Fetch: Send + Sync + fmt::Debug {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResponse>>;
}

/// Fetches `http(s):` over the network, `file:` from disk, and `data:`
/// inline.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Create a fetcher. No overall request timeout is imposed.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Create a fetcher that aborts requests after `timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http })
    }

    async fn fetch_http(&self, url: &Url) -> Result<FetchResponse> {
        let response = self.http.get(url.as_str()).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await?;
        tracing::trace!(url = %url, status, bytes = body.len(), "fetched");
        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

async fn fetch_file(url: &Url) -> Result<FetchResponse> {
    let Ok(path) = url.to_file_path() else {
        return Err(Error::invalid_input(format!("Invalid file URL {url}")));
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(FetchResponse::for_url(url.as_str(), bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse::not_found()),
        // Directories and paths through a regular file fail with OS-specific kinds.
        Err(_) if path.is_dir() || !path.exists() => Ok(FetchResponse::not_found()),
        Err(e) => Err(e.into()),
    }
}

/// Decode `data:[<mime>][;base64],<payload>`.
fn fetch_data(url: &Url) -> Result<FetchResponse> {
    let rest = &url.as_str()["data:".len()..];
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(Error::invalid_input(format!("Invalid data URL {url}")));
    };
    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let body = if is_base64 {
        STANDARD
            .decode(payload)
            .map_err(|e| Error::invalid_input(format!("Invalid base64 in data URL: {e}")))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    Ok(FetchResponse::ok(body, Some(mime)))
}

impl Fetch for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move {
            match url.scheme() {
                "http" | "https" => self.fetch_http(url).await,
                "file" => fetch_file(url).await,
                "data" => fetch_data(url),
                other => Err(Error::invalid_input(format!(
                    "Unsupported protocol {other}: fetching {url}"
                ))),
            }
        })
    }
}

/// In-memory fixtures keyed by URL. Unknown URLs answer 404.
///
/// A URL may be given a sequence of responses; each request takes the next
/// one and the last repeats.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    responses: HashMap<String, Vec<FetchResponse>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`, typed by the URL extension.
    #[must_use]
    pub fn with_text(self, url: &str, body: &str) -> Self {
        let response = FetchResponse::for_url(url, body.to_string());
        self.with_response(url, response)
    }

    /// Serve a JSON document at `url`.
    #[must_use]
    pub fn with_json(self, url: &str, value: &serde_json::Value) -> Self {
        let response = FetchResponse::ok(value.to_string(), Some("application/json"));
        self.with_response(url, response)
    }

    #[must_use]
    pub fn with_response(mut self, url: &str, response: FetchResponse) -> Self {
        self.responses.insert(url.to_string(), vec![response]);
        self
    }

    #[must_use]
    pub fn with_sequence(mut self, url: &str, responses: Vec<FetchResponse>) -> Self {
        self.responses.insert(url.to_string(), responses);
        self
    }

    /// How many times `url` was requested.
    pub async fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.as_str() == url)
            .count()
    }

    /// Every URL requested so far, in order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

impl Fetch for MemoryFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async move {
            if url.scheme() == "data" {
                return fetch_data(url);
            }

            let previous = {
                let mut requests = self.requests.lock().await;
                let previous = requests.iter().filter(|r| r.as_str() == url.as_str()).count();
                requests.push(url.to_string());
                previous
            };

            let response = self
                .responses
                .get(url.as_str())
                .and_then(|seq| seq.get(previous).or_else(|| seq.last()))
                .cloned()
                .unwrap_or_else(FetchResponse::not_found);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(
            content_type_for("https://x/pkg/package.json"),
            Some("application/json")
        );
        assert_eq!(
            content_type_for("https://x/a.mjs?v=1"),
            Some("application/javascript")
        );
        assert_eq!(content_type_for("https://x/npm:pkg@1.0.0/lib"), None);
    }

    #[test]
    fn test_is_json_with_charset() {
        let resp = FetchResponse::ok("{}", Some("application/json; charset=utf-8"));
        assert!(resp.is_json());
        assert!(!FetchResponse::ok("x", Some("text/html")).is_json());
    }

    #[tokio::test]
    async fn test_memory_fetcher_sequence() {
        let fetcher = MemoryFetcher::new().with_sequence(
            "https://x/a.js",
            vec![FetchResponse::status(500), FetchResponse::for_url("https://x/a.js", "ok")],
        );
        let url = u("https://x/a.js");

        assert_eq!(fetcher.fetch(&url).await.unwrap().status, 500);
        assert_eq!(fetcher.fetch(&url).await.unwrap().text(), "ok");
        assert_eq!(fetcher.fetch(&url).await.unwrap().text(), "ok");
        assert_eq!(fetcher.request_count("https://x/a.js").await, 3);
        assert_eq!(fetcher.fetch(&u("https://x/b.js")).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_data_url() {
        let fetcher = MemoryFetcher::new();
        let plain = fetcher
            .fetch(&u("data:text/javascript,import%20'a'"))
            .await
            .unwrap();
        assert_eq!(plain.text(), "import 'a'");

        let b64 = fetcher
            .fetch(&u("data:application/json;base64,e30="))
            .await
            .unwrap();
        assert_eq!(b64.text(), "{}");
        assert!(b64.is_json());
    }

    #[tokio::test]
    async fn test_file_fetch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let fetcher = HttpFetcher::new().unwrap();

        let base = Url::from_directory_path(dir.path()).unwrap();
        let found = fetcher.fetch(&base.join("package.json").unwrap()).await.unwrap();
        assert_eq!(found.status, 200);
        assert!(found.is_json());

        let missing = fetcher.fetch(&base.join("index.js").unwrap()).await.unwrap();
        assert_eq!(missing.status, 404);
    }
}
