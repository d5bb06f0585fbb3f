//! URL arithmetic shared by the import map and the resolver.
//!
//! Import maps store targets relative to a base URL and, optionally, a root
//! URL for `/`-prefixed paths. These helpers convert between the stored form
//! and absolute URLs.

use url::Url;

/// Whether the specifier parses as an absolute URL.
///
/// Single-letter schemes are rejected so Windows drive paths (`C:\x`) are not
/// mistaken for URLs.
#[must_use]
pub fn is_url(specifier: &str) -> bool {
    match specifier.find(':') {
        Some(i) if i > 1 => Url::parse(specifier).is_ok(),
        _ => false,
    }
}

/// Whether the specifier is relative or absolute-path (`./`, `../`, `/`).
#[must_use]
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// Whether the specifier is bare, i.e. neither relative nor a URL.
#[must_use]
pub fn is_plain(specifier: &str) -> bool {
    !is_relative(specifier) && !is_url(specifier)
}

/// Builtin schemes that are recorded in import maps like bare specifiers.
#[must_use]
pub fn is_mappable_scheme(specifier: &str) -> bool {
    specifier.starts_with("node:") || specifier.starts_with("deno:")
}

/// Append a trailing `/` if missing.
#[must_use]
pub fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// The directory containing `url` (the URL itself when it already ends in `/`).
#[must_use]
pub fn dir_url(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    url.join("./").unwrap_or_else(|_| url.clone())
}

/// `scheme://host[:port]/` for `url`. For `file:` URLs this is `file:///`.
#[must_use]
pub fn origin_root(url: &Url) -> String {
    let href = url.as_str();
    let path_start = href.len() - url[url::Position::BeforePath..].len();
    format!("{}/", &href[..path_start])
}

/// Resolve a stored map target against the map base and root URLs.
///
/// `/`-prefixed targets resolve against `root` when one is configured.
#[must_use]
pub fn resolve_url(target: &str, base: &Url, root: Option<&Url>) -> Option<Url> {
    if let Some(root) = root {
        if target.starts_with('/') && !target.starts_with("//") {
            return root.join(&target[1..]).ok();
        }
    }
    base.join(target).ok()
}

/// Express `url` relative to `base`, falling back to the absolute href for
/// cross-origin targets.
///
/// Same-directory descendants become `./x`, siblings become `../x`. When a
/// `root` is given, URLs under it are written as `/x`.
#[must_use]
pub fn relative_url(url: &Url, base: &Url, root: Option<&Url>) -> String {
    let base = dir_url(base);
    let href = url.as_str();

    if href.starts_with(base.as_str()) {
        return format!("./{}", &href[base.as_str().len()..]);
    }

    if let Some(root) = root {
        let root = dir_url(root);
        if href.starts_with(root.as_str()) {
            return format!("/{}", &href[root.as_str().len()..]);
        }
    }

    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port() != base.port()
        || url.username() != base.username()
        || url.password() != base.password()
    {
        return href.to_string();
    }

    let base_path = base.path().as_bytes();
    let url_path = url.path().as_bytes();
    let mut shared = 0;
    for i in 0..base_path.len().min(url_path.len()) {
        if base_path[i] != url_path[i] {
            break;
        }
        if url_path[i] == b'/' {
            shared = i;
        }
    }

    let ups = base.path()[shared + 1..].matches('/').count();
    let mut out = "../".repeat(ups);
    out.push_str(&url.path()[shared + 1..]);
    if let Some(q) = url.query() {
        out.push('?');
        out.push_str(q);
    }
    if let Some(f) = url.fragment() {
        out.push('#');
        out.push_str(f);
    }
    out
}

/// Re-express a stored target from one base to another.
///
/// Targets that cannot be resolved are returned unchanged.
#[must_use]
pub fn rebase_url(target: &str, from: &Url, to: &Url, root: Option<&Url>) -> String {
    match resolve_url(target, from, root) {
        Some(abs) => relative_url(&abs, to, root),
        None => target.to_string(),
    }
}
