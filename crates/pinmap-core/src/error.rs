//! Error types for resolution, installation and tracing.

use thiserror::Error;

/// Stable error codes, one per [`Error`] variant family.
pub mod codes {
    pub const MODULE_NOT_FOUND: &str = "MODULE_NOT_FOUND";
    pub const VERSION_NOT_FOUND: &str = "VERSION_NOT_FOUND";
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const UNSUPPORTED_ALIAS: &str = "UNSUPPORTED_ALIAS";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const UNIMPLEMENTED: &str = "UNIMPLEMENTED";
    pub const INVALID_URL: &str = "INVALID_URL";
    pub const IO: &str = "IO";
    pub const JSON: &str = "JSON";
}

/// Errors surfaced by the generator.
#[derive(Error, Debug)]
pub enum Error {
    /// An export subpath, legacy main, or module file does not exist.
    #[error("{message}")]
    ModuleNotFound {
        message: String,
        pkg_url: Option<String>,
        pkg_name: Option<String>,
        parent_url: Option<String>,
    },

    /// No registry version satisfies the requested range.
    #[error(
        "Unable to resolve package {registry}:{name} in range \"{range}\"{}",
        imported_from(.parent_url.as_deref())
    )]
    VersionNotFound {
        registry: String,
        name: String,
        range: String,
        parent_url: Option<String>,
    },

    /// A fetch returned a status outside the success and absence sets.
    #[error("Invalid status code {status} fetching {url}{}", body_suffix(.body))]
    FetchStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Module source could not be lexed, even after a refetch.
    #[error("Error parsing {url}:{line}:{column}\n{snippet}")]
    Parse {
        url: String,
        line: usize,
        column: usize,
        snippet: String,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Package aliases not yet supported: {0}")]
    UnsupportedAlias(String),

    /// A broken internal invariant. Never a user mistake.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModuleNotFound { .. } => codes::MODULE_NOT_FOUND,
            Self::VersionNotFound { .. } => codes::VERSION_NOT_FOUND,
            Self::FetchStatus { .. } | Self::Http(_) => codes::FETCH_FAILED,
            Self::Parse { .. } => codes::PARSE_ERROR,
            Self::InvalidInput(_) => codes::INVALID_INPUT,
            Self::UnsupportedAlias(_) => codes::UNSUPPORTED_ALIAS,
            Self::Internal(_) => codes::INTERNAL_ERROR,
            Self::Unimplemented(_) => codes::UNIMPLEMENTED,
            Self::InvalidUrl { .. } => codes::INVALID_URL,
            Self::Io(_) => codes::IO,
            Self::Json(_) => codes::JSON,
        }
    }

    /// Whether this error signals a programming bug rather than bad input.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Create a module-not-found error without package context.
    pub fn module_not_found(message: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            message: message.into(),
            pkg_url: None,
            pkg_name: None,
            parent_url: None,
        }
    }

    /// The `No '<subpath>' exports subpath defined` error.
    #[must_use]
    pub fn export_not_defined(
        subpath: &str,
        pkg_url: &str,
        specifier: &str,
        parent_url: Option<&str>,
    ) -> Self {
        Self::ModuleNotFound {
            message: format!(
                "No '{subpath}' exports subpath defined in {pkg_url} resolving {specifier}{}",
                imported_from(parent_url)
            ),
            pkg_url: Some(pkg_url.to_string()),
            pkg_name: specifier_pkg_name(specifier),
            parent_url: parent_url.map(String::from),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_url(url: &str, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            source,
        }
    }
}

/// ` imported from <parent>` suffix, empty without a parent.
#[must_use]
pub fn imported_from(parent_url: Option<&str>) -> String {
    match parent_url {
        Some(parent) => format!(" imported from {parent}"),
        None => String::new(),
    }
}

fn body_suffix(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        let mut end = body.len().min(200);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(": {}", &body[..end])
    }
}

fn specifier_pkg_name(specifier: &str) -> Option<String> {
    if !pinmap_util::url::is_plain(specifier) {
        return None;
    }
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next()?;
    if first.starts_with('@') {
        Some(format!("{first}/{}", parts.next()?))
    } else {
        Some(first.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_not_defined_context() {
        let err = Error::export_not_defined(
            "./c",
            "https://ga.jspm.io/npm:pkg@1.0.0/",
            "pkg/c",
            Some("file:///app/main.js"),
        );
        assert_eq!(err.code(), codes::MODULE_NOT_FOUND);
        assert_eq!(
            err.to_string(),
            "No './c' exports subpath defined in https://ga.jspm.io/npm:pkg@1.0.0/ resolving pkg/c imported from file:///app/main.js"
        );
        match err {
            Error::ModuleNotFound {
                pkg_name,
                parent_url,
                ..
            } => {
                assert_eq!(pkg_name.as_deref(), Some("pkg"));
                assert_eq!(parent_url.as_deref(), Some("file:///app/main.js"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_version_not_found_message() {
        let err = Error::VersionNotFound {
            registry: "npm".into(),
            name: "react".into(),
            range: "^99".into(),
            parent_url: None,
        };
        assert_eq!(
            err.to_string(),
            "Unable to resolve package npm:react in range \"^99\""
        );
        assert_eq!(err.code(), codes::VERSION_NOT_FOUND);
    }

    #[test]
    fn test_fetch_status_carries_body() {
        let err = Error::FetchStatus {
            url: "https://ga.jspm.io/npm:x@1".into(),
            status: 500,
            body: "upstream down\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status code 500 fetching https://ga.jspm.io/npm:x@1: upstream down"
        );
    }

    #[test]
    fn test_internal_class() {
        assert!(Error::internal("scope without slash").is_internal());
        assert!(!Error::invalid_input("bad").is_internal());
    }

    #[test]
    fn test_scoped_pkg_name() {
        assert_eq!(
            specifier_pkg_name("@scope/pkg/sub").as_deref(),
            Some("@scope/pkg")
        );
        assert_eq!(specifier_pkg_name("./x"), None);
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::MODULE_NOT_FOUND,
            codes::VERSION_NOT_FOUND,
            codes::FETCH_FAILED,
            codes::PARSE_ERROR,
            codes::INVALID_INPUT,
            codes::UNSUPPORTED_ALIAS,
            codes::INTERNAL_ERROR,
            codes::UNIMPLEMENTED,
            codes::INVALID_URL,
            codes::IO,
            codes::JSON,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
