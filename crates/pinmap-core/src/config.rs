use crate::install::InstallMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Generator configuration.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// URL of the import map file. Relative map entries are written against it.
    pub map_url: Url,

    /// Base for `/`-prefixed map entries.
    pub root_url: Option<Url>,

    /// Package scope of the top-level installs. Defaults to the map directory.
    pub base_url: Option<Url>,

    /// Provider used for packages without a `providers` entry, as
    /// `name` or `name.layer`.
    pub default_provider: String,

    /// Registry assumed for unqualified package names.
    pub default_registry: String,

    /// Per-package or per-registry (`npm:`) provider overrides.
    pub providers: BTreeMap<String, String>,

    /// Forced targets per package name, e.g. `{"react": "16.14.0"}`.
    pub resolutions: BTreeMap<String, String>,

    /// Export conditions, in priority order.
    pub env: Vec<String>,

    /// Specifiers that are never traced.
    pub ignore: Vec<String>,

    /// Trace static imports only.
    pub static_trace: bool,

    /// Record `sha384` integrity for every traced module.
    pub integrity: bool,

    /// Record each module's static dependencies.
    pub depcache: bool,

    /// Trace System.register modules.
    pub system: bool,

    /// Never resolve new versions when an existing lock satisfies the target.
    pub freeze: bool,

    /// Resolve top-level installs to the latest release.
    pub latest: bool,

    /// An existing import map to extract locks from.
    pub input_map: Option<serde_json::Value>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let map_url = std::env::current_dir()
            .ok()
            .and_then(|cwd| Url::from_directory_path(cwd).ok())
            .and_then(|dir| dir.join("importmap.json").ok())
            .unwrap_or_else(fallback_map_url);

        Self {
            map_url,
            root_url: None,
            base_url: None,
            default_provider: "jspm".to_string(),
            default_registry: "npm".to_string(),
            providers: BTreeMap::new(),
            resolutions: BTreeMap::new(),
            env: default_env(),
            ignore: Vec::new(),
            static_trace: false,
            integrity: false,
            depcache: false,
            system: false,
            freeze: false,
            latest: false,
            input_map: None,
        }
    }
}

fn fallback_map_url() -> Url {
    match Url::parse("file:///importmap.json") {
        Ok(url) => url,
        Err(e) => unreachable!("static map URL failed to parse: {e}"),
    }
}

/// Conditions used when none are configured.
#[must_use]
pub fn default_env() -> Vec<String> {
    ["browser", "development", "module", "import"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl GeneratorConfig {
    /// Create a config writing the map at `map_url`.
    #[must_use]
    pub fn new(map_url: Url) -> Self {
        Self {
            map_url,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_root_url(mut self, root_url: Url) -> Self {
        self.root_url = Some(root_url);
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    #[must_use]
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = provider.into();
        self
    }

    #[must_use]
    pub fn with_default_registry(mut self, registry: impl Into<String>) -> Self {
        self.default_registry = registry.into();
        self
    }

    /// Route a package name, or a whole registry (`npm:`), to a provider.
    #[must_use]
    pub fn with_provider(mut self, target: impl Into<String>, provider: impl Into<String>) -> Self {
        self.providers.insert(target.into(), provider.into());
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.resolutions.insert(name.into(), target.into());
        self
    }

    #[must_use]
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ignore(mut self, specifier: impl Into<String>) -> Self {
        self.ignore.push(specifier.into());
        self
    }

    #[must_use]
    pub fn with_static_trace(mut self, static_trace: bool) -> Self {
        self.static_trace = static_trace;
        self
    }

    #[must_use]
    pub fn with_integrity(mut self, integrity: bool) -> Self {
        self.integrity = integrity;
        self
    }

    #[must_use]
    pub fn with_depcache(mut self, depcache: bool) -> Self {
        self.depcache = depcache;
        self
    }

    #[must_use]
    pub fn with_system(mut self, system: bool) -> Self {
        self.system = system;
        self
    }

    #[must_use]
    pub fn with_freeze(mut self, freeze: bool) -> Self {
        self.freeze = freeze;
        self
    }

    #[must_use]
    pub fn with_latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    #[must_use]
    pub fn with_input_map(mut self, map: serde_json::Value) -> Self {
        self.input_map = Some(map);
        self
    }

    /// Install mode implied by `freeze` and `latest`. `freeze` wins.
    #[must_use]
    pub fn install_mode(&self) -> InstallMode {
        if self.freeze {
            InstallMode::Freeze
        } else if self.latest {
            InstallMode::LatestPrimaries
        } else {
            InstallMode::Default
        }
    }

    /// Package scope of top-level installs, always ending in `/`.
    #[must_use]
    pub fn install_base_url(&self) -> Url {
        let base = self.base_url.as_ref().unwrap_or(&self.map_url);
        pinmap_util::url::dir_url(base)
    }

    /// Conditions for modules imported from CommonJS: `import` becomes
    /// `require`.
    #[must_use]
    pub fn cjs_env(&self) -> Vec<String> {
        cjs_env(&self.env)
    }
}

/// Swap `import` for `require`, keeping order.
#[must_use]
pub fn cjs_env(env: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(env.len());
    for condition in env {
        let condition = if condition == "import" {
            "require"
        } else {
            condition.as_str()
        };
        if !out.iter().any(|c| c == condition) {
            out.push(condition.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::new(Url::parse("file:///app/importmap.json").unwrap());
        assert_eq!(config.default_provider, "jspm");
        assert_eq!(config.default_registry, "npm");
        assert_eq!(config.env, default_env());
        assert_eq!(config.install_mode(), InstallMode::Default);
        assert_eq!(config.install_base_url().as_str(), "file:///app/");
    }

    #[test]
    fn test_builders() {
        let config = GeneratorConfig::new(Url::parse("file:///app/importmap.json").unwrap())
            .with_provider("npm:", "unpkg")
            .with_resolution("react", "16.14.0")
            .with_env(["production", "browser"])
            .with_latest(true);

        assert_eq!(config.providers["npm:"], "unpkg");
        assert_eq!(config.resolutions["react"], "16.14.0");
        assert_eq!(config.env, vec!["production", "browser"]);
        assert_eq!(config.install_mode(), InstallMode::LatestPrimaries);
        assert_eq!(config.with_freeze(true).install_mode(), InstallMode::Freeze);
    }

    #[test]
    fn test_cjs_env() {
        let env = default_env();
        assert_eq!(
            cjs_env(&env),
            vec!["browser", "development", "module", "require"]
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: GeneratorConfig = serde_json::from_str(
            r#"{"mapUrl":"file:///site/importmap.json","defaultProvider":"jsdelivr","freeze":true}"#,
        )
        .unwrap();
        assert_eq!(config.default_provider, "jsdelivr");
        assert!(config.freeze);
        assert_eq!(config.install_base_url().as_str(), "file:///site/");
    }
}
