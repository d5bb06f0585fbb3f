use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The subset of `package.json` the generator reads.
///
/// `exports` keeps its JSON shape: key order decides condition priority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub version: Option<String>,

    /// `"module"` or `"commonjs"`.
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_string"
    )]
    pub module_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub main: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub module: Option<String>,

    /// A replacement main (string) or a subpath remap (object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "string_map")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "string_map")]
    pub peer_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "string_map")]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "string_map")]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageConfig {
    /// Parse a manifest. Shapes that are not objects yield `None`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Whether `"type": "module"` is declared.
    #[must_use]
    pub fn is_module(&self) -> bool {
        self.module_type.as_deref() == Some("module")
    }

    /// The `browser` field when it is a main replacement.
    #[must_use]
    pub fn browser_main(&self) -> Option<&str> {
        self.browser.as_ref().and_then(Value::as_str)
    }

    /// The `browser` field when it is a subpath remap.
    #[must_use]
    pub fn browser_map(&self) -> Option<&Map<String, Value>> {
        self.browser.as_ref().and_then(Value::as_object)
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Dependency maps with non-string values (seen in the wild) drop those
/// entries instead of failing the whole manifest.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let pcfg = PackageConfig::from_slice(
            br#"{
                "name": "react",
                "version": "16.14.0",
                "main": "index.js",
                "browser": {"./server.js": false},
                "dependencies": {"object-assign": "^4.1.1", "bad": 12},
                "peerDependencies": null
            }"#,
        )
        .unwrap();

        assert_eq!(pcfg.name.as_deref(), Some("react"));
        assert_eq!(pcfg.main.as_deref(), Some("index.js"));
        assert!(pcfg.browser_map().is_some());
        assert!(pcfg.browser_main().is_none());
        assert_eq!(pcfg.dependencies.len(), 1);
        assert!(pcfg.peer_dependencies.is_empty());
        assert!(!pcfg.is_module());
    }

    #[test]
    fn test_exports_key_order_preserved() {
        let pcfg = PackageConfig::from_slice(
            br#"{"exports": {"node": "./n.js", "browser": "./b.js", "default": "./d.js"}}"#,
        )
        .unwrap();
        let keys: Vec<&String> = pcfg.exports.as_ref().unwrap().as_object().unwrap().keys().collect();
        assert_eq!(keys, ["node", "browser", "default"]);
    }

    #[test]
    fn test_non_object_manifest() {
        assert!(PackageConfig::from_slice(b"[1, 2]").is_none());
        assert!(PackageConfig::from_slice(b"not json").is_none());
    }

    #[test]
    fn test_type_module() {
        let pcfg = PackageConfig::from_slice(br#"{"type": "module", "main": 3}"#).unwrap();
        assert!(pcfg.is_module());
        assert!(pcfg.main.is_none());
    }
}
