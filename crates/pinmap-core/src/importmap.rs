//! Import maps: storage, resolution, rebasing and flattening.
//!
//! Targets and scope keys are stored as written (relative or absolute) and
//! interpreted against the map's base URL, with `/`-prefixed entries
//! resolved against the root URL when one is set. `BTreeMap` storage keeps
//! serialization deterministic.

use crate::error::{Error, Result};
use pinmap_util::url::{is_plain, origin_root, relative_url, resolve_url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Specifier to target. `None` maps a specifier to null (blocked).
pub type Mappings = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMap {
    base_url: Url,
    root_url: Option<Url>,
    pub imports: Mappings,
    pub scopes: BTreeMap<String, Mappings>,
    pub integrity: BTreeMap<String, String>,
    pub depcache: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImportMapJson {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    imports: Mappings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scopes: BTreeMap<String, Mappings>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    integrity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    depcache: BTreeMap<String, Vec<String>>,
}

/// Outcome of looking a specifier up in one set of mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapLookup {
    /// No key matches.
    Miss,
    /// Matched a null mapping.
    Null,
    Hit(Url),
}

impl ImportMap {
    /// An empty map whose entries are relative to `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            root_url: None,
            imports: Mappings::new(),
            scopes: BTreeMap::new(),
            integrity: BTreeMap::new(),
            depcache: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_root_url(mut self, root_url: Option<Url>) -> Self {
        self.root_url = root_url;
        self
    }

    /// Parse an import map document.
    ///
    /// # Errors
    /// Returns an error if the document does not have import map shape.
    pub fn from_json(value: &Value, base_url: Url, root_url: Option<Url>) -> Result<Self> {
        let json: ImportMapJson = serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_input(format!("Invalid import map: {e}")))?;
        Ok(Self {
            base_url,
            root_url,
            imports: json.imports,
            scopes: json.scopes,
            integrity: json.integrity,
            depcache: json.depcache,
        })
    }

    /// Serialize, omitting empty sections.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let json = ImportMapJson {
            imports: self.imports.clone(),
            scopes: self.scopes.clone(),
            integrity: self.integrity.clone(),
            depcache: self.depcache.clone(),
        };
        serde_json::to_value(json).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn root_url(&self) -> Option<&Url> {
        self.root_url.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self.scopes.is_empty()
            && self.integrity.is_empty()
            && self.depcache.is_empty()
    }

    /// Resolve a stored target or scope key to an absolute URL.
    #[must_use]
    pub fn resolve_target(&self, target: &str) -> Option<Url> {
        resolve_url(target, &self.base_url, self.root_url.as_ref())
    }

    /// Set a mapping at top level or in `scope`.
    pub fn set(&mut self, name: &str, target: Option<String>, scope: Option<&str>) -> &mut Self {
        match scope {
            None => {
                self.imports.insert(name.to_string(), target);
            }
            Some(scope) => {
                self.scopes
                    .entry(scope.to_string())
                    .or_default()
                    .insert(name.to_string(), target);
            }
        }
        self
    }

    pub fn set_integrity(&mut self, url: &str, integrity: &str) -> &mut Self {
        self.integrity.insert(url.to_string(), integrity.to_string());
        self
    }

    pub fn set_depcache(&mut self, url: &str, deps: Vec<String>) -> &mut Self {
        self.depcache.insert(url.to_string(), deps);
        self
    }

    /// Merge `other` into this map. `other` wins on conflicts; with
    /// `override_scopes`, its scopes replace ours wholesale.
    pub fn extend(&mut self, other: &ImportMap, override_scopes: bool) -> &mut Self {
        let mut other = other.clone();
        if other.base_url != self.base_url || other.root_url != self.root_url {
            other.rebase(self.base_url.clone(), self.root_url.clone());
        }

        self.imports.extend(other.imports);
        for (scope, mappings) in other.scopes {
            if override_scopes {
                self.scopes.insert(scope, mappings);
            } else {
                self.scopes.entry(scope).or_default().extend(mappings);
            }
        }
        self.integrity.extend(other.integrity);
        self.depcache.extend(other.depcache);
        self
    }

    /// Re-express every stored URL relative to a new base (and root).
    pub fn rebase(&mut self, base_url: Url, root_url: Option<Url>) -> &mut Self {
        let from_base = std::mem::replace(&mut self.base_url, base_url);
        let from_root = std::mem::replace(&mut self.root_url, root_url);

        let rebase = |s: &str| -> String {
            match resolve_url(s, &from_base, from_root.as_ref()) {
                Some(abs) => relative_url(&abs, &self.base_url, self.root_url.as_ref()),
                None => s.to_string(),
            }
        };
        let rebase_key = |k: &str| -> String {
            if is_plain(k) || is_mappable(k) {
                k.to_string()
            } else {
                rebase(k)
            }
        };
        let rebase_mappings = |m: &Mappings| -> Mappings {
            m.iter()
                .map(|(k, v)| (rebase_key(k), v.as_deref().map(&rebase)))
                .collect()
        };

        let imports = rebase_mappings(&self.imports);
        let scopes = self
            .scopes
            .iter()
            .map(|(scope, m)| (rebase(scope), rebase_mappings(m)))
            .collect();
        let integrity = self
            .integrity
            .iter()
            .map(|(k, v)| (rebase(k), v.clone()))
            .collect();
        let depcache = self
            .depcache
            .iter()
            .map(|(k, v)| (rebase(k), v.clone()))
            .collect();

        self.imports = imports;
        self.scopes = scopes;
        self.integrity = integrity;
        self.depcache = depcache;
        self
    }

    /// Scopes applying to `parent`, most specific first, with their resolved
    /// URLs.
    #[must_use]
    pub fn scope_matches(&self, parent: &str) -> Vec<(&str, String)> {
        let mut matches: Vec<(&str, String)> = self
            .scopes
            .keys()
            .filter_map(|key| {
                let url = self.resolve_target(key)?.to_string();
                (parent == url || (url.ends_with('/') && parent.starts_with(&url)))
                    .then_some((key.as_str(), url))
            })
            .collect();
        matches.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        matches
    }

    /// Resolve a specifier imported from `parent` through this map.
    ///
    /// Returns `None` for specifiers mapped to null.
    ///
    /// # Errors
    /// Returns an error for bare specifiers with no mapping and for targets
    /// that are not URLs.
    pub fn resolve(&self, specifier: &str, parent: &Url) -> Result<Option<Url>> {
        let key = self.lookup_key(specifier, parent)?;
        let lookup = match self.resolve_scoped(&key, parent)? {
            MapLookup::Miss => self.lookup(&key, &self.imports)?,
            found => found,
        };
        match lookup {
            MapLookup::Null => Ok(None),
            MapLookup::Hit(url) => Ok(Some(url)),
            MapLookup::Miss if is_plain(specifier) => Err(Error::module_not_found(format!(
                "Unable to resolve \"{specifier}\" from {parent}"
            ))),
            MapLookup::Miss => self.resolve_target(&key).map(Some).ok_or_else(|| {
                Error::invalid_input(format!("Invalid specifier {specifier}"))
            }),
        }
    }

    fn lookup_key(&self, specifier: &str, parent: &Url) -> Result<String> {
        if is_plain(specifier) {
            return Ok(specifier.to_string());
        }
        resolve_url(specifier, parent, self.root_url.as_ref())
            .map(String::from)
            .ok_or_else(|| Error::invalid_input(format!("Invalid specifier {specifier}")))
    }

    /// Look `specifier` up in the scopes applying to `parent`, most specific
    /// first. Non-plain specifiers must already be absolute.
    ///
    /// # Errors
    /// Returns an error when the matched target is not a URL.
    pub fn resolve_scoped(&self, specifier: &str, parent: &Url) -> Result<MapLookup> {
        for (scope, _) in self.scope_matches(parent.as_str()) {
            if let Some(mappings) = self.scopes.get(scope) {
                match self.lookup(specifier, mappings)? {
                    MapLookup::Miss => {}
                    found => return Ok(found),
                }
            }
        }
        Ok(MapLookup::Miss)
    }

    /// Look `specifier` up in the top-level imports only.
    ///
    /// # Errors
    /// Returns an error when the matched target is not a URL.
    pub fn resolve_root(&self, specifier: &str) -> Result<MapLookup> {
        self.lookup(specifier, &self.imports)
    }

    fn lookup(&self, specifier: &str, mappings: &Mappings) -> Result<MapLookup> {
        let normalized: Vec<(String, &Option<String>)> = mappings
            .iter()
            .map(|(k, v)| {
                let key = if is_plain(k) || is_mappable(k) {
                    k.clone()
                } else {
                    self.resolve_target(k).map_or_else(|| k.clone(), String::from)
                };
                (key, v)
            })
            .collect();

        let Some(matched) = get_map_match(specifier, normalized.iter().map(|(k, _)| k.as_str()))
        else {
            return Ok(MapLookup::Miss);
        };
        let Some((_, target)) = normalized.iter().find(|(k, _)| k == matched) else {
            return Ok(MapLookup::Miss);
        };
        let Some(target) = target else {
            return Ok(MapLookup::Null);
        };

        let applied = apply_map_match(specifier, matched, target);
        if is_plain(&applied) {
            return Err(Error::invalid_input(format!(
                "Import map target \"{applied}\" for \"{specifier}\" is not a URL"
            )));
        }
        self.resolve_target(&applied)
            .map(MapLookup::Hit)
            .ok_or_else(|| Error::invalid_input(format!("Invalid import map target {applied}")))
    }

    fn same_target(&self, a: Option<&str>, b: Option<&str>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a == b || self.resolve_target(a).is_some_and(|ua| Some(ua) == self.resolve_target(b))
            }
            _ => false,
        }
    }

    /// Remove redundant scope entries and hoist cross-origin scopes to their
    /// origin root. Idempotent.
    ///
    /// Scope entries equal to the top-level mapping are dropped. Entries of
    /// scopes on another origin than the map move to that origin's root scope
    /// unless it already maps the name differently. Empty scopes are removed.
    pub fn flatten(&mut self) -> &mut Self {
        let map_origin = origin_root(&self.base_url);
        let scope_keys: Vec<String> = self.scopes.keys().cloned().collect();

        for scope in scope_keys {
            let Some(scope_url) = self.resolve_target(&scope) else {
                continue;
            };
            let Some(mut mappings) = self.scopes.remove(&scope) else {
                continue;
            };

            mappings.retain(|name, target| {
                !self
                    .imports
                    .get(name)
                    .is_some_and(|root| self.same_target(root.as_deref(), target.as_deref()))
            });

            let origin = origin_root(&scope_url);
            if origin != map_origin && scope_url.as_str() != origin {
                let mut kept = Mappings::new();
                for (name, target) in mappings {
                    let conflict = self
                        .scopes
                        .get(&origin)
                        .and_then(|m| m.get(&name))
                        .is_some_and(|existing| {
                            !self.same_target(existing.as_deref(), target.as_deref())
                        });
                    if conflict {
                        kept.insert(name, target);
                    } else {
                        self.scopes
                            .entry(origin.clone())
                            .or_default()
                            .insert(name, target);
                    }
                }
                mappings = kept;
            }

            if !mappings.is_empty() {
                self.scopes.insert(scope, mappings);
            }
        }
        self
    }
}

fn is_mappable(specifier: &str) -> bool {
    pinmap_util::url::is_mappable_scheme(specifier)
}

/// Find the map key matching `specifier`: an exact key, else the longest
/// trailing-`/` prefix or single-`*` pattern.
pub fn get_map_match<'a, I>(specifier: &str, keys: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, usize)> = None;
    for key in keys {
        if key == specifier {
            return Some(key);
        }
        let weight = if let Some((prefix, suffix)) = key.split_once('*') {
            let matches = !suffix.contains('*')
                && specifier.len() > prefix.len() + suffix.len()
                && specifier.starts_with(prefix)
                && specifier.ends_with(suffix);
            matches.then_some(prefix.len())
        } else if key.ends_with('/') && specifier.starts_with(key) {
            Some(key.len())
        } else {
            None
        };
        if let Some(weight) = weight {
            if best.map_or(true, |(_, w)| weight > w) {
                best = Some((key, weight));
            }
        }
    }
    best.map(|(key, _)| key)
}

/// Apply a matched key to its target: substitute a `*` capture or append the
/// remainder after a `/` key.
#[must_use]
pub fn apply_map_match(specifier: &str, key: &str, target: &str) -> String {
    if let Some((prefix, suffix)) = key.split_once('*') {
        let capture = &specifier[prefix.len()..specifier.len() - suffix.len()];
        return target.replace('*', capture);
    }
    if key.ends_with('/') && key != specifier {
        return format!("{target}{}", &specifier[key.len()..]);
    }
    target.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn sample() -> ImportMap {
        ImportMap::from_json(
            &json!({
                "imports": {
                    "react": "https://ga.jspm.io/npm:react@16.14.0/index.js",
                    "lib/": "./lib/",
                    "blocked": null
                },
                "scopes": {
                    "https://ga.jspm.io/npm:react@16.14.0/": {
                        "object-assign": "https://ga.jspm.io/npm:object-assign@4.1.1/index.js"
                    },
                    "./vendor/": {
                        "react": "./vendor/react.js"
                    }
                }
            }),
            u("file:///app/importmap.json"),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_get_map_match() {
        let keys = ["./", "./b/", "./b/*.js", "./b/c"];
        assert_eq!(get_map_match("./b/c", keys), Some("./b/c"));
        assert_eq!(get_map_match("./b/d.js", keys), Some("./b/*.js"));
        assert_eq!(get_map_match("./b/d.css", keys), Some("./b/"));
        assert_eq!(get_map_match("./x", keys), Some("./"));
        assert_eq!(get_map_match("x", keys), None);
        assert_eq!(get_map_match("./b/.js", ["./b/*.js"]), None);
    }

    #[test]
    fn test_apply_map_match() {
        assert_eq!(apply_map_match("./b/d.js", "./b/*.js", "./dist/*.mjs"), "./dist/d.mjs");
        assert_eq!(apply_map_match("lib/a.js", "lib/", "./lib/"), "./lib/a.js");
        assert_eq!(apply_map_match("react", "react", "./r.js"), "./r.js");
    }

    #[test]
    fn test_resolve_imports_and_scopes() {
        let map = sample();
        let main = u("file:///app/main.js");

        assert_eq!(
            map.resolve("react", &main).unwrap().unwrap().as_str(),
            "https://ga.jspm.io/npm:react@16.14.0/index.js"
        );
        assert_eq!(
            map.resolve("lib/util.js", &main).unwrap().unwrap().as_str(),
            "file:///app/lib/util.js"
        );

        let react = u("https://ga.jspm.io/npm:react@16.14.0/index.js");
        assert_eq!(
            map.resolve("object-assign", &react).unwrap().unwrap().as_str(),
            "https://ga.jspm.io/npm:object-assign@4.1.1/index.js"
        );

        let vendored = u("file:///app/vendor/app.js");
        assert_eq!(
            map.resolve("react", &vendored).unwrap().unwrap().as_str(),
            "file:///app/vendor/react.js"
        );
    }

    #[test]
    fn test_resolve_null_relative_and_missing() {
        let map = sample();
        let main = u("file:///app/main.js");
        assert_eq!(map.resolve("blocked", &main).unwrap(), None);
        assert_eq!(
            map.resolve("./a.js", &main).unwrap().unwrap().as_str(),
            "file:///app/a.js"
        );
        let err = map.resolve("unknown", &main).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::MODULE_NOT_FOUND);
    }

    #[test]
    fn test_to_json_omits_empty_sections() {
        let mut map = ImportMap::new(u("file:///app/"));
        map.set("a", Some("./a.js".into()), None);
        assert_eq!(map.to_json(), json!({"imports": {"a": "./a.js"}}));
        assert_eq!(ImportMap::new(u("file:///app/")).to_json(), json!({}));
    }

    #[test]
    fn test_from_json_rejects_bad_shape() {
        let err = ImportMap::from_json(&json!({"imports": {"a": 1}}), u("file:///app/"), None)
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::INVALID_INPUT);
    }

    #[test]
    fn test_rebase() {
        let mut map = sample();
        map.set_integrity("./lib/a.js", "sha384-x");
        map.rebase(u("file:///app/public/importmap.json"), None);

        assert_eq!(map.imports["lib/"].as_deref(), Some("../lib/"));
        assert_eq!(
            map.imports["react"].as_deref(),
            Some("https://ga.jspm.io/npm:react@16.14.0/index.js")
        );
        assert!(map.scopes.contains_key("../vendor/"));
        assert!(map.integrity.contains_key("../lib/a.js"));

        map.rebase(u("file:///app/importmap.json"), None);
        assert_eq!(map, sample_with_integrity());
    }

    fn sample_with_integrity() -> ImportMap {
        let mut map = sample();
        map.set_integrity("./lib/a.js", "sha384-x");
        map
    }

    #[test]
    fn test_extend_rebases_other() {
        let mut map = ImportMap::new(u("file:///app/"));
        let mut other = ImportMap::new(u("file:///app/sub/"));
        other.set("x", Some("./x.js".into()), None);
        other.set("y", Some("./y.js".into()), Some("./"));

        map.extend(&other, false);
        assert_eq!(map.imports["x"].as_deref(), Some("./sub/x.js"));
        assert_eq!(map.scopes["./sub/"]["y"].as_deref(), Some("./sub/y.js"));
    }

    #[test]
    fn test_flatten_hoists_cross_origin_and_drops_root_duplicates() {
        let mut map = ImportMap::new(u("file:///app/"));
        map.set("react", Some("https://ga.jspm.io/npm:react@16.14.0/index.js".into()), None);
        let react_scope = "https://ga.jspm.io/npm:react-dom@16.14.0/";
        map.set(
            "object-assign",
            Some("https://ga.jspm.io/npm:object-assign@4.1.1/index.js".into()),
            Some(react_scope),
        );
        map.set(
            "react",
            Some("https://ga.jspm.io/npm:react@16.14.0/index.js".into()),
            Some(react_scope),
        );
        map.set(
            "object-assign",
            Some("https://ga.jspm.io/npm:object-assign@4.0.0/index.js".into()),
            Some("https://ga.jspm.io/npm:zlib-legacy@1.0.0/"),
        );
        map.set("react", Some("./vendor/react.js".into()), Some("./pkg-a/"));

        map.flatten();

        let origin = &map.scopes["https://ga.jspm.io/"];
        assert_eq!(
            origin["object-assign"].as_deref(),
            Some("https://ga.jspm.io/npm:object-assign@4.1.1/index.js")
        );
        assert!(!map.scopes.contains_key(react_scope));
        assert_eq!(
            map.scopes["https://ga.jspm.io/npm:zlib-legacy@1.0.0/"]["object-assign"].as_deref(),
            Some("https://ga.jspm.io/npm:object-assign@4.0.0/index.js")
        );
        assert_eq!(
            map.scopes["./pkg-a/"]["react"].as_deref(),
            Some("./vendor/react.js")
        );

        let once = map.clone();
        map.flatten();
        assert_eq!(map, once);
    }
}
