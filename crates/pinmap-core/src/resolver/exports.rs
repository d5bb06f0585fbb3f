//! Package `exports` and `imports` field resolution.
//!
//! Targets resolve to package-relative paths (`./lib/index.js`); the
//! resolver joins them onto the package base. Condition objects are matched
//! depth-first in key order against the active environment plus `default`.

use crate::package::PackageConfig;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Whether an exports object maps subpaths rather than conditions.
fn has_subpath_keys(obj: &Map<String, Value>) -> bool {
    obj.keys().any(|k| k.starts_with('.'))
}

/// Match `subpath` against a key with a single `*`, returning the capture.
pub(crate) fn match_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let star = pattern.find('*')?;
    if pattern[star + 1..].contains('*') {
        return None;
    }
    let prefix = &pattern[..star];
    let suffix = &pattern[star + 1..];
    if !subpath.starts_with(prefix) || !subpath.ends_with(suffix) {
        return None;
    }
    if subpath.len() <= prefix.len() + suffix.len() {
        return None;
    }
    Some(subpath[prefix.len()..subpath.len() - suffix.len()].to_string())
}

fn apply_capture(target: &str, capture: Option<&str>) -> String {
    match capture {
        Some(capture) if target.contains('*') => target.replace('*', capture),
        Some(capture) => format!("{target}{capture}"),
        None => target.to_string(),
    }
}

/// Resolve one target value: a path, a condition object, or a fallback
/// array.
///
/// `imports` targets may also name bare packages.
pub(crate) fn resolve_target(
    target: &Value,
    env: &[String],
    capture: Option<&str>,
    imports: bool,
) -> Option<String> {
    match target {
        Value::String(s) => {
            if s.starts_with("./") {
                if let Some(capture) = capture {
                    if capture.split('/').any(|segment| segment == "..") {
                        debug!(target = %s, capture, "rejected traversal in exports capture");
                        return None;
                    }
                }
                return Some(apply_capture(s, capture));
            }
            if imports && !s.starts_with("../") && !s.starts_with('/') {
                return Some(apply_capture(s, capture));
            }
            debug!(target = %s, "invalid exports target");
            None
        }
        Value::Object(conditions) => conditions
            .iter()
            .filter(|(condition, _)| {
                condition.as_str() == "default" || env.iter().any(|e| e == *condition)
            })
            .find_map(|(_, value)| resolve_target(value, env, capture, imports)),
        Value::Array(fallbacks) => fallbacks
            .iter()
            .find_map(|value| resolve_target(value, env, capture, imports)),
        _ => None,
    }
}

/// The most specific key of `map` matching `subpath`, with its capture.
///
/// Exact keys win; otherwise `*` patterns and trailing-`/` folder keys are
/// ranked by the length of their fixed prefix.
pub(crate) fn match_subpath<'a>(
    map: &'a Map<String, Value>,
    subpath: &str,
) -> Option<(&'a str, &'a Value, Option<String>)> {
    if let Some((key, value)) = map.get_key_value(subpath) {
        if !key.contains('*') {
            return Some((key.as_str(), value, None));
        }
    }

    let mut best: Option<(usize, &'a str, &'a Value, String)> = None;
    for (key, value) in map {
        let candidate = if key.contains('*') {
            match_pattern(key, subpath).map(|capture| (key.find('*').unwrap_or(0), capture))
        } else if key.ends_with('/') && subpath.starts_with(key.as_str()) {
            Some((key.len(), subpath[key.len()..].to_string()))
        } else {
            None
        };
        let Some((rank, capture)) = candidate else {
            continue;
        };
        let better = best.as_ref().map_or(true, |(best_rank, best_key, ..)| {
            rank > *best_rank || (rank == *best_rank && key.len() > best_key.len())
        });
        if better {
            best = Some((rank, key.as_str(), value, capture));
        }
    }
    best.map(|(_, key, value, capture)| (key, value, Some(capture)))
}

/// Resolve `subpath` (`.` or `./x`) through an `exports` field.
#[must_use]
pub fn resolve_export_subpath(exports: &Value, subpath: &str, env: &[String]) -> Option<String> {
    match exports {
        Value::Object(obj) if has_subpath_keys(obj) => {
            let (_, target, capture) = match_subpath(obj, subpath)?;
            resolve_target(target, env, capture.as_deref(), false)
        }
        _ if subpath == "." => resolve_target(exports, env, None, false),
        _ => None,
    }
}

/// Resolve a `#private` specifier through an `imports` field.
#[must_use]
pub fn resolve_imports(
    imports: &Map<String, Value>,
    specifier: &str,
    env: &[String],
) -> Option<String> {
    let (_, target, capture) = match_subpath(imports, specifier)?;
    resolve_target(target, env, capture.as_deref(), true)
}

/// The main entry for packages without `exports`: `browser` (string form)
/// in browser environments, `module` where `module` is a condition, then
/// `main`.
#[must_use]
pub fn legacy_main<'a>(pcfg: &'a PackageConfig, env: &[String]) -> Option<&'a str> {
    let has = |condition: &str| env.iter().any(|e| e == condition);
    if has("browser") {
        if let Some(browser) = pcfg.browser_main() {
            return Some(browser);
        }
    }
    if has("module") {
        if let Some(module) = pcfg.module.as_deref() {
            return Some(module);
        }
    }
    pcfg.main.as_deref()
}

fn relative(path: &str) -> String {
    if path.starts_with("./") {
        path.to_string()
    } else {
        format!("./{}", path.trim_start_matches('/'))
    }
}

/// Every export of a package, as subpath to package-relative target.
///
/// Pattern exports keep their `*`. Without an `exports` field the legacy
/// main and browser remaps are used, plus `./` for deep imports.
///
/// With `filter` (`./sub`), only exports at or below that subpath are kept,
/// re-keyed relative to it.
#[must_use]
pub fn exports_map(
    pcfg: &PackageConfig,
    env: &[String],
    filter: Option<&str>,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    match &pcfg.exports {
        Some(Value::Object(obj)) if has_subpath_keys(obj) => {
            for (key, target) in obj {
                let capture = key.contains('*').then_some("*");
                if let Some(resolved) = resolve_target(target, env, capture, false) {
                    map.insert(key.clone(), resolved);
                }
            }
        }
        Some(exports) => {
            if let Some(resolved) = resolve_target(exports, env, None, false) {
                map.insert(".".to_string(), resolved);
            }
        }
        None => {
            if let Some(main) = legacy_main(pcfg, env) {
                map.insert(".".to_string(), relative(main));
            }
            if env.iter().any(|e| e == "browser") {
                if let Some(browser) = pcfg.browser_map() {
                    for (key, target) in browser {
                        if let (true, Some(target)) = (key.starts_with("./"), target.as_str()) {
                            map.insert(key.clone(), relative(target));
                        }
                    }
                }
            }
            map.entry("./".to_string()).or_insert_with(|| "./".to_string());
            map.entry(".".to_string()).or_insert_with(|| ".".to_string());
        }
    }

    let Some(filter) = filter.filter(|f| *f != ".") else {
        return map;
    };

    let mut filtered = BTreeMap::new();
    for (key, target) in &map {
        if key == filter {
            filtered.insert(".".to_string(), target.clone());
        } else if let Some(rest) = key
            .strip_prefix(filter)
            .filter(|rest| rest.starts_with('/'))
        {
            filtered.insert(format!(".{rest}"), target.clone());
        } else if let Some(capture) = match_pattern(key, filter) {
            filtered
                .entry(".".to_string())
                .or_insert_with(|| target.replace('*', &capture));
        }
    }
    filtered
}

/// Look `subpath` up in a resolved export map: exact keys first, then `*`
/// patterns with the capture substituted into the target.
#[must_use]
pub fn lookup_export(map: &BTreeMap<String, String>, subpath: &str) -> Option<String> {
    if let Some(target) = map.get(subpath).filter(|t| !t.contains('*')) {
        return Some(target.clone());
    }
    map.iter()
        .filter(|(key, _)| key.contains('*'))
        .filter_map(|(key, target)| {
            let capture = match_pattern(key, subpath)?;
            if capture.split('/').any(|segment| segment == "..") {
                return None;
            }
            Some((key.find('*').unwrap_or(0), target.replace('*', &capture)))
        })
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, target)| target)
}

/// The export subpath under which a package-relative file is reachable.
#[must_use]
pub fn export_for_target(map: &BTreeMap<String, String>, target: &str) -> Option<String> {
    if let Some((key, _)) = map.iter().find(|(_, t)| t.as_str() == target) {
        return Some(key.clone());
    }
    map.iter().find_map(|(key, t)| {
        if t.contains('*') {
            match_pattern(t, target).map(|capture| key.replace('*', &capture))
        } else if t.ends_with('/') && key.ends_with('/') {
            target.strip_prefix(t.as_str()).map(|rest| format!("{key}{rest}"))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Vec<String> {
        vec!["browser".into(), "production".into(), "module".into(), "import".into()]
    }

    fn pcfg(value: Value) -> PackageConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_subpaths_and_patterns() {
        let exports = json!({"./a": "./a.js", "./b/*": "./b/*.js"});
        assert_eq!(
            resolve_export_subpath(&exports, "./b/x", &env()).as_deref(),
            Some("./b/x.js")
        );
        assert_eq!(
            resolve_export_subpath(&exports, "./a", &env()).as_deref(),
            Some("./a.js")
        );
        assert_eq!(resolve_export_subpath(&exports, "./c", &env()), None);
    }

    #[test]
    fn test_conditions_in_key_order() {
        let exports = json!({
            ".": {
                "node": "./node.js",
                "browser": {"development": "./dev.js", "default": "./browser.js"},
                "default": "./index.js"
            }
        });
        assert_eq!(
            resolve_export_subpath(&exports, ".", &env()).as_deref(),
            Some("./browser.js")
        );
        let node = vec!["node".to_string()];
        assert_eq!(
            resolve_export_subpath(&exports, ".", &node).as_deref(),
            Some("./node.js")
        );
    }

    #[test]
    fn test_default_after_condition_not_sorted_first() {
        let exports = json!({".": {"import": "./esm.js", "default": "./cjs.js"}});
        let browser_import = vec!["browser".to_string(), "import".to_string()];
        assert_eq!(
            resolve_export_subpath(&exports, ".", &browser_import).as_deref(),
            Some("./esm.js")
        );
        let imports = json!({"#dep": {"module": "./dep.mjs", "default": "./dep.js"}});
        assert_eq!(
            resolve_imports(imports.as_object().unwrap(), "#dep", &env()).as_deref(),
            Some("./dep.mjs")
        );
    }

    #[test]
    fn test_root_shorthands() {
        assert_eq!(
            resolve_export_subpath(&json!("./main.js"), ".", &env()).as_deref(),
            Some("./main.js")
        );
        assert_eq!(resolve_export_subpath(&json!("./main.js"), "./x", &env()), None);
        let conditions = json!({"import": "./esm.js", "require": "./cjs.js"});
        assert_eq!(
            resolve_export_subpath(&conditions, ".", &env()).as_deref(),
            Some("./esm.js")
        );
        assert_eq!(
            resolve_export_subpath(&json!(["invalid", "./fallback.js"]), ".", &env()).as_deref(),
            Some("./fallback.js")
        );
    }

    #[test]
    fn test_null_target_excludes() {
        let exports = json!({"./*": "./*.js", "./internal/*": null});
        assert_eq!(resolve_export_subpath(&exports, "./internal/x", &env()), None);
        assert_eq!(
            resolve_export_subpath(&exports, "./util", &env()).as_deref(),
            Some("./util.js")
        );
    }

    #[test]
    fn test_traversal_rejected() {
        let exports = json!({"./*": "./*.js"});
        assert_eq!(resolve_export_subpath(&exports, "./../secret", &env()), None);
    }

    #[test]
    fn test_imports_field() {
        let imports = json!({"#dep": {"browser": "dep-browser", "default": "./dep.js"}, "#int/*": "./src/*.js"});
        let imports = imports.as_object().unwrap();
        assert_eq!(
            resolve_imports(imports, "#dep", &env()).as_deref(),
            Some("dep-browser")
        );
        assert_eq!(
            resolve_imports(imports, "#int/a", &env()).as_deref(),
            Some("./src/a.js")
        );
        assert_eq!(resolve_imports(imports, "#nope", &env()), None);
    }

    #[test]
    fn test_exports_map_filtered() {
        let pcfg = pcfg(json!({
            "exports": {
                ".": "./index.js",
                "./html.js": "./html.js",
                "./directives/*": "./directives/*.js",
                "./package.json": "./package.json"
            }
        }));
        let full = exports_map(&pcfg, &env(), None);
        assert_eq!(full["./directives/*"], "./directives/*.js");

        let filtered = exports_map(&pcfg, &env(), Some("./directives"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["./*"], "./directives/*.js");

        let single = exports_map(&pcfg, &env(), Some("./directives/repeat"));
        assert_eq!(single["."], "./directives/repeat.js");
    }

    #[test]
    fn test_exports_map_legacy() {
        let pcfg = pcfg(json!({
            "main": "index.js",
            "module": "esm/index.js",
            "browser": {"./server.js": "./server.browser.js", "fs": false}
        }));
        let map = exports_map(&pcfg, &env(), None);
        assert_eq!(map["."], "./esm/index.js");
        assert_eq!(map["./server.js"], "./server.browser.js");
        assert_eq!(map["./"], "./");
        assert!(!map.contains_key("fs"));

        let bare = exports_map(&PackageConfig::default(), &env(), None);
        assert_eq!(bare["."], ".");
    }

    #[test]
    fn test_export_for_target() {
        let mut map = BTreeMap::new();
        map.insert(".".to_string(), "./index.js".to_string());
        map.insert("./b/*".to_string(), "./lib/b/*.js".to_string());
        map.insert("./".to_string(), "./".to_string());

        assert_eq!(export_for_target(&map, "./index.js").as_deref(), Some("."));
        assert_eq!(export_for_target(&map, "./lib/b/x.js").as_deref(), Some("./b/x"));
        assert_eq!(export_for_target(&map, "./other.js").as_deref(), Some("./other.js"));
    }
}
