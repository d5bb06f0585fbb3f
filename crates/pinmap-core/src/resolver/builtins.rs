//! Node.js core module names.

/// Core modules served as `@jspm/core/nodelibs/<name>` in browsers.
pub const NODE_BUILTINS: &[&str] = &[
    "_stream_duplex",
    "_stream_passthrough",
    "_stream_readable",
    "_stream_transform",
    "_stream_writable",
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "stream/promises",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Package providing browser builds of the core modules.
pub const CORE_PACKAGE: &str = "@jspm/core";

/// The core module a specifier names: `fs`, `node:fs`, `node:fs/promises`.
///
/// Any `node:` specifier counts, known or not.
#[must_use]
pub fn builtin_name(specifier: &str) -> Option<&str> {
    if let Some(name) = specifier.strip_prefix("node:") {
        return (!name.is_empty()).then_some(name);
    }
    NODE_BUILTINS.contains(&specifier).then_some(specifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_name() {
        assert_eq!(builtin_name("fs"), Some("fs"));
        assert_eq!(builtin_name("node:fs/promises"), Some("fs/promises"));
        assert_eq!(builtin_name("node:test"), Some("test"));
        assert_eq!(builtin_name("react"), None);
        assert_eq!(builtin_name("node:"), None);
    }

    #[test]
    fn test_builtins_sorted() {
        let mut sorted = NODE_BUILTINS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, NODE_BUILTINS);
    }
}
