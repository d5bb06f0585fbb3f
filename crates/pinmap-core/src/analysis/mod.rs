//! Module source analysis.
//!
//! The trace asks an [`Analyzer`] for the dependency specifiers of every
//! module it fetches. [`SourceAnalyzer`] is the built-in implementation:
//! lexical scanning for JavaScript and TypeScript, `System.register`
//! dependency arrays, JSON validation and the WebAssembly import section.

pub mod scan;
pub mod wasm;

use crate::error::{Error, Result};
use regex_lite::Regex;
use scan::{scan_module, ImportKind, ScanOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// Module format as detected by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    Esm,
    CommonJs,
    System,
    TypeScript,
    Json,
    Wasm,
}

impl ModuleFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Esm => "esm",
            Self::CommonJs => "commonjs",
            Self::System => "system",
            Self::TypeScript => "typescript",
            Self::Json => "json",
            Self::Wasm => "wasm",
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How source should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeMode {
    /// `import`/`export` dependencies.
    Esm,
    /// `require` dependencies, split into top-level and lazy.
    CommonJs,
    /// `System.register` dependency arrays.
    System,
}

/// Dependencies of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnalysis {
    pub format: ModuleFormat,
    pub deps: Vec<String>,
    pub dynamic_deps: Vec<String>,
    /// `require` calls inside functions. `None` outside CommonJS.
    pub cjs_lazy_deps: Option<Vec<String>>,
    /// Whether ESM syntax was seen.
    pub has_module_syntax: bool,
}

impl SourceAnalysis {
    #[must_use]
    pub fn empty(format: ModuleFormat) -> Self {
        Self {
            format,
            deps: Vec::new(),
            dynamic_deps: Vec::new(),
            cjs_lazy_deps: None,
            has_module_syntax: false,
        }
    }
}

/// Extracts dependency specifiers from module source.
pub trait Analyzer: Send + Sync + fmt::Debug {
    /// Analyze `source` fetched from `url`.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] when the source cannot be read in `mode`.
    fn analyze_source(&self, source: &[u8], url: &Url, mode: AnalyzeMode)
        -> Result<SourceAnalysis>;
}

/// The built-in lexical analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceAnalyzer;

fn extension(url: &Url) -> &str {
    let path = url.path();
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map_or("", |(_, ext)| ext)
}

fn parse_error(url: &Url, source: &str, line: usize, column: usize, message: &str) -> Error {
    let text = source.lines().nth(line.saturating_sub(1)).unwrap_or("");
    let gutter = line.to_string();
    let snippet = format!(
        "{message}\n{gutter} | {text}\n{pad} | {caret:>column$}",
        pad = " ".repeat(gutter.len()),
        caret = "^",
    );
    Error::Parse {
        url: url.to_string(),
        line,
        column,
        snippet,
    }
}

struct SystemPatterns {
    register: Regex,
    string: Regex,
    dynamic: Regex,
}

fn system_patterns() -> Option<&'static SystemPatterns> {
    static PATTERNS: OnceLock<Option<SystemPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(SystemPatterns {
                register: Regex::new(
                    r#"System\.register\(\s*(?:['"][^'"]*['"]\s*,\s*)?\[([^\]]*)\]"#,
                )
                .ok()?,
                string: Regex::new(r#"['"]([^'"]+)['"]"#).ok()?,
                dynamic: Regex::new(r#"\.import\(\s*['"]([^'"]+)['"]\s*\)"#).ok()?,
            })
        })
        .as_ref()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn analyze_system(source: &str) -> Option<SourceAnalysis> {
    let patterns = system_patterns()?;
    let register = patterns.register.captures(source)?;
    let mut analysis = SourceAnalysis::empty(ModuleFormat::System);
    if let Some(list) = register.get(1) {
        for dep in patterns.string.captures_iter(list.as_str()) {
            if let Some(dep) = dep.get(1) {
                push_unique(&mut analysis.deps, dep.as_str());
            }
        }
    }
    for dep in patterns.dynamic.captures_iter(source) {
        if let Some(dep) = dep.get(1) {
            push_unique(&mut analysis.dynamic_deps, dep.as_str());
        }
    }
    Some(analysis)
}

impl Analyzer for SourceAnalyzer {
    fn analyze_source(
        &self,
        source: &[u8],
        url: &Url,
        mode: AnalyzeMode,
    ) -> Result<SourceAnalysis> {
        let ext = extension(url);

        if ext == "wasm" {
            let modules = wasm::imported_modules(source)
                .map_err(|message| parse_error(url, "", 1, 1, &message))?;
            let mut analysis = SourceAnalysis::empty(ModuleFormat::Wasm);
            analysis.deps = modules;
            analysis.has_module_syntax = true;
            return Ok(analysis);
        }

        let text = String::from_utf8_lossy(source);

        if ext == "json" {
            return match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(_) => Ok(SourceAnalysis::empty(ModuleFormat::Json)),
                Err(e) => Err(parse_error(url, &text, e.line(), e.column(), &e.to_string())),
            };
        }

        if mode == AnalyzeMode::System {
            if let Some(analysis) = analyze_system(&text) {
                return Ok(analysis);
            }
        }

        let typescript = matches!(ext, "ts" | "tsx" | "mts" | "cts");
        let options = ScanOptions {
            typescript,
            jsx: matches!(ext, "tsx" | "jsx"),
        };
        let scanned = scan_module(&text, options)
            .map_err(|e| parse_error(url, &text, e.line, e.column, &e.message))?;

        let dynamic_deps = scanned.specifiers(ImportKind::Dynamic);
        let analysis = if mode == AnalyzeMode::CommonJs {
            let mut deps = scanned.specifiers(ImportKind::Require);
            for dep in scanned.specifiers(ImportKind::Static) {
                push_unique(&mut deps, &dep);
            }
            SourceAnalysis {
                format: ModuleFormat::CommonJs,
                deps,
                dynamic_deps,
                cjs_lazy_deps: Some(scanned.specifiers(ImportKind::LazyRequire)),
                has_module_syntax: scanned.has_module_syntax,
            }
        } else {
            SourceAnalysis {
                format: if typescript {
                    ModuleFormat::TypeScript
                } else {
                    ModuleFormat::Esm
                },
                deps: scanned.specifiers(ImportKind::Static),
                dynamic_deps,
                cjs_lazy_deps: None,
                has_module_syntax: scanned.has_module_syntax,
            }
        };

        Ok(analysis)
    }
}
