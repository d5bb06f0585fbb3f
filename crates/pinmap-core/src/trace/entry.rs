use crate::analysis::ModuleFormat;
use crate::resolver::ModuleInfo;

/// One analyzed module in the trace graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub deps: Vec<String>,
    pub dynamic_deps: Vec<String>,
    pub cjs_lazy_deps: Vec<String>,
    pub format: ModuleFormat,
    pub size: usize,
    pub integrity: String,
    /// The CDN converted this module from CommonJS.
    pub was_cjs: bool,
}

impl TraceEntry {
    #[must_use]
    pub fn new(info: ModuleInfo, was_cjs: bool) -> Self {
        let analysis = info.analysis;
        Self {
            deps: analysis.deps,
            dynamic_deps: analysis.dynamic_deps,
            cjs_lazy_deps: analysis.cjs_lazy_deps.unwrap_or_default(),
            format: analysis.format,
            size: info.size,
            integrity: info.integrity,
            was_cjs,
        }
    }

    #[must_use]
    pub fn is_commonjs(&self) -> bool {
        self.format == ModuleFormat::CommonJs
    }

    /// Dependencies followed by a trace: static ones, plus dynamic and lazy
    /// `require` ones unless `static_only`.
    #[must_use]
    pub fn traced_deps(&self, static_only: bool) -> Vec<&str> {
        let mut deps: Vec<&str> = self.deps.iter().map(String::as_str).collect();
        if !static_only {
            deps.extend(self.dynamic_deps.iter().map(String::as_str));
            deps.extend(self.cjs_lazy_deps.iter().map(String::as_str));
        }
        deps
    }
}
