//! Lexical module scanner.
//!
//! Finds import, re-export, dynamic import and `require` specifiers without
//! building a syntax tree. Strings, template literals, comments and regular
//! expression literals are skipped, so keywords inside them are ignored.
//! Brace nesting is tracked well enough to tell top-level `require` calls
//! from ones inside function bodies.

/// How a specifier was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import ... from 'x'`, `import 'x'`, `export ... from 'x'`.
    Static,
    /// `import('x')`.
    Dynamic,
    /// `require('x')` outside any function body.
    Require,
    /// `require('x')` inside a function body.
    LazyRequire,
}

/// A specifier found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImport {
    pub specifier: String,
    pub kind: ImportKind,
    /// Line number, 1-indexed.
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub imports: Vec<ModuleImport>,
    /// `import`/`export` statements or `import.meta` were seen.
    pub has_module_syntax: bool,
}

impl ScanResult {
    /// Specifiers of one kind, deduplicated in first-appearance order.
    #[must_use]
    pub fn specifiers(&self, kind: ImportKind) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for import in self.imports.iter().filter(|i| i.kind == kind) {
            if !out.contains(&import.specifier) {
                out.push(import.specifier.clone());
            }
        }
        out
    }
}

/// A lexing failure with its 1-indexed position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Source dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Skip type-only imports and exports.
    pub typescript: bool,
    /// Quotes in JSX text may run to the end of the line.
    pub jsx: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prev {
    Start,
    Punct(char),
    Word(String),
    CloseParen,
    Arrow,
    Value,
}

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "with"];

const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

struct Scanner {
    chars: Vec<char>,
    i: usize,
    line: u32,
    options: ScanOptions,
    out: ScanResult,
    prev: Prev,
    /// One entry per open `{`: whether it opened a function body.
    braces: Vec<bool>,
    function_depth: usize,
    /// Word preceding each open `(`.
    parens: Vec<Option<String>>,
    last_paren_word: Option<String>,
    /// Brace depth at which each open template `${` started.
    templates: Vec<usize>,
}

/// Scan module source for specifiers.
///
/// # Errors
/// Returns an error for unterminated strings, templates, comments and
/// regular expressions.
pub fn scan_module(source: &str, options: ScanOptions) -> Result<ScanResult, ScanError> {
    let mut scanner = Scanner {
        chars: source.chars().collect(),
        i: 0,
        line: 1,
        options,
        out: ScanResult::default(),
        prev: Prev::Start,
        braces: Vec::new(),
        function_depth: 0,
        parens: Vec::new(),
        last_paren_word: None,
        templates: Vec::new(),
    };
    scanner.run()?;
    Ok(scanner.out)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl Scanner {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn error(&self, message: &str, at: usize) -> ScanError {
        let at = at.min(self.chars.len());
        let mut line = 1;
        let mut line_start = 0;
        for (idx, &c) in self.chars[..at].iter().enumerate() {
            if c == '\n' {
                line += 1;
                line_start = idx + 1;
            }
        }
        ScanError {
            message: message.to_string(),
            line,
            column: at - line_start + 1,
        }
    }

    fn push(&mut self, specifier: String, kind: ImportKind, line: u32) {
        self.out.imports.push(ModuleImport {
            specifier,
            kind,
            line,
        });
    }

    fn run(&mut self) -> Result<(), ScanError> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.line += 1;
                    self.i += 1;
                }
                c if c.is_whitespace() => self.i += 1,
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment()?,
                '/' if self.regex_allowed() => {
                    self.skip_regex()?;
                    self.prev = Prev::Value;
                }
                '\'' | '"' => {
                    self.read_string()?;
                    self.prev = Prev::Value;
                }
                '`' => {
                    self.i += 1;
                    self.skip_template_chunk()?;
                }
                '{' => {
                    let is_function = match &self.prev {
                        Prev::Arrow => true,
                        Prev::CloseParen => self
                            .last_paren_word
                            .as_deref()
                            .map_or(true, |w| !CONTROL_KEYWORDS.contains(&w)),
                        _ => false,
                    };
                    self.braces.push(is_function);
                    if is_function {
                        self.function_depth += 1;
                    }
                    self.prev = Prev::Punct('{');
                    self.i += 1;
                }
                '}' => {
                    self.i += 1;
                    if self.templates.last() == Some(&self.braces.len()) {
                        self.templates.pop();
                        self.skip_template_chunk()?;
                        continue;
                    }
                    if self.braces.pop() == Some(true) {
                        self.function_depth -= 1;
                    }
                    self.prev = Prev::Punct('}');
                }
                '(' => {
                    let word = match &self.prev {
                        Prev::Word(w) => Some(w.clone()),
                        _ => None,
                    };
                    self.parens.push(word);
                    self.prev = Prev::Punct('(');
                    self.i += 1;
                }
                ')' => {
                    self.last_paren_word = self.parens.pop().flatten();
                    self.prev = Prev::CloseParen;
                    self.i += 1;
                }
                '=' if self.peek(1) == Some('>') => {
                    self.prev = Prev::Arrow;
                    self.i += 2;
                }
                c if is_ident_start(c) => self.word()?,
                c if c.is_ascii_digit() => {
                    while self
                        .peek(0)
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
                    {
                        self.i += 1;
                    }
                    self.prev = Prev::Value;
                }
                c => {
                    self.prev = Prev::Punct(c);
                    self.i += 1;
                }
            }
        }

        if !self.templates.is_empty() {
            return Err(self.error("Unterminated template literal", self.chars.len()));
        }
        Ok(())
    }

    fn regex_allowed(&self) -> bool {
        match &self.prev {
            Prev::Start | Prev::Arrow => true,
            Prev::Punct(c) => !matches!(c, ')' | ']'),
            Prev::Word(w) => REGEX_PREFIX_KEYWORDS.contains(&w.as_str()),
            Prev::CloseParen | Prev::Value => false,
        }
    }

    fn after_dot(&self) -> bool {
        self.prev == Prev::Punct('.')
    }

    fn read_word(&mut self) -> String {
        let start = self.i;
        while self.peek(0).is_some_and(is_ident_char) {
            self.i += 1;
        }
        self.chars[start..self.i].iter().collect()
    }

    fn word(&mut self) -> Result<(), ScanError> {
        let word = self.read_word();
        if !self.after_dot() {
            let handled = match word.as_str() {
                "import" => self.import()?,
                "export" => self.export()?,
                "require" => self.require()?,
                _ => false,
            };
            if handled {
                return Ok(());
            }
        }
        self.prev = Prev::Word(word);
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.i += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ScanError> {
        let start = self.i;
        self.i += 2;
        loop {
            match self.peek(0) {
                None => return Err(self.error("Unterminated comment", start)),
                Some('*') if self.peek(1) == Some('/') => {
                    self.i += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.i += 1;
                }
                Some(_) => self.i += 1,
            }
        }
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), ScanError> {
        loop {
            match self.peek(0) {
                Some('\n') => {
                    self.line += 1;
                    self.i += 1;
                }
                Some(c) if c.is_whitespace() => self.i += 1,
                Some('/') if self.peek(1) == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek(1) == Some('*') => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_regex(&mut self) -> Result<(), ScanError> {
        let start = self.i;
        self.i += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    return Err(self.error("Unterminated regular expression", start))
                }
                Some('\\') => self.i += 2,
                Some('[') => {
                    in_class = true;
                    self.i += 1;
                }
                Some(']') => {
                    in_class = false;
                    self.i += 1;
                }
                Some('/') if !in_class => {
                    self.i += 1;
                    break;
                }
                Some(_) => self.i += 1,
            }
        }
        while self.peek(0).is_some_and(is_ident_char) {
            self.i += 1;
        }
        Ok(())
    }

    /// Read a quoted string starting at the opening quote, returning its
    /// content with escapes resolved.
    fn read_string(&mut self) -> Result<String, ScanError> {
        let start = self.i;
        let Some(quote) = self.peek(0) else {
            return Err(self.error("Expected string", start));
        };
        self.i += 1;
        let mut value = String::new();
        loop {
            match self.peek(0) {
                None => return Err(self.error("Unterminated string constant", start)),
                Some('\n') if self.options.jsx => return Ok(value),
                Some('\n') => return Err(self.error("Unterminated string constant", start)),
                Some('\\') => {
                    if let Some(escaped) = self.peek(1) {
                        if escaped == '\n' {
                            self.line += 1;
                        } else {
                            value.push(escaped);
                        }
                    }
                    self.i += 2;
                }
                Some(c) if c == quote => {
                    self.i += 1;
                    return Ok(value);
                }
                Some(c) => {
                    value.push(c);
                    self.i += 1;
                }
            }
        }
    }

    /// Skip template text up to the closing backtick or the next `${`.
    fn skip_template_chunk(&mut self) -> Result<(), ScanError> {
        let start = self.i;
        loop {
            match self.peek(0) {
                None => return Err(self.error("Unterminated template literal", start)),
                Some('\\') => self.i += 2,
                Some('`') => {
                    self.i += 1;
                    self.prev = Prev::Value;
                    return Ok(());
                }
                Some('$') if self.peek(1) == Some('{') => {
                    self.i += 2;
                    self.templates.push(self.braces.len());
                    self.prev = Prev::Punct('{');
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.i += 1;
                }
                Some(_) => self.i += 1,
            }
        }
    }

    /// Read a literal module specifier: a quoted string, or a template whose
    /// expressions become `*`.
    fn read_specifier_literal(&mut self) -> Result<Option<String>, ScanError> {
        match self.peek(0) {
            Some('\'' | '"') => self.read_string().map(Some),
            Some('`') => {
                let start = self.i;
                self.i += 1;
                let mut value = String::new();
                loop {
                    match self.peek(0) {
                        None => return Err(self.error("Unterminated template literal", start)),
                        Some('`') => {
                            self.i += 1;
                            return Ok(Some(value));
                        }
                        Some('\\') => {
                            if let Some(escaped) = self.peek(1) {
                                value.push(escaped);
                            }
                            self.i += 2;
                        }
                        Some('$') if self.peek(1) == Some('{') => {
                            self.i += 2;
                            let mut depth = 1;
                            while depth > 0 {
                                match self.peek(0) {
                                    None => {
                                        return Err(
                                            self.error("Unterminated template literal", start)
                                        )
                                    }
                                    Some('{') => depth += 1,
                                    Some('}') => depth -= 1,
                                    Some('\n') => self.line += 1,
                                    Some(_) => {}
                                }
                                self.i += 1;
                            }
                            value.push('*');
                        }
                        Some(c) => {
                            if c == '\n' {
                                self.line += 1;
                            }
                            value.push(c);
                            self.i += 1;
                        }
                    }
                }
            }
            _ => Ok(None),
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<bool, ScanError> {
        self.skip_trivia()?;
        let start = self.i;
        if !self.peek(0).is_some_and(is_ident_start) {
            return Ok(false);
        }
        let word = self.read_word();
        if word == expected {
            Ok(true)
        } else {
            self.i = start;
            Ok(false)
        }
    }

    /// Skip a `{ ... }` binding list.
    fn skip_braced(&mut self) -> Result<bool, ScanError> {
        self.i += 1;
        loop {
            self.skip_trivia()?;
            match self.peek(0) {
                None => return Ok(false),
                Some('}') => {
                    self.i += 1;
                    return Ok(true);
                }
                Some('\'' | '"') => {
                    self.read_string()?;
                }
                Some(_) => self.i += 1,
            }
        }
    }

    /// `from 'x'`, returning the specifier.
    fn from_clause(&mut self) -> Result<Option<String>, ScanError> {
        if !self.expect_word("from")? {
            return Ok(None);
        }
        self.skip_trivia()?;
        if matches!(self.peek(0), Some('\'' | '"')) {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Handle `import` just read. Returns false to treat it as a plain word.
    fn import(&mut self) -> Result<bool, ScanError> {
        let after_word = self.i;
        let line = self.line;
        self.skip_trivia()?;

        match self.peek(0) {
            Some('(') => {
                self.parens.push(Some("import".to_string()));
                self.i += 1;
                self.prev = Prev::Punct('(');
                let after_paren = self.i;
                let saved_line = self.line;
                self.skip_trivia()?;
                if let Some(specifier) = self.read_specifier_literal()? {
                    self.skip_trivia()?;
                    if matches!(self.peek(0), Some(')' | ',')) {
                        self.push(specifier, ImportKind::Dynamic, line);
                        self.prev = Prev::Value;
                        return Ok(true);
                    }
                }
                self.i = after_paren;
                self.line = saved_line;
                Ok(true)
            }
            Some('.') => {
                self.out.has_module_syntax = true;
                self.i = after_word;
                self.line = line;
                Ok(false)
            }
            Some('\'' | '"') => {
                let specifier = self.read_string()?;
                self.out.has_module_syntax = true;
                self.push(specifier, ImportKind::Static, line);
                self.prev = Prev::Punct(';');
                Ok(true)
            }
            Some('{' | '*') => self.import_clause(after_word, line, false),
            Some(c) if is_ident_start(c) => {
                let ident_start = self.i;
                let ident = self.read_word();
                if self.options.typescript && ident == "type" {
                    self.skip_trivia()?;
                    let type_only = match self.peek(0) {
                        Some('{' | '*') => true,
                        Some(c) if is_ident_start(c) => {
                            let save = self.i;
                            let next = self.read_word();
                            self.i = save;
                            next != "from"
                        }
                        _ => false,
                    };
                    if type_only {
                        return self.import_clause(after_word, line, true);
                    }
                }
                self.i = ident_start;
                self.import_clause(after_word, line, false)
            }
            _ => {
                self.i = after_word;
                self.line = line;
                Ok(false)
            }
        }
    }

    fn import_clause(
        &mut self,
        after_word: usize,
        line: u32,
        type_only: bool,
    ) -> Result<bool, ScanError> {
        let restore = |s: &mut Self| {
            s.i = after_word;
            s.line = line;
        };

        loop {
            self.skip_trivia()?;
            match self.peek(0) {
                Some('{') => {
                    if !self.skip_braced()? {
                        restore(self);
                        return Ok(false);
                    }
                }
                Some('*') => {
                    self.i += 1;
                    if !self.expect_word("as")? {
                        restore(self);
                        return Ok(false);
                    }
                    self.skip_trivia()?;
                    self.read_word();
                }
                Some(c) if is_ident_start(c) => {
                    self.read_word();
                    self.skip_trivia()?;
                    if self.peek(0) == Some('=') && self.peek(1) != Some('=') {
                        // `import x = require('y')`
                        self.i += 1;
                        if self.expect_word("require")? {
                            self.skip_trivia()?;
                            if self.peek(0) == Some('(') {
                                self.i += 1;
                                self.skip_trivia()?;
                                if let Some(specifier) = self.read_specifier_literal()? {
                                    self.out.has_module_syntax = true;
                                    if !type_only {
                                        self.push(specifier, ImportKind::Static, line);
                                    }
                                    self.prev = Prev::Value;
                                    return Ok(true);
                                }
                            }
                        }
                        restore(self);
                        return Ok(false);
                    }
                }
                _ => {
                    restore(self);
                    return Ok(false);
                }
            }

            self.skip_trivia()?;
            if self.peek(0) == Some(',') {
                self.i += 1;
                continue;
            }
            break;
        }

        match self.from_clause()? {
            Some(specifier) => {
                self.out.has_module_syntax = true;
                if !type_only {
                    self.push(specifier, ImportKind::Static, line);
                }
                self.prev = Prev::Punct(';');
                Ok(true)
            }
            None => {
                restore(self);
                Ok(false)
            }
        }
    }

    fn export(&mut self) -> Result<bool, ScanError> {
        let after_word = self.i;
        let line = self.line;
        self.out.has_module_syntax = true;
        self.skip_trivia()?;

        let mut type_only = false;
        if self.options.typescript && self.peek(0) == Some('t') {
            let save = self.i;
            if self.read_word() == "type" {
                self.skip_trivia()?;
                if matches!(self.peek(0), Some('{' | '*')) {
                    type_only = true;
                } else {
                    self.i = save;
                }
            } else {
                self.i = save;
            }
        }

        let reexport = match self.peek(0) {
            Some('*') => {
                self.i += 1;
                if self.expect_word("as")? {
                    self.skip_trivia()?;
                    if matches!(self.peek(0), Some('\'' | '"')) {
                        self.read_string()?;
                    } else {
                        self.read_word();
                    }
                }
                true
            }
            Some('{') => self.skip_braced()?,
            _ => false,
        };

        if reexport {
            let before_from = self.i;
            let before_line = self.line;
            if let Some(specifier) = self.from_clause()? {
                if !type_only {
                    self.push(specifier, ImportKind::Static, line);
                }
                self.prev = Prev::Punct(';');
                return Ok(true);
            }
            // A local `export { a, b }`.
            self.i = before_from;
            self.line = before_line;
            self.prev = Prev::Punct('}');
            return Ok(true);
        }

        self.i = after_word;
        self.line = line;
        self.prev = Prev::Word("export".to_string());
        Ok(true)
    }

    fn require(&mut self) -> Result<bool, ScanError> {
        let after_word = self.i;
        let line = self.line;
        self.skip_trivia()?;
        if self.peek(0) != Some('(') {
            self.i = after_word;
            self.line = line;
            return Ok(false);
        }
        self.i += 1;
        self.skip_trivia()?;

        let literal = match self.peek(0) {
            Some('\'' | '"') => Some(self.read_string()?),
            _ => None,
        };
        if let Some(specifier) = literal {
            self.skip_trivia()?;
            if self.peek(0) == Some(')') {
                self.i += 1;
                let kind = if self.function_depth > 0 {
                    ImportKind::LazyRequire
                } else {
                    ImportKind::Require
                };
                self.push(specifier, kind, line);
                self.last_paren_word = Some("require".to_string());
                self.prev = Prev::CloseParen;
                return Ok(true);
            }
        }

        self.i = after_word;
        self.line = line;
        Ok(false)
    }
}
