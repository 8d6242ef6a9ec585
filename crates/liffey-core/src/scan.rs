//! Import specifier scanning.
//!
//! Line-based scanning of JavaScript/TypeScript source for import and
//! export specifiers, without full parsing. Used by the orchestrator to
//! refresh graph edges after a transform, by the import rewriter to locate
//! specifiers to rewrite, and by the dependency optimizer to collect bare
//! package references.
//!
//! Best-effort by design: a specifier inside a multi-line string can be a
//! false positive. For dev serving the worst outcome is an extra graph edge
//! or an attempted hot update that falls back to a reload.

use std::collections::HashSet;

/// Kind of module a URL or file path denotes, by suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// JavaScript/TypeScript source served as an ES module.
    Script,
    /// Stylesheet, served as a JS injection module and hot-swapped in place.
    Style,
    /// JSON, served as a default-export ES module.
    Json,
    /// Anything else (assets, HTML, unknown).
    Other,
}

impl ModuleKind {
    /// Classify a URL or file path.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let clean = path.split(['?', '#']).next().unwrap_or(path);
        let ext = clean.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "mts" | "cts" => Self::Script,
            "css" | "scss" | "sass" | "less" => Self::Style,
            "json" => Self::Json,
            _ => Self::Other,
        }
    }

    /// Content-Type to serve this kind of module with.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            // Style and Json are served as JS modules after transform.
            Self::Script | Self::Style | Self::Json => "application/javascript",
            Self::Other => "application/octet-stream",
        }
    }
}

/// A specifier located within a single line, with enough context to
/// reconstruct the line around a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpecifierSpan {
    /// Line content before the opening quote.
    pub before: String,
    /// The specifier itself, unquoted.
    pub specifier: String,
    /// Line content after the closing quote.
    pub after: String,
    /// Quote character used.
    pub quote: char,
}

/// Check if a specifier is bare: neither relative, absolute, virtual, nor a
/// builtin/data scheme. Bare specifiers reference installed packages.
#[must_use]
pub fn is_bare_specifier(specifier: &str) -> bool {
    !specifier.starts_with('.')
        && !specifier.starts_with('/')
        && !specifier.starts_with('\0')
        && !specifier.starts_with("node:")
        && !specifier.starts_with("data:")
}

/// Package name of a bare specifier, handling scopes and subpaths.
///
/// `react/jsx-runtime` → `react`, `@scope/pkg/util` → `@scope/pkg`.
#[must_use]
pub fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{scope}/{name}"),
            None => specifier.to_string(),
        },
        Some(name) => name.to_string(),
        None => specifier.to_string(),
    }
}

/// Extract every import/export specifier from source code, in first
/// appearance order, deduplicated.
///
/// Covers static imports, side-effect imports, `export ... from`
/// re-exports, and dynamic `import(...)` calls with a literal argument.
#[must_use]
pub fn extract_import_specifiers(code: &str) -> Vec<String> {
    let mut specifiers = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |spec: String, out: &mut Vec<String>| {
        if !spec.is_empty() && seen.insert(spec.clone()) {
            out.push(spec);
        }
    };

    for line in code.lines() {
        let trimmed = line.trim();
        if is_comment_line(trimmed) {
            continue;
        }

        if is_static_import_line(trimmed) || is_export_from_line(trimmed) {
            if let Some(span) = from_clause(line) {
                push(span.specifier, &mut specifiers);
            } else if let Some(span) = side_effect_clause(line) {
                push(span.specifier, &mut specifiers);
            }
        }

        let mut rest = trimmed;
        while let Some(idx) = rest.find("import(") {
            let after = &rest[idx + "import(".len()..];
            match leading_string(after) {
                Some((spec, _, remainder)) => {
                    push(spec, &mut specifiers);
                    rest = remainder;
                }
                None => rest = after,
            }
        }
    }

    specifiers
}

/// Check whether code declares itself hot-self-accepting.
///
/// Scans for `.hot.accept(` where the first argument is not a dependency
/// list: `accept()`, `accept(cb)`, `accept(mod => ...)`. The string/array
/// forms declare dependency acceptance instead, see
/// [`accepted_dep_specifiers`].
#[must_use]
pub fn is_self_accepting(code: &str) -> bool {
    for line in code.lines() {
        let trimmed = line.trim();
        if is_comment_line(trimmed) {
            continue;
        }
        for pattern in ACCEPT_PATTERNS {
            let mut rest = trimmed;
            while let Some(idx) = rest.find(pattern) {
                let args = rest[idx + pattern.len()..].trim_start();
                if !args.starts_with('\'') && !args.starts_with('"') && !args.starts_with('[') {
                    return true;
                }
                rest = &rest[idx + pattern.len()..];
            }
        }
    }
    false
}

/// Collect the dependency specifiers a module declares it accepts hot
/// updates for: `accept('./dep', cb)` and `accept(['./a', './b'], cb)`.
#[must_use]
pub fn accepted_dep_specifiers(code: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut seen = HashSet::new();

    for line in code.lines() {
        let trimmed = line.trim();
        if is_comment_line(trimmed) {
            continue;
        }
        for pattern in ACCEPT_PATTERNS {
            let mut rest = trimmed;
            while let Some(idx) = rest.find(pattern) {
                let args = rest[idx + pattern.len()..].trim_start();
                if args.starts_with('\'') || args.starts_with('"') {
                    if let Some((spec, _, _)) = leading_string(args) {
                        if seen.insert(spec.clone()) {
                            deps.push(spec);
                        }
                    }
                } else if let Some(list) = args.strip_prefix('[') {
                    let mut inner = list;
                    while let Some((spec, _, remainder)) = leading_string(inner) {
                        if seen.insert(spec.clone()) {
                            deps.push(spec);
                        }
                        inner = remainder.trim_start().trim_start_matches(',').trim_start();
                        if inner.starts_with(']') {
                            break;
                        }
                    }
                }
                rest = &rest[idx + pattern.len()..];
            }
        }
    }

    deps
}

const ACCEPT_PATTERNS: &[&str] = &[".hot.accept(", ".hot?.accept("];

fn is_comment_line(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*")
}

pub(crate) fn is_static_import_line(trimmed: &str) -> bool {
    trimmed.starts_with("import ")
        && (trimmed.contains(" from ") || trimmed.contains('\'') || trimmed.contains('"'))
}

pub(crate) fn is_export_from_line(trimmed: &str) -> bool {
    trimmed.starts_with("export ") && trimmed.contains(" from ")
}

/// Locate the specifier of a `... from 'spec'` clause within a line.
pub(crate) fn from_clause(line: &str) -> Option<SpecifierSpan> {
    let from_idx = line.find(" from ")?;
    let after_from = line[from_idx + " from ".len()..].trim_start();
    let (specifier, quote, rest) = leading_string(after_from)?;
    Some(SpecifierSpan {
        before: format!("{} from ", &line[..from_idx]),
        specifier,
        after: rest.to_string(),
        quote,
    })
}

/// Locate the specifier of a side-effect import: `import 'spec';`.
pub(crate) fn side_effect_clause(line: &str) -> Option<SpecifierSpan> {
    let trimmed = line.trim_start();
    let after_import = trimmed.strip_prefix("import ")?.trim_start();
    let (specifier, quote, rest) = leading_string(after_import)?;
    let leading_ws: String = line.chars().take_while(|c| c.is_whitespace()).collect();
    Some(SpecifierSpan {
        before: format!("{leading_ws}import "),
        specifier,
        after: rest.to_string(),
        quote,
    })
}

/// Read a quoted string literal from the start of `s` (ignoring leading
/// whitespace). Returns the contents, the quote used, and the remainder
/// after the closing quote.
pub(crate) fn leading_string(s: &str) -> Option<(String, char, &str)> {
    let trimmed = s.trim_start();
    let quote = trimmed.chars().next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let inner = &trimmed[1..];
    let end = inner.find(quote)?;
    Some((inner[..end].to_string(), quote, &inner[end + 1..]))
}
