//! Import rewriting for unbundled serving.
//!
//! Browsers can only follow URL imports, so before a module is served its
//! specifiers are rewritten:
//! - bare specifiers (`react`) → the optimizer's pre-bundled artifact URL
//!   (`/@deps/react.js`)
//! - relative specifiers (`./App`) → root-absolute URLs with the real
//!   extension (`/src/App.tsx`), probing the filesystem for extension and
//!   index variants
//!
//! Runs as a transform hook so it sits in the same chained pipeline as
//! every other rewrite, after the content-producing plugins.

use crate::plugin::{HookResult, Plugin, PluginContext, TransformResult};
use crate::scan::{
    self, from_clause, is_export_from_line, is_static_import_line, leading_string,
    side_effect_clause, ModuleKind,
};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The pipeline's import-rewriting step.
pub struct ImportRewritePlugin {
    /// Project root; rewritten URLs are root-relative.
    root: PathBuf,
    /// Bare package name → artifact URL, from the dependency optimizer.
    dep_urls: FxHashMap<String, String>,
}

impl ImportRewritePlugin {
    /// Create a rewriter for `root` with the optimizer's rewrite targets.
    #[must_use]
    pub fn new(root: PathBuf, dep_urls: FxHashMap<String, String>) -> Self {
        // Canonicalized so prefix-stripping agrees with canonicalized
        // module paths.
        let root = root.canonicalize().unwrap_or(root);
        Self { root, dep_urls }
    }

    fn rewrite_line(&self, line: &str, module_dir: &Path, changed: &mut bool) -> String {
        let trimmed = line.trim();

        if is_static_import_line(trimmed) || is_export_from_line(trimmed) {
            if let Some(span) = from_clause(line).or_else(|| side_effect_clause(line)) {
                let rewritten = self.rewrite_specifier(&span.specifier, module_dir);
                if rewritten != span.specifier {
                    *changed = true;
                }
                return format!(
                    "{}{}{}{}{}",
                    span.before, span.quote, rewritten, span.quote, span.after
                );
            }
        }

        if trimmed.contains("import(") {
            return self.rewrite_dynamic_imports(line, module_dir, changed);
        }

        line.to_string()
    }

    fn rewrite_dynamic_imports(&self, line: &str, module_dir: &Path, changed: &mut bool) -> String {
        let mut result = String::with_capacity(line.len());
        let mut remaining = line;

        while let Some(idx) = remaining.find("import(") {
            result.push_str(&remaining[..idx]);
            result.push_str("import(");
            let after = &remaining[idx + "import(".len()..];
            match leading_string(after) {
                Some((specifier, quote, rest)) => {
                    let rewritten = self.rewrite_specifier(&specifier, module_dir);
                    if rewritten != specifier {
                        *changed = true;
                    }
                    result.push(quote);
                    result.push_str(&rewritten);
                    result.push(quote);
                    remaining = rest;
                }
                None => remaining = after,
            }
        }

        result.push_str(remaining);
        result
    }

    fn rewrite_specifier(&self, specifier: &str, module_dir: &Path) -> String {
        // Virtual ids and already-rewritten URLs stay as they are.
        if specifier.starts_with('\0') || specifier.starts_with('/') {
            return specifier.to_string();
        }

        if specifier.starts_with("./") || specifier.starts_with("../") {
            return self.resolve_relative(specifier, module_dir);
        }

        if scan::is_bare_specifier(specifier) {
            let package = scan::package_name(specifier);
            if let Some(url) = self.dep_urls.get(&package) {
                return url.clone();
            }
            debug!(specifier, "bare import has no pre-bundled artifact");
        }

        specifier.to_string()
    }

    /// Resolve a relative specifier to a root-relative URL, probing for the
    /// real file: literal path first, then extension suffixes, then index
    /// files within a directory.
    fn resolve_relative(&self, specifier: &str, module_dir: &Path) -> String {
        let joined = module_dir.join(specifier);
        let absolute = joined.canonicalize().unwrap_or(joined);

        if let Some(found) = probe_module_path(&absolute) {
            if let Ok(relative) = found.strip_prefix(&self.root) {
                return format!("/{}", relative.display());
            }
        }

        // Outside the root or missing: keep the root-relative form of the
        // join so the 404 names the path that was looked for.
        match absolute.strip_prefix(&self.root) {
            Ok(relative) => format!("/{}", relative.display()),
            Err(_) => specifier.to_string(),
        }
    }
}

/// Extension suffixes tried when a specifier omits one.
const RESOLVE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"];

/// Index files tried when a specifier names a directory.
const INDEX_FILES: &[&str] = &["index.ts", "index.tsx", "index.js", "index.jsx"];

/// Find the file a module path denotes: the literal path, extension
/// variants, or an index file inside a directory.
#[must_use]
pub fn probe_module_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    for ext in RESOLVE_EXTENSIONS {
        let with_ext = PathBuf::from(format!("{}{}", path.display(), ext));
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    if path.is_dir() {
        for index in INDEX_FILES {
            let index_path = path.join(index);
            if index_path.is_file() {
                return Some(index_path);
            }
        }
    }
    None
}

impl Plugin for ImportRewritePlugin {
    fn name(&self) -> &str {
        "import-rewrite"
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        _ctx: &PluginContext,
    ) -> HookResult<Option<TransformResult>> {
        if ModuleKind::from_path(id) != ModuleKind::Script {
            return Ok(None);
        }

        let module_dir = Path::new(id).parent().unwrap_or(Path::new("/")).to_path_buf();
        let mut changed = false;
        let mut result = String::with_capacity(code.len());

        for line in code.lines() {
            result.push_str(&self.rewrite_line(line, &module_dir, &mut changed));
            result.push('\n');
        }
        if !code.ends_with('\n') && result.ends_with('\n') {
            result.pop();
        }

        if changed {
            Ok(Some(TransformResult::code(result)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn plugin_with_deps(root: &Path, deps: &[(&str, &str)]) -> ImportRewritePlugin {
        let dep_urls = deps
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ImportRewritePlugin::new(root.to_path_buf(), dep_urls)
    }

    fn transform(plugin: &ImportRewritePlugin, code: &str, id: &str) -> Option<String> {
        plugin
            .transform(code, id, &PluginContext::default())
            .unwrap()
            .map(|r| r.code)
    }

    #[test]
    fn test_rewrites_bare_specifier_to_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let plugin = plugin_with_deps(temp.path(), &[("react", "/@deps/react.js")]);

        let code = "import React from 'react';\nimport { act } from \"react\";";
        let out = transform(&plugin, code, "/project/src/main.tsx").unwrap();
        assert!(out.contains("from '/@deps/react.js'"));
        assert!(out.contains("from \"/@deps/react.js\""));
    }

    #[test]
    fn test_rewrites_subpath_import_by_package() {
        let temp = tempfile::tempdir().unwrap();
        let plugin = plugin_with_deps(temp.path(), &[("@scope/pkg", "/@deps/scope__pkg.js")]);

        let out = transform(
            &plugin,
            "import util from '@scope/pkg/util';",
            "/project/src/main.tsx",
        )
        .unwrap();
        assert!(out.contains("/@deps/scope__pkg.js"));
    }

    #[test]
    fn test_rewrites_relative_with_extension_probe() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("App.tsx"), "export default 1;").unwrap();
        fs::write(src.join("main.tsx"), "").unwrap();

        let plugin = plugin_with_deps(temp.path(), &[]);
        let id = src.join("main.tsx").display().to_string();
        let out = transform(&plugin, "import App from './App';", &id).unwrap();
        assert!(out.contains("from '/src/App.tsx'"), "got: {out}");
    }

    #[test]
    fn test_rewrites_directory_to_index() {
        let temp = tempfile::tempdir().unwrap();
        let components = temp.path().join("src").join("components");
        fs::create_dir_all(&components).unwrap();
        fs::write(components.join("index.ts"), "export {};").unwrap();
        fs::write(temp.path().join("src").join("main.ts"), "").unwrap();

        let plugin = plugin_with_deps(temp.path(), &[]);
        let id = temp.path().join("src").join("main.ts").display().to_string();
        let out = transform(&plugin, "import * as c from './components';", &id).unwrap();
        assert!(out.contains("/src/components/index.ts"), "got: {out}");
    }

    #[test]
    fn test_dynamic_import_rewritten() {
        let temp = tempfile::tempdir().unwrap();
        let plugin = plugin_with_deps(temp.path(), &[("lodash", "/@deps/lodash.js")]);

        let out = transform(
            &plugin,
            "const mod = import('lodash');",
            "/project/src/main.tsx",
        )
        .unwrap();
        assert!(out.contains("import('/@deps/lodash.js')"));
    }

    #[test]
    fn test_already_rewritten_passes_through() {
        let temp = tempfile::tempdir().unwrap();
        let plugin = plugin_with_deps(temp.path(), &[("react", "/@deps/react.js")]);

        let code = "import React from '/@deps/react.js';";
        assert!(transform(&plugin, code, "/project/src/main.tsx").is_none());
    }

    #[test]
    fn test_non_script_ids_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let plugin = plugin_with_deps(temp.path(), &[("react", "/@deps/react.js")]);
        assert!(transform(&plugin, "import 'react';", "/src/app.css").is_none());
    }
}
