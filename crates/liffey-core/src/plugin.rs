//! Plugin system for the dev server.
//!
//! A project supplies an ordered list of plugins; each plugin implements
//! whichever capability hooks it cares about and leaves the rest on their
//! default "not handled" implementations. The [`PluginContainer`] runs the
//! hooks with the contract the pipeline depends on: `resolve_id` and `load`
//! are first-match-wins, `transform` runs every implementing plugin in
//! registration order and chains their output.
//!
//! ## Example
//!
//! ```ignore
//! struct TxtPlugin;
//!
//! impl Plugin for TxtPlugin {
//!     fn name(&self) -> &str { "txt" }
//!
//!     fn transform(&self, code: &str, id: &str, _ctx: &PluginContext)
//!         -> HookResult<Option<TransformResult>>
//!     {
//!         if id.ends_with(".txt") {
//!             return Ok(Some(TransformResult::code(format!("export default {code:?};"))));
//!         }
//!         Ok(None)
//!     }
//! }
//! ```

use crate::scan::ModuleKind;
use crate::sourcemap::PositionMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin hook.
#[derive(Debug, Clone)]
pub struct PluginError {
    /// Plugin that failed.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
    /// Source position (line, column), when the hook can attribute one.
    pub pos: Option<(u32, u32)>,
}

impl PluginError {
    /// Create a new hook error.
    #[must_use]
    pub fn new(plugin: impl Into<String>, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            hook,
            message: message.into(),
            pos: None,
        }
    }

    /// Attach a source position.
    #[must_use]
    pub fn with_pos(mut self, line: u32, column: u32) -> Self {
        self.pos = Some((line, column));
        self
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)?;
        if let Some((line, column)) = self.pos {
            write!(f, " at {line}:{column}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PluginError {}

/// Context passed to plugin hooks.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Project root directory.
    pub root: PathBuf,
}

/// Result of a `load` hook.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Module source code.
    pub code: String,
    /// Optional position map supplied with the source.
    pub map: Option<PositionMap>,
}

impl LoadResult {
    /// Create a load result with code only.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// Result of a `transform` hook, and the shape cached per module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    /// Transformed code.
    pub code: String,
    /// Position map back to the code the hook received.
    pub map: Option<PositionMap>,
}

impl TransformResult {
    /// Create a transform result with code only.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// Context for hot-update hooks, passed per changed file.
#[derive(Debug, Clone)]
pub struct HotUpdateContext {
    /// The file that changed (server URL form).
    pub file: String,
    /// Version stamp of the change event.
    pub timestamp: u64,
    /// Module URLs affected by the change.
    pub modules: Vec<String>,
}

/// A plugin's verdict on a hot update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotUpdateDecision {
    /// Let the engine compute the update scope as usual.
    #[default]
    Continue,
    /// Force a full page reload for this change event.
    FullReload,
}

/// Dev-server handle passed to `configure_server`, letting plugins register
/// middleware that runs before the internal module handler.
pub struct ServerContext {
    /// Project root.
    pub root: PathBuf,
    /// Registered middleware, in registration order.
    pub middlewares: Vec<ServerMiddleware>,
}

impl ServerContext {
    /// Create a server context for `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            middlewares: Vec::new(),
        }
    }
}

/// A middleware registered by a plugin: gets the request path and returns a
/// response to short-circuit with, or `None` to pass through.
pub struct ServerMiddleware {
    /// Name for debugging.
    pub name: String,
    /// The handler.
    pub handler: Arc<dyn Fn(&str) -> Option<MiddlewareResponse> + Send + Sync>,
}

/// Response produced by a middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header.
    pub content_type: String,
    /// Response body.
    pub body: String,
}

/// The plugin capability interface. Every member is optional: the default
/// implementations report "not handled" and the container skips over them.
pub trait Plugin: Send + Sync {
    /// Plugin name, used in error messages.
    fn name(&self) -> &str;

    /// Resolve a module specifier to an id.
    ///
    /// Return `Some(id)` to claim the resolution; `None` lets the next
    /// plugin or the default filesystem resolver handle it.
    fn resolve_id(
        &self,
        _specifier: &str,
        _importer: Option<&str>,
        _ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Supply source for a module id.
    ///
    /// Return `Some(result)` to claim the load; `None` lets the next plugin
    /// or the default disk loader handle it.
    fn load(&self, _id: &str, _ctx: &PluginContext) -> HookResult<Option<LoadResult>> {
        Ok(None)
    }

    /// Transform module source.
    ///
    /// All implementing plugins run in sequence, each receiving the
    /// previous output. Return `None` to pass the code through unchanged.
    fn transform(
        &self,
        _code: &str,
        _id: &str,
        _ctx: &PluginContext,
    ) -> HookResult<Option<TransformResult>> {
        Ok(None)
    }

    /// Configure the dev server at startup (register middleware).
    fn configure_server(&self, _server: &mut ServerContext) -> HookResult<()> {
        Ok(())
    }

    /// Inspect a hot update before the engine computes its scope.
    fn handle_update(&self, _ctx: &HotUpdateContext) -> HookResult<HotUpdateDecision> {
        Ok(HotUpdateDecision::Continue)
    }
}

/// An ordered plugin list with the pipeline's dispatch rules.
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
    ctx: PluginContext,
}

impl PluginContainer {
    /// Create an empty container rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            plugins: Vec::new(),
            ctx: PluginContext { root },
        }
    }

    /// Add a plugin. Hooks run in registration order.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Whether any plugins are registered.
    #[must_use]
    pub fn has_plugins(&self) -> bool {
        !self.plugins.is_empty()
    }

    /// Resolve a specifier through the plugins; first `Some` wins and the
    /// remaining plugins are never consulted.
    pub fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> HookResult<Option<String>> {
        for plugin in &self.plugins {
            if let Some(id) = plugin.resolve_id(specifier, importer, &self.ctx)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Load a module through the plugins; first `Some` wins.
    pub fn load(&self, id: &str) -> HookResult<Option<LoadResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.load(id, &self.ctx)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// Transform code through every implementing plugin in order, chaining
    /// code and composing position maps so the final map still points at
    /// the input coordinate space.
    ///
    /// Returns `None` when the final code is identical to the input: no
    /// transform occurred, and the caller may fall back to serving the
    /// content some other way.
    pub fn transform(&self, code: &str, id: &str) -> HookResult<Option<TransformResult>> {
        let mut current = code.to_string();
        let mut map: Option<PositionMap> = None;

        for plugin in &self.plugins {
            if let Some(result) = plugin.transform(&current, id, &self.ctx)? {
                current = result.code;
                map = match (result.map, map) {
                    (Some(next), Some(prev)) => Some(next.compose(&prev)),
                    (Some(next), None) => Some(next),
                    (None, prev) => prev,
                };
            }
        }

        if current == code {
            Ok(None)
        } else {
            Ok(Some(TransformResult { code: current, map }))
        }
    }

    /// Run `configure_server` on every plugin.
    pub fn configure_server(&self, server: &mut ServerContext) -> HookResult<()> {
        for plugin in &self.plugins {
            plugin.configure_server(server)?;
        }
        Ok(())
    }

    /// Run `handle_update` on every plugin for one changed file. The first
    /// full-reload verdict short-circuits.
    pub fn handle_update(&self, ctx: &HotUpdateContext) -> HookResult<HotUpdateDecision> {
        for plugin in &self.plugins {
            if plugin.handle_update(ctx)? == HotUpdateDecision::FullReload {
                return Ok(HotUpdateDecision::FullReload);
            }
        }
        Ok(HotUpdateDecision::Continue)
    }
}

// ============================================================================
// Built-in plugins
// ============================================================================

/// Serves `.json` modules as ES modules with a default export.
pub struct JsonPlugin;

impl Plugin for JsonPlugin {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        _ctx: &PluginContext,
    ) -> HookResult<Option<TransformResult>> {
        if ModuleKind::from_path(id) != ModuleKind::Json {
            return Ok(None);
        }
        Ok(Some(TransformResult::code(format!(
            "export default {};",
            code.trim()
        ))))
    }
}

/// Serves stylesheets as JS modules that inject a `<style>` tag.
///
/// The emitted module self-accepts hot updates and removes its tag on
/// dispose, so a style edit swaps in place without reloading the page.
pub struct CssPlugin;

impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        "css"
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        _ctx: &PluginContext,
    ) -> HookResult<Option<TransformResult>> {
        if ModuleKind::from_path(id) != ModuleKind::Style {
            return Ok(None);
        }
        let escaped = code
            .replace('\\', "\\\\")
            .replace('`', "\\`")
            .replace("${", "\\${");
        let module = format!(
            r#"const css = `{escaped}`;
const style = document.createElement('style');
style.setAttribute('data-liffey-css', '');
style.textContent = css;
document.head.appendChild(style);

if (import.meta.hot) {{
  import.meta.hot.accept();
  import.meta.hot.dispose(() => {{
    style.remove();
  }});
}}

export default css;
"#
        );
        Ok(Some(TransformResult::code(module)))
    }
}
