//! Hot module replacement engine.
//!
//! Reacts to watcher events: invalidates the module graph, walks the
//! importer chain for hot-update boundaries, and produces the wire messages
//! broadcast to connected clients. When a precise update scope cannot be
//! determined the engine degrades to a full page reload: correctness over
//! precision.

use crate::graph::ModuleGraph;
use crate::plugin::{HotUpdateContext, HotUpdateDecision, PluginContainer};
use crate::scan::ModuleKind;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A message on the client channel.
///
/// The JSON shape is the wire contract: `{"type": "connected"}`,
/// `{"type": "update", "updates": [...]}`, `{"type": "full-reload"}`,
/// `{"type": "error", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    /// Sent once when a client attaches.
    Connected,
    /// Partial update: only the listed modules re-execute.
    Update { updates: Vec<HotUpdate> },
    /// The page must reload completely.
    FullReload,
    /// A transform failed; clients render it without needing a reload.
    Error { message: String },
}

/// One module update within an `update` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotUpdate {
    #[serde(rename = "type")]
    pub kind: HotUpdateKind,
    /// URL of the boundary module to re-import.
    pub path: String,
    /// Version stamp for the cache-busting query.
    pub timestamp: u64,
}

/// Update classification, by the boundary module's file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotUpdateKind {
    CodeUpdate,
    StyleUpdate,
}

impl HotUpdateKind {
    fn for_path(path: &str) -> Self {
        if ModuleKind::from_path(path) == ModuleKind::Style {
            Self::StyleUpdate
        } else {
            Self::CodeUpdate
        }
    }
}

/// Computes the update scope for file events.
pub struct HmrEngine {
    graph: Arc<ModuleGraph>,
    plugins: Arc<PluginContainer>,
}

impl HmrEngine {
    /// Create an engine over the server's graph and plugin container.
    #[must_use]
    pub fn new(graph: Arc<ModuleGraph>, plugins: Arc<PluginContainer>) -> Self {
        Self { graph, plugins }
    }

    /// React to a changed file (URL form, e.g. `/src/app.ts`).
    ///
    /// Invalidates the graph, consults plugin `handle_update` hooks, and
    /// computes the minimal boundary set, or a full reload when none can be
    /// found.
    pub fn on_file_change(&self, file: &str) -> ChannelMessage {
        let affected = self.graph.on_file_change(file);
        if affected.is_empty() {
            // A file with no graph entry: its dependency shape is unknown.
            debug!(file, "change for unknown module, full reload");
            return ChannelMessage::FullReload;
        }

        let timestamp = affected
            .first()
            .and_then(|url| self.graph.get(url))
            .map_or(0, |node| node.last_update_timestamp);

        let ctx = HotUpdateContext {
            file: file.to_string(),
            timestamp,
            modules: affected.clone(),
        };
        match self.plugins.handle_update(&ctx) {
            Ok(HotUpdateDecision::Continue) => {}
            Ok(HotUpdateDecision::FullReload) => {
                debug!(file, "plugin requested full reload");
                return ChannelMessage::FullReload;
            }
            Err(err) => {
                warn!(file, error = %err, "handle_update hook failed, full reload");
                return ChannelMessage::FullReload;
            }
        }

        let mut boundaries: Vec<String> = Vec::new();
        let mut boundary_set = FxHashSet::default();
        for url in &affected {
            let mut visited = FxHashSet::default();
            visited.insert(url.clone());
            if self.propagate(url, &mut visited, &mut boundaries, &mut boundary_set) {
                debug!(file, module = %url, "no hot-update boundary, full reload");
                return ChannelMessage::FullReload;
            }
        }

        if boundaries.is_empty() {
            return ChannelMessage::FullReload;
        }

        let updates = boundaries
            .into_iter()
            .map(|path| HotUpdate {
                kind: HotUpdateKind::for_path(&path),
                timestamp,
                path,
            })
            .collect();
        ChannelMessage::Update { updates }
    }

    /// React to an added file. The graph cannot yet know who imports it, so
    /// the engine degrades to a full reload.
    pub fn on_file_add(&self, file: &str) -> ChannelMessage {
        debug!(file, "file added, full reload");
        self.graph.on_file_change(file);
        ChannelMessage::FullReload
    }

    /// React to a removed file. Importers now reference a missing module;
    /// the graph state for it is stale either way.
    pub fn on_file_remove(&self, file: &str) -> ChannelMessage {
        debug!(file, "file removed, full reload");
        self.graph.on_file_change(file);
        ChannelMessage::FullReload
    }

    /// React to a watcher failure: the application may be out of sync with
    /// disk, so force every client back to a consistent state.
    pub fn on_watch_error(&self, message: &str) -> ChannelMessage {
        error!(error = %message, "watcher failed, broadcasting full reload");
        ChannelMessage::FullReload
    }

    /// Walk up the importer chain from an invalidated module, collecting
    /// boundary modules. Returns `true` when a chain reaches a module with
    /// no importers and no boundary, where a full reload is the only safe
    /// answer.
    fn propagate(
        &self,
        url: &str,
        visited: &mut FxHashSet<String>,
        boundaries: &mut Vec<String>,
        boundary_set: &mut FxHashSet<String>,
    ) -> bool {
        let Some(node) = self.graph.get(url) else {
            return true;
        };

        if node.is_self_accepting {
            if boundary_set.insert(node.id.clone()) {
                boundaries.push(node.id);
            }
            return false;
        }

        if node.importers.is_empty() {
            return true;
        }

        for importer_id in &node.importers {
            let Some(importer) = self.graph.get(importer_id) else {
                return true;
            };
            if importer.accepted_hmr_deps.contains(url) {
                if boundary_set.insert(importer_id.clone()) {
                    boundaries.push(importer_id.clone());
                }
                continue;
            }
            if visited.insert(importer_id.clone())
                && self.propagate(importer_id, visited, boundaries, boundary_set)
            {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HookResult, Plugin, TransformResult};
    use std::path::PathBuf;

    fn engine_with(graph: Arc<ModuleGraph>) -> HmrEngine {
        let plugins = Arc::new(PluginContainer::new(PathBuf::from("/project")));
        HmrEngine::new(graph, plugins)
    }

    fn cached(graph: &ModuleGraph, url: &str) {
        graph.set_transform_result(url, TransformResult::code("code"));
    }

    #[test]
    fn test_unknown_file_yields_full_reload() {
        let graph = Arc::new(ModuleGraph::new());
        let engine = engine_with(graph);
        assert_eq!(
            engine.on_file_change("/src/new-file.ts"),
            ChannelMessage::FullReload
        );
    }

    #[test]
    fn test_self_accepting_style_yields_one_style_update() {
        let graph = Arc::new(ModuleGraph::new());
        graph.ensure_entry("/src/app.css");
        graph.mark_self_accepting("/src/app.css");
        cached(&graph, "/src/app.css");

        let engine = engine_with(graph);
        match engine.on_file_change("/src/app.css") {
            ChannelMessage::Update { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].kind, HotUpdateKind::StyleUpdate);
                assert_eq!(updates[0].path, "/src/app.css");
                assert!(updates[0].timestamp > 0);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_accepting_importer_is_the_boundary() {
        let graph = Arc::new(ModuleGraph::new());
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);
        graph.update_dependencies("/b.ts", &["/c.ts".to_string()]);
        graph.set_accepted_deps("/b.ts", &["/c.ts".to_string()]);
        for url in ["/a.ts", "/b.ts", "/c.ts"] {
            cached(&graph, url);
        }

        let engine = engine_with(graph.clone());
        match engine.on_file_change("/c.ts") {
            ChannelMessage::Update { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].path, "/b.ts");
                assert_eq!(updates[0].kind, HotUpdateKind::CodeUpdate);
            }
            other => panic!("expected update, got {other:?}"),
        }
        // The walk stopped at the boundary: the root importer stays cached.
        assert!(graph.get("/a.ts").unwrap().transform_result.is_some());
    }

    #[test]
    fn test_no_boundary_yields_full_reload() {
        let graph = Arc::new(ModuleGraph::new());
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);
        cached(&graph, "/a.ts");
        cached(&graph, "/b.ts");

        let engine = engine_with(graph);
        assert_eq!(engine.on_file_change("/b.ts"), ChannelMessage::FullReload);
    }

    #[test]
    fn test_import_cycle_terminates_with_full_reload() {
        let graph = Arc::new(ModuleGraph::new());
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);
        graph.update_dependencies("/b.ts", &["/a.ts".to_string()]);
        cached(&graph, "/a.ts");
        cached(&graph, "/b.ts");

        let engine = engine_with(graph);
        assert_eq!(engine.on_file_change("/a.ts"), ChannelMessage::FullReload);
    }

    #[test]
    fn test_added_file_yields_full_reload() {
        let graph = Arc::new(ModuleGraph::new());
        let engine = engine_with(graph);
        assert_eq!(
            engine.on_file_add("/src/brand-new.ts"),
            ChannelMessage::FullReload
        );
    }

    #[test]
    fn test_plugin_can_force_full_reload() {
        struct Reloader;
        impl Plugin for Reloader {
            fn name(&self) -> &str {
                "reloader"
            }
            fn handle_update(&self, _ctx: &HotUpdateContext) -> HookResult<HotUpdateDecision> {
                Ok(HotUpdateDecision::FullReload)
            }
        }

        let graph = Arc::new(ModuleGraph::new());
        graph.ensure_entry("/src/app.css");
        graph.mark_self_accepting("/src/app.css");

        let mut plugins = PluginContainer::new(PathBuf::from("/project"));
        plugins.add(Box::new(Reloader));
        let engine = HmrEngine::new(graph, Arc::new(plugins));

        assert_eq!(
            engine.on_file_change("/src/app.css"),
            ChannelMessage::FullReload
        );
    }

    #[test]
    fn test_wire_protocol_shape() {
        assert_eq!(
            serde_json::to_string(&ChannelMessage::Connected).unwrap(),
            r#"{"type":"connected"}"#
        );
        assert_eq!(
            serde_json::to_string(&ChannelMessage::FullReload).unwrap(),
            r#"{"type":"full-reload"}"#
        );
        assert_eq!(
            serde_json::to_string(&ChannelMessage::Error {
                message: "boom".to_string()
            })
            .unwrap(),
            r#"{"type":"error","message":"boom"}"#
        );
        let update = ChannelMessage::Update {
            updates: vec![HotUpdate {
                kind: HotUpdateKind::StyleUpdate,
                path: "/src/app.css".to_string(),
                timestamp: 123,
            }],
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"type":"update","updates":[{"type":"style-update","path":"/src/app.css","timestamp":123}]}"#
        );
    }
}
