//! Module graph for the dev server.
//!
//! Tracks module identity, dependency edges, hot-accept declarations, and
//! the cached transform result per module. Pure data structure: no I/O.
//!
//! Nodes are addressed by stable string keys (normalized URLs) and edges
//! are key-sets, so the graph owns every node unambiguously and cycles
//! need no reference-counted plumbing. Two indexes are kept: URL → node
//! and backing file → URLs (one file may back several URL variants).

use crate::plugin::TransformResult;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::RwLock;

/// Strip query and hash suffixes from a module URL.
///
/// Query tokens (`?t=123`) exist to bust client-side caches; the server
/// cache is keyed by the clean URL only.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or(url).to_string()
}

/// One module in the graph.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Normalized URL, the stable key.
    pub id: String,
    /// Backing filesystem path, if any.
    pub file: Option<String>,
    /// Modules that import this one (back-references by key).
    pub importers: FxHashSet<String>,
    /// Modules this one imports.
    pub imported_modules: FxHashSet<String>,
    /// Subset of `imported_modules` this module hot-swaps without a reload.
    pub accepted_hmr_deps: FxHashSet<String>,
    /// Whether the module replaces itself in place on update.
    pub is_self_accepting: bool,
    /// Cached transform output; `None` means "needs (re)transform".
    pub transform_result: Option<TransformResult>,
    /// Version stamp for client-side cache busting.
    pub last_update_timestamp: u64,
}

impl ModuleNode {
    fn new(id: String, file: Option<String>) -> Self {
        Self {
            id,
            file,
            importers: FxHashSet::default(),
            imported_modules: FxHashSet::default(),
            accepted_hmr_deps: FxHashSet::default(),
            is_self_accepting: false,
            transform_result: None,
            last_update_timestamp: 0,
        }
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    url_to_node: FxHashMap<String, ModuleNode>,
    file_to_urls: FxHashMap<String, FxHashSet<String>>,
}

impl GraphInner {
    fn ensure(&mut self, url: &str, file: Option<&str>) {
        if self.url_to_node.contains_key(url) {
            return;
        }
        let node = ModuleNode::new(url.to_string(), file.map(ToString::to_string));
        if let Some(file) = &node.file {
            self.file_to_urls
                .entry(file.clone())
                .or_default()
                .insert(url.to_string());
        }
        self.url_to_node.insert(url.to_string(), node);
    }
}

/// The module graph. One per server instance; nodes are created lazily on
/// first reference and cleared only at shutdown.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    inner: RwLock<GraphInner>,
}

impl ModuleGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node for `url`, creating it if unseen.
    ///
    /// A root-relative URL (`/src/app.ts`) denotes a filesystem path and
    /// registers the node under that path as its backing file. URLs under
    /// internal `/@...` routes have no derivable backing file; callers that
    /// know one use [`ModuleGraph::ensure_entry_with_file`].
    pub fn ensure_entry(&self, url: &str) -> ModuleNode {
        let id = normalize_url(url);
        let file = derive_file(&id);
        self.ensure_entry_with_file(&id, file.as_deref())
    }

    /// Return the node for `url`, creating it with an explicit backing file.
    pub fn ensure_entry_with_file(&self, url: &str, file: Option<&str>) -> ModuleNode {
        let id = normalize_url(url);
        let mut inner = self.inner.write().unwrap();
        inner.ensure(&id, file);
        inner.url_to_node.get(&id).cloned().unwrap()
    }

    /// Get a snapshot of a node.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<ModuleNode> {
        let id = normalize_url(url);
        self.inner.read().unwrap().url_to_node.get(&id).cloned()
    }

    /// URLs backed by a file, if any.
    #[must_use]
    pub fn urls_for_file(&self, file: &str) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .file_to_urls
            .get(file)
            .map(|urls| urls.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Reconcile a module's dependency edges against a freshly scanned
    /// import set. Removes edges to modules no longer imported and adds
    /// edges to new ones, creating nodes for unseen URLs, so stale edges
    /// never leak. Keeps `importers`/`imported_modules` mutually consistent.
    pub fn update_dependencies(&self, url: &str, new_imported_urls: &[String]) {
        let id = normalize_url(url);
        let new_set: FxHashSet<String> =
            new_imported_urls.iter().map(|u| normalize_url(u)).collect();

        let mut inner = self.inner.write().unwrap();
        inner.ensure(&id, derive_file(&id).as_deref());
        for dep in &new_set {
            inner.ensure(dep, derive_file(dep).as_deref());
        }

        let old_set = inner
            .url_to_node
            .get(&id)
            .map(|node| node.imported_modules.clone())
            .unwrap_or_default();

        for removed in old_set.difference(&new_set) {
            if let Some(dep) = inner.url_to_node.get_mut(removed) {
                dep.importers.remove(&id);
            }
        }
        for added in new_set.difference(&old_set) {
            if let Some(dep) = inner.url_to_node.get_mut(added) {
                dep.importers.insert(id.clone());
            }
        }
        if let Some(node) = inner.url_to_node.get_mut(&id) {
            // Accepted deps are a subset of the imports by definition.
            node.accepted_hmr_deps
                .retain(|dep| new_set.contains(dep));
            node.imported_modules = new_set;
        }
    }

    /// Store a fresh transform result for a module.
    pub fn set_transform_result(&self, url: &str, result: TransformResult) {
        let id = normalize_url(url);
        let mut inner = self.inner.write().unwrap();
        inner.ensure(&id, derive_file(&id).as_deref());
        if let Some(node) = inner.url_to_node.get_mut(&id) {
            node.transform_result = Some(result);
        }
    }

    /// Record the backing file resolution discovered for a module, e.g. an
    /// extensionless URL that resolved to a concrete file on disk.
    pub fn attach_file(&self, url: &str, file: &str) {
        let id = normalize_url(url);
        let mut inner = self.inner.write().unwrap();
        let old = match inner.url_to_node.get_mut(&id) {
            Some(node) => {
                if node.file.as_deref() == Some(file) {
                    return;
                }
                let old = node.file.take();
                node.file = Some(file.to_string());
                old
            }
            None => return,
        };
        if let Some(old) = old {
            if let Some(urls) = inner.file_to_urls.get_mut(&old) {
                urls.remove(&id);
            }
        }
        inner
            .file_to_urls
            .entry(file.to_string())
            .or_default()
            .insert(id);
    }

    /// Mark a module as accepting its own hot updates.
    pub fn mark_self_accepting(&self, url: &str) {
        let id = normalize_url(url);
        if let Some(node) = self.inner.write().unwrap().url_to_node.get_mut(&id) {
            node.is_self_accepting = true;
        }
    }

    /// Record which dependencies a module declared it hot-accepts.
    pub fn set_accepted_deps(&self, url: &str, deps: &[String]) {
        let id = normalize_url(url);
        if let Some(node) = self.inner.write().unwrap().url_to_node.get_mut(&id) {
            node.accepted_hmr_deps = deps.iter().map(|d| normalize_url(d)).collect();
        }
    }

    /// Clear a module's cached result and walk its importers depth-first.
    ///
    /// An importer that declared the invalidated module in its accepted
    /// deps, or that is self-accepting, is a hot-update boundary: its own
    /// cached result is cleared (it re-executes against the new dep) but
    /// the walk does not continue past it. This boundary stop is what turns
    /// a file save into a partial update instead of a cascading reload.
    ///
    /// A visited set makes the walk terminate on cycles and touch each
    /// module once.
    pub fn invalidate(&self, url: &str) {
        let start = normalize_url(url);
        let mut inner = self.inner.write().unwrap();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let importers: Vec<String> = match inner.url_to_node.get_mut(&id) {
                Some(node) => {
                    node.transform_result = None;
                    node.importers.iter().cloned().collect()
                }
                None => continue,
            };

            for importer_id in importers {
                if visited.contains(&importer_id) {
                    continue;
                }
                let is_boundary = inner.url_to_node.get(&importer_id).is_some_and(|imp| {
                    imp.is_self_accepting || imp.accepted_hmr_deps.contains(&id)
                });
                if is_boundary {
                    if let Some(imp) = inner.url_to_node.get_mut(&importer_id) {
                        imp.transform_result = None;
                    }
                } else {
                    stack.push(importer_id);
                }
            }
        }
    }

    /// React to a changed file: stamp a fresh version on every node backed
    /// by it and invalidate each. Returns the affected URLs.
    pub fn on_file_change(&self, file: &str) -> Vec<String> {
        let urls = self.urls_for_file(file);
        if urls.is_empty() {
            return urls;
        }
        let stamp = now_ms();
        {
            let mut inner = self.inner.write().unwrap();
            for url in &urls {
                if let Some(node) = inner.url_to_node.get_mut(url) {
                    node.last_update_timestamp = stamp;
                }
            }
        }
        for url in &urls {
            self.invalidate(url);
        }
        urls
    }

    /// Number of modules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().url_to_node.len()
    }

    /// Whether the graph has no modules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backing file derivable from a URL: root-relative paths denote files,
/// internal `/@...` routes and virtual ids do not.
fn derive_file(id: &str) -> Option<String> {
    if id.starts_with('/') && !id.starts_with("/@") {
        Some(id.to_string())
    } else {
        None
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: &str) -> TransformResult {
        TransformResult {
            code: code.to_string(),
            map: None,
        }
    }

    fn chain(graph: &ModuleGraph) {
        // /a imports /b imports /c
        graph.ensure_entry("/a.ts");
        graph.ensure_entry("/b.ts");
        graph.ensure_entry("/c.ts");
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);
        graph.update_dependencies("/b.ts", &["/c.ts".to_string()]);
        for url in ["/a.ts", "/b.ts", "/c.ts"] {
            graph.set_transform_result(url, result(url));
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("/src/app.ts?t=123"), "/src/app.ts");
        assert_eq!(normalize_url("/src/app.ts#frag"), "/src/app.ts");
        assert_eq!(normalize_url("/src/app.ts"), "/src/app.ts");
    }

    #[test]
    fn test_ensure_entry_registers_file() {
        let graph = ModuleGraph::new();
        let node = graph.ensure_entry("/src/app.ts?t=42");
        assert_eq!(node.id, "/src/app.ts");
        assert_eq!(node.file.as_deref(), Some("/src/app.ts"));
        assert_eq!(graph.urls_for_file("/src/app.ts"), vec!["/src/app.ts"]);
        // Second ensure returns the same node, no duplicate.
        graph.ensure_entry("/src/app.ts");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_edge_invariant_after_update() {
        let graph = ModuleGraph::new();
        graph.update_dependencies("/a.ts", &["/b.ts".to_string(), "/c.ts".to_string()]);

        let b = graph.get("/b.ts").unwrap();
        assert!(b.importers.contains("/a.ts"));

        // Drop /c, add /d: both directions must stay consistent.
        graph.update_dependencies("/a.ts", &["/b.ts".to_string(), "/d.ts".to_string()]);
        let a = graph.get("/a.ts").unwrap();
        let c = graph.get("/c.ts").unwrap();
        let d = graph.get("/d.ts").unwrap();
        assert!(!a.imported_modules.contains("/c.ts"));
        assert!(!c.importers.contains("/a.ts"));
        assert!(a.imported_modules.contains("/d.ts"));
        assert!(d.importers.contains("/a.ts"));
    }

    #[test]
    fn test_invalidate_propagates_without_boundaries() {
        let graph = ModuleGraph::new();
        chain(&graph);

        graph.invalidate("/c.ts");
        assert!(graph.get("/c.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/b.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/a.ts").unwrap().transform_result.is_none());
    }

    #[test]
    fn test_invalidate_stops_at_accepting_importer() {
        let graph = ModuleGraph::new();
        chain(&graph);
        graph.set_accepted_deps("/b.ts", &["/c.ts".to_string()]);

        graph.invalidate("/c.ts");
        // B re-executes against the new C, so its cache entry clears, but
        // the walk stops there.
        assert!(graph.get("/c.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/b.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/a.ts").unwrap().transform_result.is_some());
    }

    #[test]
    fn test_invalidate_stops_at_self_accepting_importer() {
        let graph = ModuleGraph::new();
        chain(&graph);
        graph.mark_self_accepting("/b.ts");

        graph.invalidate("/c.ts");
        assert!(graph.get("/b.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/a.ts").unwrap().transform_result.is_some());
    }

    #[test]
    fn test_invalidate_terminates_on_cycle() {
        let graph = ModuleGraph::new();
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);
        graph.update_dependencies("/b.ts", &["/a.ts".to_string()]);
        graph.set_transform_result("/a.ts", result("a"));
        graph.set_transform_result("/b.ts", result("b"));

        graph.invalidate("/a.ts");
        assert!(graph.get("/a.ts").unwrap().transform_result.is_none());
        assert!(graph.get("/b.ts").unwrap().transform_result.is_none());
    }

    #[test]
    fn test_on_file_change_stamps_and_invalidates() {
        let graph = ModuleGraph::new();
        graph.ensure_entry("/src/app.ts");
        graph.set_transform_result("/src/app.ts", result("code"));

        let affected = graph.on_file_change("/src/app.ts");
        assert_eq!(affected, vec!["/src/app.ts"]);
        let node = graph.get("/src/app.ts").unwrap();
        assert!(node.transform_result.is_none());
        assert!(node.last_update_timestamp > 0);

        assert!(graph.on_file_change("/src/unknown.ts").is_empty());
    }

    #[test]
    fn test_accepted_deps_pruned_to_imports() {
        let graph = ModuleGraph::new();
        graph.update_dependencies("/a.ts", &["/b.ts".to_string(), "/c.ts".to_string()]);
        graph.set_accepted_deps("/a.ts", &["/b.ts".to_string(), "/c.ts".to_string()]);
        graph.update_dependencies("/a.ts", &["/b.ts".to_string()]);

        let a = graph.get("/a.ts").unwrap();
        assert!(a.accepted_hmr_deps.contains("/b.ts"));
        assert!(!a.accepted_hmr_deps.contains("/c.ts"));
    }
}
