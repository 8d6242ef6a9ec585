//! Per-request transform orchestration.
//!
//! Entry point for every module request: consult the graph cache, else run
//! the pipeline (resolve → load → transform), refresh the module's
//! dependency edges from the transformed output, and store the result back
//! on the graph.

use crate::config::ResolvedConfig;
use crate::graph::{normalize_url, ModuleGraph};
use crate::plugin::{PluginContainer, PluginError, TransformResult};
use crate::rewrite::probe_module_path;
use crate::scan;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Error from a transform request. Resolution misses are not errors (the
/// request yields `Ok(None)`); only a failing hook or unreadable backing
/// file is.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A plugin hook failed for this module.
    #[error("{source} (module: {id})")]
    Hook {
        id: String,
        #[source]
        source: PluginError,
    },

    /// The backing file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ties the module graph and the plugin pipeline together, one request at a
/// time per module id.
pub struct TransformOrchestrator {
    config: Arc<ResolvedConfig>,
    graph: Arc<ModuleGraph>,
    plugins: Arc<PluginContainer>,
    /// Per-module-id locks serializing concurrent requests for the same
    /// unresolved module onto a single transform.
    in_flight: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl TransformOrchestrator {
    /// Create an orchestrator over a graph and plugin container.
    #[must_use]
    pub fn new(
        config: Arc<ResolvedConfig>,
        graph: Arc<ModuleGraph>,
        plugins: Arc<PluginContainer>,
    ) -> Self {
        Self {
            config,
            graph,
            plugins,
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    /// The module graph this orchestrator populates.
    #[must_use]
    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    /// Transform the module a URL denotes.
    ///
    /// Returns the cached result on a hit (query-string version tokens are
    /// not part of the cache key). `Ok(None)` means nothing could supply
    /// content for the URL and the caller decides whether that is fatal.
    pub async fn transform_request(
        &self,
        url: &str,
    ) -> Result<Option<TransformResult>, TransformError> {
        let id = normalize_url(url);
        self.graph.ensure_entry(&id);

        // Requests for the same module await the in-flight transform and
        // then observe its cached result instead of duplicating work.
        let lock = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if let Some(node) = self.graph.get(&id) {
            if let Some(result) = node.transform_result {
                trace!(url = %id, "transform cache hit");
                return Ok(Some(result));
            }
        }

        let Some(resolved) = self.resolve(&id)? else {
            debug!(url = %id, "no resolution for module request");
            return Ok(None);
        };

        // Remember the backing file under its URL form so file-change
        // events find this module even when the URL omitted the extension.
        if let Some(url_form) = self.url_for_path(Path::new(&resolved)) {
            self.graph.attach_file(&id, &url_form);
        }

        let Some((code, load_map)) = self.load(&resolved).await? else {
            debug!(url = %id, resolved = %resolved, "no loader produced content");
            return Ok(None);
        };

        let transformed = self
            .plugins
            .transform(&code, &resolved)
            .map_err(|source| TransformError::Hook {
                id: id.clone(),
                source,
            })?;

        let Some(mut result) = transformed else {
            // No transform occurred; the caller falls back to serving the
            // content as a plain asset.
            return Ok(None);
        };

        result.map = match (result.map.take(), load_map) {
            (Some(later), Some(earlier)) => Some(later.compose(&earlier)),
            (Some(later), None) => Some(later),
            (None, earlier) => earlier,
        };

        self.refresh_graph_edges(&id, &resolved, &result.code);
        self.graph.set_transform_result(&id, result.clone());
        Ok(Some(result))
    }

    /// Resolve a module URL to a loadable id: plugins first, then the
    /// default filesystem resolution under the project root.
    fn resolve(&self, id: &str) -> Result<Option<String>, TransformError> {
        let resolved = self
            .plugins
            .resolve_id(id, None)
            .map_err(|source| TransformError::Hook {
                id: id.to_string(),
                source,
            })?;
        if let Some(resolved) = resolved {
            return Ok(Some(resolved));
        }

        let relative = id.strip_prefix('/').unwrap_or(id);
        let candidate = self.config.root.join(relative);
        Ok(probe_module_path(&candidate).map(|path| path.display().to_string()))
    }

    /// Load module source: plugins first, then the backing file on disk.
    async fn load(
        &self,
        resolved: &str,
    ) -> Result<Option<(String, Option<crate::sourcemap::PositionMap>)>, TransformError> {
        let loaded = self
            .plugins
            .load(resolved)
            .map_err(|source| TransformError::Hook {
                id: resolved.to_string(),
                source,
            })?;
        if let Some(loaded) = loaded {
            return Ok(Some((loaded.code, loaded.map)));
        }

        let path = Path::new(resolved);
        if !path.is_file() {
            return Ok(None);
        }
        match tokio::fs::read_to_string(path).await {
            Ok(code) => Ok(Some((code, None))),
            // Binary content is not module source; let the caller fall back
            // to asset serving.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => Ok(None),
            Err(source) => Err(TransformError::Io {
                path: resolved.to_string(),
                source,
            }),
        }
    }

    /// Refresh the module's dependency edges and hot-accept declarations
    /// from its transformed code.
    fn refresh_graph_edges(&self, id: &str, resolved: &str, code: &str) {
        let imports: Vec<String> = scan::extract_import_specifiers(code)
            .into_iter()
            .filter(|spec| spec.starts_with('/') && !spec.starts_with("/@"))
            .collect();
        self.graph.update_dependencies(id, &imports);

        if scan::is_self_accepting(code) {
            self.graph.mark_self_accepting(id);
        }
        let accepted = scan::accepted_dep_specifiers(code);
        if !accepted.is_empty() {
            let resolved_deps: Vec<String> = accepted
                .iter()
                .filter_map(|spec| self.accepted_dep_url(spec, resolved))
                .collect();
            self.graph.set_accepted_deps(id, &resolved_deps);
        }
    }

    /// Resolve an `accept('./dep')` specifier to a graph URL, relative to
    /// the accepting module's backing file.
    fn accepted_dep_url(&self, spec: &str, resolved: &str) -> Option<String> {
        if spec.starts_with('/') {
            return Some(normalize_url(spec));
        }
        if !spec.starts_with('.') {
            return None;
        }
        let dir = Path::new(resolved).parent()?;
        let probed = probe_module_path(&dir.join(spec))?;
        self.url_for_path(&probed)
    }

    /// Root-relative URL form of an absolute path, when it lies under the
    /// project root.
    fn url_for_path(&self, path: &Path) -> Option<String> {
        let root = canonical_root(&self.config.root);
        let path: PathBuf = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        path.strip_prefix(&root)
            .ok()
            .map(|relative| format!("/{}", relative.display()))
    }
}

fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}
