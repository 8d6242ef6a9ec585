//! `liffey dev` command implementation.
//!
//! Unbundled development server: instead of a single bundle, every source
//! file is served as its own ES module on demand:
//!
//! ```text
//! Browser requests GET /src/App.ts
//!   → graph cache lookup
//!   → (miss) resolve → load → transform (plugin pipeline, import rewrite)
//!   → result cached on the module graph
//!   → served as application/javascript with an inline source map
//! ```
//!
//! External packages are pre-bundled at startup into `.liffey/deps/` and
//! served at `/@deps/{pkg}.js`. File changes flow from the watcher through
//! the HMR engine to all connected WebSocket clients.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use liffey_core::{
    scan, ChannelMessage, CssPlugin, DepBundler, DepOptimizer, HmrEngine, ImportRewritePlugin,
    JsonPlugin, MetadataStore, ModuleGraph, OptimizeError, PluginContainer, ResolvedConfig,
    ServerContext, TransformOrchestrator,
};
use miette::{IntoDiagnostic, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Entry point file.
    pub entry: PathBuf,
    /// Working directory.
    pub cwd: PathBuf,
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
}

/// Shared server state.
struct DevState {
    /// Resolved settings.
    config: Arc<ResolvedConfig>,
    /// Module graph, shared with the orchestrator and the HMR engine.
    graph: Arc<ModuleGraph>,
    /// Per-request transform entry point.
    orchestrator: TransformOrchestrator,
    /// Update-scope computation for file events.
    hmr: HmrEngine,
    /// Broadcast channel feeding every connected WebSocket client.
    hmr_tx: broadcast::Sender<ChannelMessage>,
    /// Middleware registered by plugin `configure_server` hooks.
    middlewares: Vec<liffey_core::plugin::ServerMiddleware>,
    /// Index page, with the client runtime injected.
    index_html: String,
}

type AppState = Arc<DevState>;

/// Run the dev server.
pub async fn run(action: DevAction) -> Result<()> {
    let cwd = action.cwd.canonicalize().into_diagnostic()?;
    let mut config = ResolvedConfig::new(cwd.clone()).entry(action.entry.clone());
    config.host = action.host.clone();
    config.port = action.port;
    let config = Arc::new(config);

    let mut plugins = PluginContainer::new(cwd.clone());
    plugins.add(Box::new(CssPlugin));
    plugins.add(Box::new(JsonPlugin));

    // Pre-bundle dependencies. This blocks readiness on purpose: a request
    // served mid-optimization could reference a not-yet-written artifact.
    println!("  Scanning dependencies...");
    let store = MetadataStore::new(config.deps_dir.join("metadata.json"));
    let optimizer = DepOptimizer::new(config.clone(), store, Arc::new(SingleFileBundler));
    let dep_metadata = optimizer.run().into_diagnostic()?;
    if !dep_metadata.optimized.is_empty() {
        println!(
            "  Pre-bundled {} dependencies: {}",
            dep_metadata.optimized.len(),
            dep_metadata
                .optimized
                .keys()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    plugins.add(Box::new(ImportRewritePlugin::new(
        cwd.clone(),
        dep_metadata.rewrite_targets(),
    )));

    // Let plugins hook into the server before it starts.
    let mut server_ctx = ServerContext::new(cwd.clone());
    if let Err(err) = plugins.configure_server(&mut server_ctx) {
        warn!(error = %err, "configure_server hook failed");
    }

    let plugins = Arc::new(plugins);
    let graph = Arc::new(ModuleGraph::new());
    let orchestrator =
        TransformOrchestrator::new(config.clone(), graph.clone(), plugins.clone());
    let hmr = HmrEngine::new(graph.clone(), plugins.clone());

    let (hmr_tx, _) = broadcast::channel::<ChannelMessage>(16);

    let index_html = load_index_html(&cwd, &entry_url(&config, &action.entry));

    let state = Arc::new(DevState {
        config: config.clone(),
        graph,
        orchestrator,
        hmr,
        hmr_tx: hmr_tx.clone(),
        middlewares: server_ctx.middlewares,
        index_html,
    });

    // File watcher thread feeding the async change handler.
    let (event_tx, mut event_rx) = mpsc::channel::<WatchBatch>(16);
    let watch_root = cwd.clone();
    std::thread::spawn(move || {
        if let Err(err) = watch_files(&watch_root, &event_tx) {
            warn!(error = %err, "file watcher exited");
        }
    });

    let change_state = state.clone();
    tokio::spawn(async move {
        while let Some(batch) = event_rx.recv().await {
            handle_watch_batch(&change_state, batch);
        }
    });

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/__hmr", get(hmr_websocket))
        .route("/@client", get(serve_client_runtime))
        .route("/@deps/*artifact", get(serve_dep_artifact))
        .route("/*path", get(serve_module))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);

    let host_ip = if config.host == "localhost" {
        "127.0.0.1".to_string()
    } else {
        config.host.clone()
    };
    let addr: SocketAddr = format!("{}:{}", host_ip, config.port)
        .parse()
        .into_diagnostic()?;

    println!();
    println!("  Dev server running at http://{}:{}", config.host, config.port);
    println!("  Hot module replacement enabled");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;

    Ok(())
}

// ============================================================================
// Dependency bundling backend
// ============================================================================

/// Minimal bundling backend: materializes the package's resolved entry file
/// as the artifact. Packages whose entry pulls in sibling files need a real
/// linking backend behind [`DepBundler`]; this one keeps single-file ESM
/// packages working and logs the rest.
struct SingleFileBundler;

impl DepBundler for SingleFileBundler {
    fn bundle_package(
        &self,
        package: &str,
        entry: &Path,
        artifact: &Path,
    ) -> std::result::Result<(), OptimizeError> {
        let source = std::fs::read_to_string(entry).map_err(|source| OptimizeError::Io {
            path: entry.to_path_buf(),
            source,
        })?;
        if scan::extract_import_specifiers(&source)
            .iter()
            .any(|spec| spec.starts_with('.'))
        {
            warn!(
                package,
                "package entry imports sibling files; artifact may be incomplete"
            );
        }
        std::fs::write(artifact, source).map_err(|source| OptimizeError::Io {
            path: artifact.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Route handlers
// ============================================================================

/// Serve the index HTML page.
async fn serve_index(State(state): State<AppState>) -> Html<String> {
    Html(state.index_html.clone())
}

/// Serve the HMR client runtime at `/@client`.
async fn serve_client_runtime() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        CLIENT_RUNTIME,
    )
}

/// Serve a pre-bundled dependency artifact at `/@deps/{artifact}`.
async fn serve_dep_artifact(
    State(state): State<AppState>,
    AxumPath(artifact): AxumPath<String>,
) -> Response {
    // Artifact names are sanitized package names; reject anything that
    // could escape the deps directory.
    if artifact.contains("..") || artifact.contains('/') {
        return not_found(&artifact);
    }
    let path = state.config.deps_dir.join(&artifact);
    match tokio::fs::read_to_string(&path).await {
        Ok(code) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/javascript")
            .header(header::CACHE_CONTROL, "max-age=31536000, immutable")
            .body(code.into())
            .unwrap(),
        Err(_) => not_found(&artifact),
    }
}

/// Serve an individual module on demand.
///
/// The core of the unbundled server: each request goes through the
/// orchestrator (graph cache, else the full pipeline). A `None` result
/// falls back to static file serving, and an error becomes a 500 plus an
/// `error` broadcast so open pages can display it.
async fn serve_module(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    let url_path = format!("/{path}");

    for middleware in &state.middlewares {
        if let Some(response) = (middleware.handler)(&url_path) {
            return Response::builder()
                .status(response.status)
                .header(header::CONTENT_TYPE, response.content_type)
                .body(response.body.into())
                .unwrap();
        }
    }

    match state.orchestrator.transform_request(&url_path).await {
        Ok(Some(result)) => {
            let kind = scan::ModuleKind::from_path(&url_path);
            let mut body = String::new();
            let mut map = result.map;
            if matches!(kind, scan::ModuleKind::Script | scan::ModuleKind::Style) {
                let preamble = module_preamble(&liffey_core::normalize_url(&url_path));
                map = map.map(|m| m.with_generated_line_offset(PREAMBLE_LINES));
                body.push_str(&preamble);
            }
            body.push_str(&result.code);
            if let Some(map) = map {
                if !body.ends_with('\n') {
                    body.push('\n');
                }
                body.push_str(&map.to_inline_comment());
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, kind.content_type())
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body.into())
                .unwrap()
        }
        Ok(None) => serve_static(&state, &path, &url_path).await,
        Err(err) => {
            let message = err.to_string();
            // Push the failure to open pages as well as the log.
            let _ = state.hmr_tx.send(ChannelMessage::Error {
                message: message.clone(),
            });
            warn!(url = %url_path, error = %message, "transform failed");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(header::CONTENT_TYPE, "application/javascript")
                .body(
                    format!("console.error('Transform error: {}');", message.replace('\'', "\\'"))
                        .into(),
                )
                .unwrap()
        }
    }
}

/// Static file fallback for non-module requests, with an SPA fallback for
/// extensionless client-side routes.
async fn serve_static(state: &DevState, path: &str, url_path: &str) -> Response {
    let file_path = state.config.root.join(path);
    if file_path.is_file() {
        let content_type = static_content_type(url_path);
        return match tokio::fs::read(&file_path).await {
            Ok(bytes) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .body(bytes.into())
                .unwrap(),
            Err(_) => not_found(url_path),
        };
    }

    let has_extension = path.rsplit('/').next().is_some_and(|name| name.contains('.'));
    if has_extension {
        not_found(url_path)
    } else {
        // No extension: likely a client-side route, let the app's router
        // handle it.
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(state.index_html.clone().into())
            .unwrap()
    }
}

fn not_found(url_path: &str) -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(format!("Not found: {url_path}").into())
        .unwrap()
}

/// Content-Type for static files, by extension.
fn static_content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "html" => "text/html",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// WebSocket channel
// ============================================================================

/// Upgrade `/__hmr` connections.
async fn hmr_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_hmr_socket(socket, state))
}

/// One connected client: forward broadcast messages out, handle the
/// client's own messages in. A failed send means the client is gone and the
/// loop ends, which is all the pruning a broadcast subscriber needs.
async fn handle_hmr_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.hmr_tx.subscribe();

    let connected = serde_json::to_string(&ChannelMessage::Connected).unwrap_or_default();
    if socket.send(Message::Text(connected)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Ok(msg) => {
                    let json = serde_json::to_string(&msg).unwrap_or_default();
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "client lagged behind hmr broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_message(&state, &text),
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

/// Handle a message from the client runtime.
fn handle_client_message(state: &DevState, text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    if value.get("type").and_then(|t| t.as_str()) == Some("hot-accept") {
        if let Some(path) = value.get("path").and_then(|p| p.as_str()) {
            // The runtime confirmed the module registered a self-accept
            // handler; record it so the next change hot-swaps in place.
            state.graph.mark_self_accepting(path);
        }
    }
}

// ============================================================================
// File watching
// ============================================================================

/// Watcher event coalescing window.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileEventKind {
    Changed,
    Added,
    Removed,
}

#[derive(Debug)]
enum WatchBatch {
    Events(Vec<(FileEventKind, PathBuf)>),
    Failure(String),
}

/// Check if a path should be ignored by the file watcher.
fn should_ignore(path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    if path_str.contains("/node_modules/")
        || path_str.contains("/target/")
        || path_str.contains("/.git/")
        || path_str.contains("/dist/")
        || path_str.contains("/.liffey/")
    {
        return true;
    }
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Watch files for changes, coalescing editor write bursts before handing
/// batches to the async side.
fn watch_files(
    root: &Path,
    batch_tx: &mpsc::Sender<WatchBatch>,
) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(tx, NotifyConfig::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "watching for file changes");

    let mut pending: HashMap<PathBuf, FileEventKind> = HashMap::new();
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(DEBOUNCE_WINDOW) {
            Ok(Ok(event)) => {
                let kind = match event.kind {
                    notify::EventKind::Create(_) => FileEventKind::Added,
                    notify::EventKind::Remove(_) => FileEventKind::Removed,
                    notify::EventKind::Modify(_) => FileEventKind::Changed,
                    _ => continue,
                };
                for path in event.paths {
                    if should_ignore(&path) {
                        continue;
                    }
                    // Create/remove beats a change seen in the same window.
                    pending
                        .entry(path)
                        .and_modify(|existing| {
                            if kind != FileEventKind::Changed {
                                *existing = kind;
                            }
                        })
                        .or_insert(kind);
                }
            }
            Ok(Err(err)) => {
                if batch_tx
                    .blocking_send(WatchBatch::Failure(err.to_string()))
                    .is_err()
                {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if !pending.is_empty() && last_flush.elapsed() >= DEBOUNCE_WINDOW {
            let events: Vec<(FileEventKind, PathBuf)> = pending
                .drain()
                .map(|(path, kind)| (kind, path))
                .collect();
            last_flush = Instant::now();
            if batch_tx.blocking_send(WatchBatch::Events(events)).is_err() {
                break;
            }
        }
    }

    Ok(())
}

/// Turn a batch of file events into one channel broadcast.
fn handle_watch_batch(state: &DevState, batch: WatchBatch) {
    let message = match batch {
        WatchBatch::Failure(err) => state.hmr.on_watch_error(&err),
        WatchBatch::Events(events) => {
            let mut updates = Vec::new();
            let mut seen_paths = std::collections::HashSet::new();
            let mut full_reload = false;

            for (kind, path) in events {
                let Some(url) = url_for_path(&state.config.root, &path) else {
                    continue;
                };
                debug!(file = %url, ?kind, "file event");
                let msg = match kind {
                    FileEventKind::Changed => state.hmr.on_file_change(&url),
                    FileEventKind::Added => state.hmr.on_file_add(&url),
                    FileEventKind::Removed => state.hmr.on_file_remove(&url),
                };
                match msg {
                    ChannelMessage::FullReload => full_reload = true,
                    ChannelMessage::Update { updates: new_updates } => {
                        for update in new_updates {
                            if seen_paths.insert(update.path.clone()) {
                                updates.push(update);
                            }
                        }
                    }
                    _ => {}
                }
                if full_reload {
                    break;
                }
            }

            if full_reload || updates.is_empty() {
                ChannelMessage::FullReload
            } else {
                ChannelMessage::Update { updates }
            }
        }
    };

    // Best-effort: send only fails when no client is connected.
    let _ = state.hmr_tx.send(message);
}

/// Root-relative URL form of an absolute path.
fn url_for_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|relative| format!("/{}", relative.display()))
}

// ============================================================================
// Index page and client runtime
// ============================================================================

/// Lines the module preamble occupies, for source-map offsetting.
const PREAMBLE_LINES: u32 = 2;

/// Per-module preamble wiring `import.meta.hot` to the client runtime.
fn module_preamble(module_url: &str) -> String {
    format!(
        "import {{ createHotContext as __liffey_createHotContext }} from \"/@client\";\nimport.meta.hot = __liffey_createHotContext(\"{module_url}\");\n"
    )
}

/// URL path the entry module is served at.
fn entry_url(config: &ResolvedConfig, entry: &Path) -> String {
    let absolute = config.entry_path(entry);
    url_for_path(&config.root, &absolute)
        .unwrap_or_else(|| format!("/{}", entry.display()))
}

/// Load the project's index.html (injecting the client runtime), or
/// generate a minimal one.
fn load_index_html(root: &Path, entry_url: &str) -> String {
    let client_script = r#"<script type="module" src="/@client"></script>"#;
    let user_index = root.join("index.html");

    if let Ok(mut html) = std::fs::read_to_string(&user_index) {
        if !html.contains("/@client") {
            if let Some(pos) = html.find("</head>") {
                html.insert_str(pos, &format!("  {client_script}\n  "));
            } else {
                html.push_str(&format!("\n{client_script}"));
            }
        }
        return html;
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>liffey dev</title>
  {client_script}
</head>
<body>
  <div id="root"></div>
  <script type="module" src="{entry_url}"></script>
</body>
</html>"#
    )
}

/// The HMR client runtime served at `/@client`.
///
/// Speaks the channel protocol: `connected`, `update` (re-imports each
/// boundary with a timestamp query and runs accept callbacks),
/// `full-reload`, and `error` (overlay).
const CLIENT_RUNTIME: &str = r#"
// liffey HMR client runtime
const hotModules = new Map();
const disposeCallbacks = new Map();
const dataMap = new Map();

const socket = new WebSocket(`ws://${location.host}/__hmr`);

socket.addEventListener('message', (event) => {
  handleMessage(JSON.parse(event.data));
});

socket.addEventListener('close', () => {
  console.log('[liffey] server connection lost, reloading...');
  setTimeout(() => location.reload(), 1000);
});

function handleMessage(msg) {
  switch (msg.type) {
    case 'connected':
      console.log('[liffey] connected.');
      break;
    case 'update':
      hideErrorOverlay();
      for (const update of msg.updates) {
        applyUpdate(update);
      }
      break;
    case 'full-reload':
      location.reload();
      break;
    case 'error':
      console.error('[liffey] ' + msg.message);
      showErrorOverlay(msg.message);
      break;
  }
}

async function applyUpdate({ path, timestamp }) {
  const entry = hotModules.get(path);
  if (!entry) {
    // No accept handler registered for this boundary.
    location.reload();
    return;
  }
  const dispose = disposeCallbacks.get(path);
  if (dispose) {
    dispose(dataMap.get(path) || {});
  }
  try {
    const next = await import(path + '?t=' + timestamp);
    for (const cb of entry.callbacks) {
      cb(next);
    }
    console.log('[liffey] hot updated: ' + path);
  } catch (err) {
    console.error('[liffey] hot update failed for ' + path, err);
    location.reload();
  }
}

function showErrorOverlay(message) {
  let overlay = document.getElementById('__liffey_error_overlay');
  if (!overlay) {
    overlay = document.createElement('div');
    overlay.id = '__liffey_error_overlay';
    overlay.style.cssText =
      'position:fixed;inset:0;background:rgba(0,0,0,0.9);color:#ff5555;' +
      'padding:32px;font-family:monospace;font-size:15px;white-space:pre-wrap;' +
      'overflow:auto;z-index:999999;';
    document.body.appendChild(overlay);
  }
  overlay.textContent = 'Transform error:\n\n' + message;
  overlay.style.display = 'block';
}

function hideErrorOverlay() {
  const overlay = document.getElementById('__liffey_error_overlay');
  if (overlay) overlay.style.display = 'none';
}

export function createHotContext(ownerPath) {
  if (!dataMap.has(ownerPath)) {
    dataMap.set(ownerPath, {});
  }
  return {
    get data() {
      return dataMap.get(ownerPath);
    },
    accept(deps, cb) {
      const entry = hotModules.get(ownerPath) || { callbacks: [] };
      if (typeof deps === 'function' || !deps) {
        if (deps) entry.callbacks.push(deps);
        hotModules.set(ownerPath, entry);
        if (socket.readyState === WebSocket.OPEN) {
          socket.send(JSON.stringify({ type: 'hot-accept', path: ownerPath }));
        }
      } else {
        if (cb) entry.callbacks.push(cb);
        hotModules.set(ownerPath, entry);
      }
    },
    dispose(cb) {
      disposeCallbacks.set(ownerPath, cb);
    },
    invalidate() {
      location.reload();
    },
  };
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_path() {
        let root = Path::new("/project");
        assert_eq!(
            url_for_path(root, Path::new("/project/src/app.ts")),
            Some("/src/app.ts".to_string())
        );
        assert_eq!(url_for_path(root, Path::new("/elsewhere/app.ts")), None);
    }

    #[test]
    fn test_should_ignore() {
        assert!(should_ignore(Path::new("/p/node_modules/react/index.js")));
        assert!(should_ignore(Path::new("/p/.liffey/deps/react.js")));
        assert!(should_ignore(Path::new("/p/src/.app.ts.swp")));
        assert!(!should_ignore(Path::new("/p/src/app.ts")));
    }

    #[test]
    fn test_module_preamble_line_count() {
        let preamble = module_preamble("/src/app.ts");
        assert_eq!(preamble.lines().count() as u32, PREAMBLE_LINES);
        assert!(preamble.contains("createHotContext(\"/src/app.ts\")"));
    }

    #[test]
    fn test_generated_index_references_entry_and_client() {
        let temp = tempfile::tempdir().unwrap();
        let html = load_index_html(temp.path(), "/src/main.ts");
        assert!(html.contains(r#"src="/src/main.ts""#));
        assert!(html.contains("/@client"));
    }

    #[test]
    fn test_user_index_gets_client_injected_once() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("index.html"),
            "<html><head></head><body></body></html>",
        )
        .unwrap();
        let html = load_index_html(temp.path(), "/src/main.ts");
        assert_eq!(html.matches("/@client").count(), 1);
    }

    #[test]
    fn test_static_content_type() {
        assert_eq!(static_content_type("/index.html"), "text/html");
        assert_eq!(static_content_type("/logo.svg"), "image/svg+xml");
        assert_eq!(static_content_type("/a.bin"), "application/octet-stream");
    }

    #[test]
    fn test_single_file_bundler_materializes_entry() {
        let temp = tempfile::tempdir().unwrap();
        let entry = temp.path().join("index.js");
        std::fs::write(&entry, "export default 1;").unwrap();
        let artifact = temp.path().join("out.js");

        SingleFileBundler
            .bundle_package("pkg", &entry, &artifact)
            .unwrap();
        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "export default 1;");
    }
}
