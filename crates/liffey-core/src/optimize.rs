//! Dependency pre-bundling.
//!
//! External packages are imported by bare specifier, which the browser
//! cannot follow and which would otherwise fan out into hundreds of
//! node_modules requests. At startup the optimizer scans the entry points
//! for bare imports, pre-bundles each referenced package into a single
//! cache-friendly artifact via an external bundling backend, and records
//! what it built so unchanged installs skip the whole pass.
//!
//! Staleness is decided by a blake3 hash of the package manifest plus the
//! presence of every referenced artifact on disk.

use crate::config::ResolvedConfig;
use crate::scan;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Schema version for persisted metadata. Bump when changing the format.
pub const DEP_METADATA_SCHEMA_VERSION: u32 = 1;

/// Persisted record of one optimization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepMetadata {
    /// Schema version for format evolution.
    pub schema_version: u32,
    /// Blake3 hash of the package manifest the pass ran against.
    pub manifest_hash: String,
    /// Package name → bundled artifact.
    pub optimized: BTreeMap<String, OptimizedDep>,
}

/// One pre-bundled package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizedDep {
    /// Where the artifact was written.
    pub artifact_path: PathBuf,
    /// Whether imports of this package must be rewritten to the artifact
    /// URL when modules are served.
    pub rewrite_needed: bool,
}

impl DepMetadata {
    fn new(manifest_hash: String) -> Self {
        Self {
            schema_version: DEP_METADATA_SCHEMA_VERSION,
            manifest_hash,
            optimized: BTreeMap::new(),
        }
    }

    /// Bare package name → served artifact URL, for the import rewriter.
    #[must_use]
    pub fn rewrite_targets(&self) -> FxHashMap<String, String> {
        self.optimized
            .iter()
            .filter(|(_, dep)| dep.rewrite_needed)
            .filter_map(|(name, dep)| {
                dep.artifact_path
                    .file_name()
                    .map(|file| (name.clone(), format!("/@deps/{}", file.to_string_lossy())))
            })
            .collect()
    }
}

/// Explicit store for persisted [`DepMetadata`], shared across server runs.
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Create a store persisting at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load previously persisted metadata, if readable and of the current
    /// schema.
    #[must_use]
    pub fn load(&self) -> Option<DepMetadata> {
        let bytes = std::fs::read(&self.path).ok()?;
        let meta: DepMetadata = serde_json::from_slice(&bytes).ok()?;
        (meta.schema_version == DEP_METADATA_SCHEMA_VERSION).then_some(meta)
    }

    /// Persist metadata for the next server run.
    pub fn save(&self, meta: &DepMetadata) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(meta)?;
        std::fs::write(&self.path, json)
    }
}

/// Error from the optimization pass.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bundle '{package}': {message}")]
    Bundle { package: String, message: String },

    #[error("none of {expected} referenced dependencies could be pre-bundled")]
    NoDepsBundled { expected: usize },
}

/// The external bundling backend. Given a package's on-disk entry point it
/// produces a single runtime-loadable artifact.
pub trait DepBundler: Send + Sync {
    fn bundle_package(
        &self,
        package: &str,
        entry: &Path,
        artifact: &Path,
    ) -> Result<(), OptimizeError>;
}

/// Runs the pre-bundling pass once at server startup.
pub struct DepOptimizer {
    config: Arc<ResolvedConfig>,
    store: MetadataStore,
    bundler: Arc<dyn DepBundler>,
}

impl DepOptimizer {
    /// Create an optimizer using the given metadata store and bundling
    /// backend.
    #[must_use]
    pub fn new(config: Arc<ResolvedConfig>, store: MetadataStore, bundler: Arc<dyn DepBundler>) -> Self {
        Self {
            config,
            store,
            bundler,
        }
    }

    /// Run the pass: scan, check staleness, rebuild when needed. Returns
    /// the metadata describing the (possibly cached) artifacts.
    pub fn run(&self) -> Result<DepMetadata, OptimizeError> {
        let packages = self.scan_entries();
        let manifest_hash = self.manifest_hash()?;

        if let Some(meta) = self.store.load() {
            if meta.manifest_hash == manifest_hash && artifacts_present(&meta, &packages) {
                debug!(
                    packages = packages.len(),
                    "dependency cache fresh, skipping pre-bundle"
                );
                return Ok(meta);
            }
            debug!("dependency cache stale, re-bundling");
        }

        let mut meta = DepMetadata::new(manifest_hash);
        if packages.is_empty() {
            self.store.save(&meta).map_err(|source| OptimizeError::Io {
                path: self.config.deps_dir.clone(),
                source,
            })?;
            return Ok(meta);
        }

        std::fs::create_dir_all(&self.config.deps_dir).map_err(|source| OptimizeError::Io {
            path: self.config.deps_dir.clone(),
            source,
        })?;

        for package in &packages {
            let entry = match self.resolve_package_entry(package) {
                Some(entry) => entry,
                None => {
                    warn!(package, "cannot resolve package entry, skipping");
                    continue;
                }
            };
            let artifact = self
                .config
                .deps_dir
                .join(format!("{}.js", sanitize_package_name(package)));
            match self.bundler.bundle_package(package, &entry, &artifact) {
                Ok(()) => {
                    meta.optimized.insert(
                        package.clone(),
                        OptimizedDep {
                            artifact_path: artifact,
                            rewrite_needed: true,
                        },
                    );
                }
                Err(err) => {
                    warn!(package, error = %err, "pre-bundle failed, skipping");
                }
            }
        }

        if meta.optimized.is_empty() {
            return Err(OptimizeError::NoDepsBundled {
                expected: packages.len(),
            });
        }

        info!(
            bundled = meta.optimized.len(),
            referenced = packages.len(),
            "pre-bundled dependencies"
        );
        self.store.save(&meta).map_err(|source| OptimizeError::Io {
            path: self.config.deps_dir.clone(),
            source,
        })?;
        Ok(meta)
    }

    /// Collect every bare package referenced from the configured entries,
    /// following relative imports recursively.
    fn scan_entries(&self) -> BTreeSet<String> {
        let mut packages = BTreeSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: Vec<PathBuf> = self
            .config
            .entries
            .iter()
            .map(|entry| self.config.entry_path(entry))
            .collect();

        while let Some(path) = queue.pop() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let Ok(source) = std::fs::read_to_string(&path) else {
                warn!(path = %path.display(), "cannot read entry during dependency scan");
                continue;
            };
            for spec in scan::extract_import_specifiers(&source) {
                if scan::is_bare_specifier(&spec) {
                    packages.insert(scan::package_name(&spec));
                } else if spec.starts_with('.') {
                    if let Some(parent) = path.parent() {
                        if let Some(found) = crate::rewrite::probe_module_path(&parent.join(&spec))
                        {
                            queue.push(found);
                        }
                    }
                }
            }
        }

        packages
    }

    /// Blake3 hash of the package manifest content. A missing manifest
    /// hashes as empty, so it still compares stably across runs.
    fn manifest_hash(&self) -> Result<String, OptimizeError> {
        let path = self.config.manifest_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(OptimizeError::Io { path, source }),
        };
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Resolve a package's on-disk entry point: manifest `module`, then
    /// `main`, then `index.js`.
    fn resolve_package_entry(&self, package: &str) -> Option<PathBuf> {
        let pkg_dir = self.config.root.join("node_modules").join(package);
        if !pkg_dir.is_dir() {
            return None;
        }

        if let Ok(bytes) = std::fs::read(pkg_dir.join("package.json")) {
            if let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                for field in ["module", "main"] {
                    if let Some(rel) = manifest.get(field).and_then(|v| v.as_str()) {
                        let candidate = pkg_dir.join(rel);
                        if candidate.is_file() {
                            return Some(candidate);
                        }
                    }
                }
            }
        }

        let index = pkg_dir.join("index.js");
        index.is_file().then_some(index)
    }
}

/// Whether every referenced package has a bundled artifact still on disk.
fn artifacts_present(meta: &DepMetadata, packages: &BTreeSet<String>) -> bool {
    packages.iter().all(|package| {
        meta.optimized
            .get(package)
            .is_some_and(|dep| dep.artifact_path.is_file())
    })
}

/// Make a package name safe as a file name (`@scope/pkg` → `scope__pkg`).
#[must_use]
pub fn sanitize_package_name(package: &str) -> String {
    package.replace('/', "__").replace('@', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBundler {
        calls: AtomicUsize,
        fail_for: Option<&'static str>,
    }

    impl CountingBundler {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_for: None,
            }
        }
    }

    impl DepBundler for CountingBundler {
        fn bundle_package(
            &self,
            package: &str,
            entry: &Path,
            artifact: &Path,
        ) -> Result<(), OptimizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for == Some(package) {
                return Err(OptimizeError::Bundle {
                    package: package.to_string(),
                    message: "backend rejected".to_string(),
                });
            }
            let source = fs::read_to_string(entry).unwrap_or_default();
            fs::write(artifact, source).map_err(|err| OptimizeError::Io {
                path: artifact.to_path_buf(),
                source: err,
            })
        }
    }

    struct Project {
        temp: tempfile::TempDir,
        config: Arc<ResolvedConfig>,
    }

    fn project(entry_source: &str, packages: &[&str]) -> Project {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.ts"), entry_source).unwrap();
        fs::write(root.join("package.json"), r#"{"name":"app","version":"1.0.0"}"#).unwrap();
        for pkg in packages {
            let dir = root.join("node_modules").join(pkg);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("package.json"), r#"{"main":"index.js"}"#).unwrap();
            fs::write(dir.join("index.js"), format!("export default '{pkg}';")).unwrap();
        }
        let config = Arc::new(ResolvedConfig::new(root).entry("src/main.ts"));
        Project { temp, config }
    }

    fn optimizer(project: &Project, bundler: Arc<CountingBundler>) -> DepOptimizer {
        let store = MetadataStore::new(project.config.deps_dir.join("metadata.json"));
        DepOptimizer::new(project.config.clone(), store, bundler)
    }

    #[test]
    fn test_first_run_bundles_and_persists() {
        let project = project("import a from 'pkg-a';\nimport b from 'pkg-b';\n", &["pkg-a", "pkg-b"]);
        let bundler = Arc::new(CountingBundler::new());
        let meta = optimizer(&project, bundler.clone()).run().unwrap();

        assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(meta.optimized.len(), 2);
        assert!(meta.optimized["pkg-a"].artifact_path.is_file());

        let targets = meta.rewrite_targets();
        assert_eq!(targets["pkg-a"], "/@deps/pkg-a.js");
    }

    #[test]
    fn test_fresh_cache_skips_bundling() {
        let project = project("import a from 'pkg-a';\n", &["pkg-a"]);
        let bundler = Arc::new(CountingBundler::new());
        optimizer(&project, bundler.clone()).run().unwrap();
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);

        // Same manifest, artifacts on disk: nothing to do.
        optimizer(&project, bundler.clone()).run().unwrap();
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manifest_change_invalidates_cache() {
        let project = project("import a from 'pkg-a';\n", &["pkg-a"]);
        let bundler = Arc::new(CountingBundler::new());
        optimizer(&project, bundler.clone()).run().unwrap();

        fs::write(
            project.temp.path().join("package.json"),
            r#"{"name":"app","version":"1.0.1"}"#,
        )
        .unwrap();

        optimizer(&project, bundler.clone()).run().unwrap();
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_artifact_forces_rebuild() {
        let project = project("import a from 'pkg-a';\n", &["pkg-a"]);
        let bundler = Arc::new(CountingBundler::new());
        let meta = optimizer(&project, bundler.clone()).run().unwrap();

        fs::remove_file(&meta.optimized["pkg-a"].artifact_path).unwrap();

        optimizer(&project, bundler.clone()).run().unwrap();
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bundler_failure_skips_package_only() {
        let project = project("import a from 'pkg-a';\nimport b from 'pkg-b';\n", &["pkg-a", "pkg-b"]);
        let bundler = Arc::new(CountingBundler {
            calls: AtomicUsize::new(0),
            fail_for: Some("pkg-b"),
        });
        let meta = optimizer(&project, bundler.clone()).run().unwrap();

        assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);
        assert!(meta.optimized.contains_key("pkg-a"));
        assert!(!meta.optimized.contains_key("pkg-b"));
    }

    #[test]
    fn test_unresolvable_package_is_skipped_not_fatal() {
        let project = project("import a from 'pkg-a';\nimport g from 'ghost';\n", &["pkg-a"]);
        let bundler = Arc::new(CountingBundler::new());
        let meta = optimizer(&project, bundler.clone()).run().unwrap();

        assert_eq!(meta.optimized.len(), 1);
        assert!(meta.optimized.contains_key("pkg-a"));
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_bundled_when_deps_expected_is_startup_error() {
        let project = project("import g from 'ghost';\n", &[]);
        let bundler = Arc::new(CountingBundler::new());
        let err = optimizer(&project, bundler).run().unwrap_err();
        assert!(matches!(err, OptimizeError::NoDepsBundled { expected: 1 }));
    }

    #[test]
    fn test_scan_follows_relative_imports() {
        let project = project("import './helper';\n", &["pkg-deep"]);
        fs::write(
            project.temp.path().join("src/helper.ts"),
            "import deep from 'pkg-deep';\n",
        )
        .unwrap();

        let bundler = Arc::new(CountingBundler::new());
        let meta = optimizer(&project, bundler).run().unwrap();
        assert!(meta.optimized.contains_key("pkg-deep"));
    }

    #[test]
    fn test_no_bare_imports_is_empty_success() {
        let project = project("const x = 1;\n", &[]);
        let bundler = Arc::new(CountingBundler::new());
        let meta = optimizer(&project, bundler.clone()).run().unwrap();
        assert!(meta.optimized.is_empty());
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sanitize_package_name() {
        assert_eq!(sanitize_package_name("react"), "react");
        assert_eq!(sanitize_package_name("@scope/pkg"), "scope__pkg");
    }
}
