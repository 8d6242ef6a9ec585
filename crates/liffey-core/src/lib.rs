#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Unbundled development server engine.
//!
//! Serves individual ES modules on demand instead of a single bundle.
//! Each request runs a resolve → load → transform pipeline, with results
//! cached in a module graph until the backing file changes. File changes
//! propagate as hot-update messages computed from the graph's import edges.

pub mod config;
pub mod graph;
pub mod hmr;
pub mod optimize;
pub mod plugin;
pub mod rewrite;
pub mod scan;
pub mod sourcemap;
pub mod transform;

pub use config::ResolvedConfig;
pub use graph::{normalize_url, ModuleGraph, ModuleNode};
pub use hmr::{ChannelMessage, HmrEngine, HotUpdate, HotUpdateKind};
pub use optimize::{DepBundler, DepMetadata, DepOptimizer, MetadataStore, OptimizeError};
pub use plugin::{
    CssPlugin, HookResult, HotUpdateContext, HotUpdateDecision, JsonPlugin, LoadResult, Plugin,
    PluginContainer, PluginError, ServerContext, TransformResult,
};
pub use rewrite::ImportRewritePlugin;
pub use sourcemap::PositionMap;
pub use transform::{TransformError, TransformOrchestrator};
