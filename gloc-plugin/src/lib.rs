//! Unified geolocation plugin
//!
//! Bridges native location and permission events into one
//! request/response and continuous-watch model for a scripting caller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Web view (bridge.rs)  /  Rust caller (facade.rs)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │           Position cache + timeout guard (gloc-cache)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Plugin session: registry, reconciler, orchestrator         │
//! ├─────────────────────────────────────────────────────────────┤
//! │        LocationBackend (gloc-backends: fused, CoreLocation,  │
//! │                   browser, scripted)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! 1. Call [`init`] once from the embedding
//! 2. Create a [`Bridge`] (web view) or a [`Geolocation`] (Rust) inside
//!    [`runtime`]
//! 3. Forward settings resolution results to `on_resolution_result`

pub mod bridge;
pub mod config;
pub mod facade;
pub mod orchestrator;
pub mod plugin;
pub mod reconciler;
pub mod registry;

pub use bridge::{Action, Bridge, BridgeCall, BridgeMessage, MessageSink};
pub use config::{ConfigError, PluginConfig};
pub use facade::{Geolocation, PositionWatch};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use plugin::GeolocationPlugin;
pub use reconciler::{reconcile, Decision};
pub use registry::{CallbackRegistry, CallbackSink, ChannelSink, PendingSummary, PluginResult};

use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

/// Global Tokio runtime for embeddings without their own
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Initialize the global runtime
pub fn init_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("gloc")
            .enable_all()
            .build()
            .expect("Failed to create Tokio runtime")
    })
}

/// The global runtime, created on first use
pub fn runtime() -> &'static Runtime {
    init_runtime()
}

/// Initialize logging and the runtime
///
/// Call once before creating a plugin. `RUST_LOG` controls verbosity.
pub fn init() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let _ = init_runtime();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "geolocation plugin initialized");
}
