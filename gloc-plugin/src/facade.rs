// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed geolocation API
//!
//! The in-process counterpart of the scripting shim: one-shot requests go
//! through the position cache and timeout guard before reaching the plugin
//! session, watches get their own result channel.

use gloc_cache::{CacheStats, PendingRequest, PositionCache, PositionGuard, PositionSource};
use gloc_core::{
    ClearWatchOptions, GeolocationError, GlocResult, LocationBackend, LocationOptions, Position, WatchOptions,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::PluginConfig;
use crate::plugin::GeolocationPlugin;
use crate::registry::ChannelSink;

/// Feeds guarded requests into the plugin session
struct SessionSource {
    plugin: GeolocationPlugin,
    sink: Arc<ChannelSink>,
}

impl PositionSource for SessionSource {
    fn request(&self, options: &LocationOptions, pending: PendingRequest) {
        let callback_id = format!("fix-{}", pending.id());
        let mut results = self.sink.route(callback_id.clone());
        self.plugin.get_current_position(callback_id, options.clone());

        tokio::spawn(async move {
            let outcome = results
                .recv()
                .await
                .unwrap_or_else(|| Err(GeolocationError::Other("Callback dropped without a result.".into())));
            pending.complete(outcome);
        });
    }
}

/// An active `watchPosition`
pub struct PositionWatch {
    id: String,
    results: mpsc::UnboundedReceiver<GlocResult<Position>>,
}

impl PositionWatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next update; `None` once the watch is gone
    pub async fn next(&mut self) -> Option<GlocResult<Position>> {
        self.results.recv().await
    }
}

/// Geolocation API for Rust callers
pub struct Geolocation {
    guard: PositionGuard<SessionSource>,
    next_watch: AtomicU64,
}

impl Geolocation {
    pub fn new(backend: Arc<dyn LocationBackend>, config: PluginConfig) -> Self {
        Self::with_cache(backend, config, Arc::new(PositionCache::new()))
    }

    pub fn with_cache(backend: Arc<dyn LocationBackend>, config: PluginConfig, cache: Arc<PositionCache>) -> Self {
        let sink = Arc::new(ChannelSink::new());
        let plugin = GeolocationPlugin::new(backend, sink.clone(), config);
        let source = Arc::new(SessionSource { plugin, sink });
        Self {
            guard: PositionGuard::with_cache(source, cache),
            next_watch: AtomicU64::new(1),
        }
    }

    pub fn plugin(&self) -> &GeolocationPlugin {
        &self.guard.source().plugin
    }

    pub async fn get_current_position(&self, options: &LocationOptions) -> GlocResult<Position> {
        self.guard.request_position(options).await
    }

    pub fn watch_position(&self, options: LocationOptions) -> PositionWatch {
        let id = format!("watch-{}", self.next_watch.fetch_add(1, Ordering::Relaxed));
        let source = self.guard.source();
        let results = source.sink.route(id.clone());
        source.plugin.watch_position(id.clone(), WatchOptions { id: id.clone(), location: options });
        PositionWatch { id, results }
    }

    pub async fn clear_watch(&self, watch: &PositionWatch) -> bool {
        let source = self.guard.source();
        let removed = source.plugin.clear_watch(&ClearWatchOptions { id: watch.id.clone() }).await;
        source.sink.unroute(&watch.id);
        removed
    }

    pub fn are_location_services_enabled(&self) -> bool {
        self.plugin().are_location_services_enabled()
    }

    pub fn on_resolution_result(&self, accepted: bool) -> GlocResult<()> {
        self.plugin().on_resolution_result(accepted)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.guard.cache().stats()
    }

    pub fn last_position(&self) -> Option<Position> {
        self.guard.cache().latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gloc_backends::{ScriptedBackend, ScriptedStep};
    use gloc_core::{AuthorizationState, BackendCapabilities};
    use std::time::Duration;

    fn geolocation(capabilities: BackendCapabilities) -> (Arc<ScriptedBackend>, Geolocation) {
        let backend = Arc::new(ScriptedBackend::new("scripted", capabilities));
        let geolocation = Geolocation::new(backend.clone(), PluginConfig::default());
        (backend, geolocation)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_within_timeout() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        let mut step = ScriptedStep::fix(38.7223, -9.1393, 8.0).after_ms(1000);
        step.speed = Some(-1.0);
        step.heading = Some(270.0);
        backend.push_fix(step);

        let options = LocationOptions::new().with_timeout_ms(5000);
        let position = geolocation.get_current_position(&options).await.unwrap();

        assert_eq!(position.latitude, 38.7223);
        assert_eq!(position.heading, Some(270.0));
        assert_eq!(position.speed, None);
        assert_eq!(geolocation.last_position(), Some(position));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fix_times_out_and_late_result_is_dropped() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        backend.push_fix(ScriptedStep::fix(1.0, 2.0, 3.0).after_ms(6000));

        let started = tokio::time::Instant::now();
        let options = LocationOptions::new().with_timeout_ms(5000);
        let err = geolocation.get_current_position(&options).await.unwrap_err();

        assert_eq!(err, GeolocationError::TimedOut);
        assert_eq!(err.code(), "OS-GLOC-0001");
        assert!(started.elapsed() < Duration::from_millis(6000));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(geolocation.last_position().is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_answers_without_native_call() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        backend.push_fix(ScriptedStep::fix(1.0, 2.0, 3.0));

        let first = geolocation.get_current_position(&LocationOptions::new()).await.unwrap();
        let cached = geolocation
            .get_current_position(&LocationOptions::new().with_timeout_ms(0).with_maximum_age_ms(60_000))
            .await
            .unwrap();

        assert_eq!(first, cached);
        assert_eq!(backend.calls().fetches, 1);
        assert_eq!(geolocation.cache_stats().hit_count, 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_without_cache() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        let err = geolocation
            .get_current_position(&LocationOptions::new().with_timeout_ms(0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OS-GLOC-0002");
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_denied_reaches_one_shot_and_watch() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        backend.set_authorization(AuthorizationState::Denied);

        let mut watch = geolocation.watch_position(LocationOptions::new());
        assert_eq!(watch.next().await, Some(Err(GeolocationError::PermissionDenied)));

        let err = geolocation.get_current_position(&LocationOptions::new()).await.unwrap_err();
        assert_eq!(err, GeolocationError::PermissionDenied);
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_watch_does_not_refresh_cache() {
        let (backend, geolocation) = geolocation(BackendCapabilities::ios());
        backend.set_updates(vec![ScriptedStep::fix(3.0, 4.0, 5.0)]);

        let mut watch = geolocation.watch_position(LocationOptions::new().with_high_accuracy(true));
        assert_eq!(watch.next().await.unwrap().unwrap().latitude, 3.0);
        assert!(geolocation.last_position().is_none());
        assert_eq!(backend.last_request().unwrap().minimum_update_distance, 5.0);

        assert!(geolocation.clear_watch(&watch).await);
        assert_eq!(backend.calls().stops, 1);
        assert!(watch.next().await.is_none());
    }
}
