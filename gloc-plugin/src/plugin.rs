// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plugin session
//!
//! Owns the callback registry, the orchestrator and the background tasks
//! (authorization watcher, fetch, update monitor) for one back-end. Every
//! API call registers its callback and re-runs the reconciler; so does every
//! authorization change the back-end reports.

use futures::StreamExt;
use gloc_core::{
    normalize::{normalize_error, normalize_fix},
    AuthorizationState, ClearWatchOptions, GeolocationError, GlocResult, LocationBackend, LocationOptions, Timeout,
    WatchOptions,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PluginConfig;
use crate::orchestrator::Orchestrator;
use crate::reconciler::{reconcile, Decision, ReconcileInput};
use crate::registry::{CallbackRegistry, CallbackSink, PendingSummary};

#[derive(Default)]
struct Flags {
    fix_in_flight: bool,
    prompting: bool,
    monitor: Option<JoinHandle<()>>,
    /// Options of the most recent call, used by the next fetch or monitor start
    one_shot_options: Option<LocationOptions>,
    watch_options: Option<LocationOptions>,
}

struct Session {
    backend: Arc<dyn LocationBackend>,
    orchestrator: Arc<Orchestrator>,
    registry: CallbackRegistry,
    config: PluginConfig,
    flags: Mutex<Flags>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
        if let Some(monitor) = self.flags.get_mut().monitor.take() {
            monitor.abort();
        }
    }
}

/// Geolocation plugin bound to one back-end
///
/// Must be created inside a Tokio runtime. Clones share the session.
#[derive(Clone)]
pub struct GeolocationPlugin {
    session: Arc<Session>,
}

impl GeolocationPlugin {
    pub fn new(backend: Arc<dyn LocationBackend>, sink: Arc<dyn CallbackSink>, config: PluginConfig) -> Self {
        let session = Arc::new(Session {
            orchestrator: Arc::new(Orchestrator::new(backend.clone())),
            backend,
            registry: CallbackRegistry::new(sink),
            config,
            flags: Mutex::new(Flags::default()),
            watcher: Mutex::new(None),
        });

        let authorization = session.backend.subscribe_authorization();
        let watcher = tokio::spawn(watch_authorization(Arc::downgrade(&session), authorization));
        *session.watcher.lock() = Some(watcher);

        tracing::info!(backend = session.backend.id(), "geolocation plugin ready");
        Self { session }
    }

    /// `getCurrentPosition`
    pub fn get_current_position(&self, callback_id: impl Into<String>, options: LocationOptions) {
        let callback_id = callback_id.into();
        tracing::debug!(callback = %callback_id, ?options, "getCurrentPosition");

        if options.timeout.is_non_positive() {
            self.session.registry.reply(&callback_id, Err(GeolocationError::InvalidTimeout));
            return;
        }

        let deadline = options.timeout.as_duration().map(|timeout| Instant::now() + timeout);
        self.session.registry.add_one_shot_until(callback_id, deadline);
        if let Some(deadline) = deadline {
            self.session.spawn_deadline(deadline);
        }
        self.session.flags.lock().one_shot_options = Some(options);
        self.session.evaluate();
    }

    /// `watchPosition`; results keep arriving until the watch is cleared
    pub fn watch_position(&self, callback_id: impl Into<String>, options: WatchOptions) {
        let callback_id = callback_id.into();
        tracing::debug!(callback = %callback_id, watch = %options.id, "watchPosition");

        self.session.registry.add_watch(options.id, callback_id);
        self.session.flags.lock().watch_options = Some(options.location);
        self.session.evaluate();
    }

    /// `clearWatch`; returns whether the watch existed
    pub async fn clear_watch(&self, options: &ClearWatchOptions) -> bool {
        let removed = self.session.registry.remove_watch(&options.id);
        tracing::debug!(watch = %options.id, removed, "clearWatch");

        let summary = self.session.registry.summary();
        if summary.is_empty() {
            self.session.stop_monitoring().await;
        }
        removed
    }

    pub fn are_location_services_enabled(&self) -> bool {
        self.session.backend.are_location_services_enabled()
    }

    /// The host finished the interactive settings step
    pub fn on_resolution_result(&self, accepted: bool) -> GlocResult<()> {
        self.session.orchestrator.on_resolution_result(accepted)
    }

    pub fn pending(&self) -> PendingSummary {
        self.session.registry.summary()
    }

    pub fn is_monitoring(&self) -> bool {
        self.session.flags.lock().monitor.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.session.flags.lock().fix_in_flight
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.session.orchestrator
    }

    pub fn backend(&self) -> &Arc<dyn LocationBackend> {
        &self.session.backend
    }

    pub fn config(&self) -> &PluginConfig {
        &self.session.config
    }

    /// Answer one callback directly, outside the pools
    pub(crate) fn reply(&self, callback_id: &str, error: GeolocationError) {
        self.session.registry.reply(callback_id, Err(error));
    }
}

async fn watch_authorization(session: Weak<Session>, mut rx: watch::Receiver<AuthorizationState>) {
    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        let Some(session) = session.upgrade() else { break };
        tracing::debug!(?state, "authorization changed");

        session.flags.lock().prompting = false;
        session.evaluate();
    }
}

impl Session {
    fn evaluate(self: &Arc<Self>) {
        let decision = reconcile(ReconcileInput {
            state: self.backend.authorization_state(),
            pending: self.registry.summary(),
            capabilities: self.backend.capabilities(),
            services_enabled: self.backend.are_location_services_enabled(),
            usage: &self.config.usage,
        });
        tracing::trace!(?decision, "reconciled");

        match decision {
            Decision::Idle => {}
            Decision::Fail(error) => {
                self.registry.dispatch(Err(error));
                let monitor = self.flags.lock().monitor.take();
                if let Some(monitor) = monitor {
                    monitor.abort();
                    let backend = self.backend.clone();
                    tokio::spawn(async move { backend.stop_continuous().await });
                }
            }
            Decision::RequestAuthorization(kind) => {
                {
                    let mut flags = self.flags.lock();
                    if flags.prompting {
                        return;
                    }
                    flags.prompting = true;
                }
                tracing::info!(?kind, "requesting location permission");

                let session = Arc::downgrade(self);
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    if let Err(e) = backend.request_authorization(kind).await {
                        if let Some(session) = session.upgrade() {
                            session.flags.lock().prompting = false;
                            session.registry.dispatch(Err(e));
                        }
                    }
                });
            }
            Decision::Proceed { fetch, monitor } => {
                if fetch {
                    self.spawn_fetch();
                }
                if monitor {
                    self.spawn_monitor();
                }
            }
        }
    }

    /// Time out one one-shot on its own deadline
    fn spawn_deadline(self: &Arc<Self>, deadline: Instant) {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(session) = session.upgrade() {
                session.registry.expire(Instant::now());
            }
        });
    }

    /// At most one fix is in flight; everyone waiting shares its result
    ///
    /// The fetch runs until the latest deadline among the waiting one-shots.
    /// Earlier deadlines expire on their own timers; one-shots that joined
    /// after the fetch started and outlive it get a fresh fetch.
    fn spawn_fetch(self: &Arc<Self>) {
        // pools before flags, the same order dispatch takes them in
        let Some(fetch_deadline) = self.registry.latest_deadline() else {
            return;
        };
        let timeout = match fetch_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Timeout::Millis(remaining.as_nanos().div_ceil(1_000_000).clamp(1, i64::MAX as u128) as i64)
            }
            None => Timeout::Infinite,
        };

        let options = {
            let mut flags = self.flags.lock();
            if flags.fix_in_flight {
                return;
            }
            flags.fix_in_flight = true;
            let latest = flags.one_shot_options.clone().unwrap_or_else(|| self.config.default_options.clone());
            LocationOptions { timeout, ..latest }
        };

        let session = self.clone();
        tokio::spawn(async move {
            let request = session.config.fix_request(&options);
            let outcome = session.orchestrator.fetch(&request, options.timeout).await;

            let deadline_passed = fetch_deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if deadline_passed && matches!(outcome, Err(GeolocationError::TimedOut)) {
                session.registry.expire(Instant::now());
                session.flags.lock().fix_in_flight = false;
                if session.registry.has_one_shot() {
                    tracing::debug!("re-fetching for one-shots with a later deadline");
                    session.evaluate();
                }
                return;
            }

            session
                .registry
                .dispatch_and(outcome, || session.flags.lock().fix_in_flight = false);
        });
    }

    fn spawn_monitor(self: &Arc<Self>) {
        let mut flags = self.flags.lock();
        if flags.monitor.is_some() {
            return;
        }
        let options = flags.watch_options.clone().unwrap_or_else(|| self.config.default_options.clone());
        let request = self.config.watch_request(&options);
        let orchestrator = self.orchestrator.clone();
        let session = Arc::downgrade(self);

        flags.monitor = Some(tokio::spawn(async move {
            run_monitor(session, orchestrator, request, options).await;
        }));
    }

    /// Stop continuous updates if they are running
    async fn stop_monitoring(&self) {
        let monitor = self.flags.lock().monitor.take();
        if let Some(monitor) = monitor {
            monitor.abort();
            self.backend.stop_continuous().await;
            tracing::debug!("continuous updates stopped");
        }
    }

    /// Called from inside the monitor task, which must not abort itself
    async fn finish_monitor(&self) {
        let monitor = self.flags.lock().monitor.take();
        if monitor.is_some() {
            self.backend.stop_continuous().await;
            tracing::debug!("continuous updates finished");
        }
    }
}

async fn run_monitor(
    session: Weak<Session>,
    orchestrator: Arc<Orchestrator>,
    request: gloc_core::FixRequest,
    options: LocationOptions,
) {
    let mut updates = match orchestrator.start_monitoring(&request, options.timeout).await {
        Ok(updates) => updates,
        Err(e) => {
            if let Some(session) = session.upgrade() {
                session.flags.lock().monitor.take();
                session.registry.dispatch(Err(e));
            }
            return;
        }
    };
    tracing::debug!(distance = request.minimum_update_distance, "continuous updates started");

    while let Some(update) = updates.next().await {
        let Some(session) = session.upgrade() else { return };
        match update {
            Ok(fix) => {
                session.registry.dispatch(Ok(normalize_fix(&fix)));
                if !session.registry.has_watches() {
                    session.finish_monitor().await;
                    return;
                }
            }
            Err(e) => {
                let error = normalize_error(&e);
                tracing::error!(code = %error.code(), native = %e, "continuous updates failed");
                session.registry.dispatch(Err(error));
                session.registry.clear_all();
                session.finish_monitor().await;
                return;
            }
        }
    }

    // remaining watches restart monitoring on the next evaluation
    if let Some(session) = session.upgrade() {
        tracing::debug!(watches = session.registry.summary().watches, "update stream ended");
        session.finish_monitor().await;
    }
}
