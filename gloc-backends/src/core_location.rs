// SPDX-License-Identifier: AGPL-3.0-or-later
//! iOS backend over CoreLocation
//!
//! `CLLocationManager` reports through a delegate. The Swift side implements
//! [`CoreLocationHost`] for the manager calls and forwards every delegate
//! callback to the `did_*` methods here, which fan them out to whoever is
//! waiting.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use gloc_core::{
    normalize::host, AuthorizationRequestType, AuthorizationState, BackendCapabilities, ErrorDomain,
    FixRequest, GlocResult, LocationBackend, NativeError, NativeFix, UpdateStream,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// `CLAuthorizationStatus` raw values
pub mod authorization_status {
    pub const NOT_DETERMINED: i32 = 0;
    pub const RESTRICTED: i32 = 1;
    pub const DENIED: i32 = 2;
    pub const AUTHORIZED_ALWAYS: i32 = 3;
    pub const AUTHORIZED_WHEN_IN_USE: i32 = 4;
}

/// Map a raw `CLAuthorizationStatus`; unknown future values count as undecided
pub fn authorization_from_raw(raw: i32) -> AuthorizationState {
    use authorization_status::*;
    match raw {
        RESTRICTED => AuthorizationState::Restricted,
        DENIED => AuthorizationState::Denied,
        AUTHORIZED_ALWAYS | AUTHORIZED_WHEN_IN_USE => AuthorizationState::Granted,
        NOT_DETERMINED => AuthorizationState::NotDetermined,
        other => {
            tracing::warn!(raw = other, "unknown CLAuthorizationStatus");
            AuthorizationState::NotDetermined
        }
    }
}

/// `desiredAccuracy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredAccuracy {
    /// `kCLLocationAccuracyBest`
    Best,
    /// `kCLLocationAccuracyHundredMeters`
    HundredMeters,
}

/// `CLLocation` as marshalled by the host
#[derive(Debug, Clone, PartialEq)]
pub struct ClLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    /// Negative when altitude is invalid
    pub vertical_accuracy: f64,
    /// Negative when invalid
    pub course: f64,
    /// Negative when invalid
    pub speed: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl From<&ClLocation> for NativeFix {
    fn from(location: &ClLocation) -> Self {
        let millis = (location.timestamp * 1000.0).round() as i64;
        NativeFix {
            latitude: location.latitude,
            longitude: location.longitude,
            altitude: (location.vertical_accuracy >= 0.0).then_some(location.altitude),
            horizontal_accuracy: location.horizontal_accuracy,
            vertical_accuracy: Some(location.vertical_accuracy),
            course: Some(location.course),
            speed: Some(location.speed),
            timestamp: Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now),
        }
    }
}

/// `CLLocationManager` calls the adapter needs
pub trait CoreLocationHost: Send + Sync {
    fn authorization_status(&self) -> i32;
    fn location_services_enabled(&self) -> bool;
    fn request_when_in_use_authorization(&self);
    fn request_always_authorization(&self);
    fn configure(&self, accuracy: DesiredAccuracy, distance_filter: Option<f64>);
    fn request_location(&self);
    fn start_updating_location(&self);
    fn stop_updating_location(&self);
}

type Reply = Result<NativeFix, NativeError>;

#[derive(Default)]
struct Listeners {
    one_shots: Vec<oneshot::Sender<Reply>>,
    monitor: Option<mpsc::UnboundedSender<Reply>>,
}

impl Listeners {
    fn deliver(&mut self, reply: Reply) {
        for waiter in self.one_shots.drain(..) {
            let _ = waiter.send(reply.clone());
        }
        if let Some(monitor) = &self.monitor {
            if monitor.send(reply).is_err() {
                self.monitor = None;
            }
        }
    }
}

/// CoreLocation backend
pub struct CoreLocationBackend<H> {
    id: String,
    host: Arc<H>,
    capabilities: BackendCapabilities,
    authorization: watch::Sender<AuthorizationState>,
    listeners: Mutex<Listeners>,
}

impl<H: CoreLocationHost> CoreLocationBackend<H> {
    pub fn new(id: impl Into<String>, host: Arc<H>) -> Self {
        let (authorization, _) = watch::channel(authorization_from_raw(host.authorization_status()));
        Self {
            id: id.into(),
            host,
            capabilities: BackendCapabilities::ios(),
            authorization,
            listeners: Mutex::new(Listeners::default()),
        }
    }

    /// `locationManagerDidChangeAuthorization`
    pub fn did_change_authorization(&self, raw: i32) {
        self.authorization.send_replace(authorization_from_raw(raw));
    }

    /// `locationManager(_:didUpdateLocations:)`; only the newest location counts
    pub fn did_update_locations(&self, locations: &[ClLocation]) {
        let reply = match locations.last() {
            Some(latest) => Ok(NativeFix::from(latest)),
            None => Err(NativeError::new(ErrorDomain::Host, host::NO_FIX, "No location in update.")),
        };
        self.listeners.lock().deliver(reply);
    }

    /// `locationManager(_:didFailWithError:)` with a `CLError` code
    pub fn did_fail_with_error(&self, code: i64, message: impl Into<String>) {
        let error = NativeError::new(ErrorDomain::CoreLocation, code, message);
        self.listeners.lock().deliver(Err(error));
    }

    fn configure(&self, request: &FixRequest, continuous: bool) {
        let accuracy = if request.enable_high_accuracy {
            DesiredAccuracy::Best
        } else {
            DesiredAccuracy::HundredMeters
        };
        let distance_filter = continuous.then_some(request.minimum_update_distance);
        self.host.configure(accuracy, distance_filter);
    }
}

#[async_trait]
impl<H: CoreLocationHost + 'static> LocationBackend for CoreLocationBackend<H> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn are_location_services_enabled(&self) -> bool {
        self.host.location_services_enabled()
    }

    fn authorization_state(&self) -> AuthorizationState {
        *self.authorization.borrow()
    }

    fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization.subscribe()
    }

    async fn fetch_once(&self, request: &FixRequest) -> Result<NativeFix, NativeError> {
        let (tx, rx) = oneshot::channel();
        self.listeners.lock().one_shots.push(tx);

        self.configure(request, false);
        self.host.request_location();

        rx.await
            .unwrap_or_else(|_| Err(NativeError::host("Location manager went away.")))
    }

    async fn start_continuous(&self, request: &FixRequest) -> GlocResult<UpdateStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().monitor = Some(tx);

        self.configure(request, true);
        self.host.start_updating_location();

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|reply| (reply, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn stop_continuous(&self) {
        self.listeners.lock().monitor = None;
        self.host.stop_updating_location();
    }

    async fn request_authorization(&self, kind: AuthorizationRequestType) -> GlocResult<()> {
        match kind {
            AuthorizationRequestType::WhenInUse => self.host.request_when_in_use_authorization(),
            AuthorizationRequestType::Always => self.host.request_always_authorization(),
        }
        Ok(())
    }
}
