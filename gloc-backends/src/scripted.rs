//! Scripted backend
//!
//! A deterministic stand-in for a platform location stack. Every reply is
//! scripted up front (or pushed while running) and every call is counted,
//! which makes it the backend of choice for tests and for the simulator.

use async_trait::async_trait;
use gloc_core::{
    normalize::host, AuthorizationRequestType, AuthorizationState, Availability, BackendCapabilities,
    ErrorDomain, FixRequest, GeolocationError, GlocResult, LocationBackend, NativeError, NativeFix,
    Runtime, SettingsStatus, UpdateStream,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

/// One scripted native reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedStep {
    /// Wait this long before replying
    pub delay_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub altitude_accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    /// Reply with this failure instead of a fix
    pub error: Option<NativeError>,
}

impl ScriptedStep {
    pub fn fix(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self { latitude, longitude, accuracy, ..Default::default() }
    }

    pub fn error(error: NativeError) -> Self {
        Self { error: Some(error), ..Default::default() }
    }

    pub fn after_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The reply, stamped with the current time
    fn outcome(&self) -> Result<NativeFix, NativeError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let mut fix = NativeFix::new(self.latitude, self.longitude, self.accuracy);
        fix.altitude = self.altitude;
        fix.vertical_accuracy = self.altitude_accuracy;
        fix.course = self.heading;
        fix.speed = self.speed;
        Ok(fix)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedAvailability {
    #[default]
    Available,
    /// Missing or outdated, fixable by the user
    Resolvable,
    Unresolvable,
}

impl From<ScriptedAvailability> for Availability {
    fn from(value: ScriptedAvailability) -> Self {
        match value {
            ScriptedAvailability::Available => Availability::Available,
            ScriptedAvailability::Resolvable => Availability::Unavailable { resolvable: true },
            ScriptedAvailability::Unresolvable => Availability::Unavailable { resolvable: false },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedSettings {
    #[default]
    Satisfied,
    ResolutionRequired,
    Failed,
}

impl From<ScriptedSettings> for SettingsStatus {
    fn from(value: ScriptedSettings) -> Self {
        match value {
            ScriptedSettings::Satisfied => SettingsStatus::Satisfied,
            ScriptedSettings::ResolutionRequired => SettingsStatus::ResolutionRequired,
            ScriptedSettings::Failed => SettingsStatus::Failed(NativeError::new(
                ErrorDomain::LocationSettings,
                gloc_core::normalize::location_settings::SETTINGS_CHANGE_UNAVAILABLE,
                "Location settings can't be changed on this device.",
            )),
        }
    }
}

/// Complete description of a scripted device
///
/// ```toml
/// runtime = "android"
/// authorization = "not_determined"
/// on_authorization_request = "granted"
///
/// [[fixes]]
/// delay_ms = 300
/// latitude = 38.7223
/// longitude = -9.1393
/// accuracy = 8.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Capability preset; defaults to the browser flow
    pub runtime: Option<Runtime>,
    pub services_enabled: bool,
    #[serde(with = "state_name")]
    pub authorization: AuthorizationState,
    /// State the user picks when prompted; `None` leaves the prompt unanswered
    #[serde(with = "optional_state_name")]
    pub on_authorization_request: Option<AuthorizationState>,
    pub availability: ScriptedAvailability,
    pub settings: ScriptedSettings,
    /// Whether the user accepts the interactive settings step
    pub accept_resolution: Option<bool>,
    /// One-shot replies, consumed in order; the last one repeats
    pub fixes: Vec<ScriptedStep>,
    /// Continuous updates, replayed every time monitoring starts
    pub updates: Vec<ScriptedStep>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            runtime: None,
            services_enabled: true,
            authorization: AuthorizationState::Granted,
            on_authorization_request: None,
            availability: ScriptedAvailability::Available,
            settings: ScriptedSettings::Satisfied,
            accept_resolution: None,
            fixes: Vec::new(),
            updates: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn from_toml(text: &str) -> GlocResult<Self> {
        toml::from_str(text).map_err(|e| GeolocationError::Other(format!("Invalid scenario: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> GlocResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GeolocationError::Other(format!("Cannot read scenario {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.runtime.map(|r| r.capabilities()).unwrap_or_default()
    }
}

/// Authorization states in scenario files use snake_case names
mod state_name {
    use gloc_core::AuthorizationState;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn name(state: AuthorizationState) -> &'static str {
        match state {
            AuthorizationState::NotDetermined => "not_determined",
            AuthorizationState::Restricted => "restricted",
            AuthorizationState::Denied => "denied",
            AuthorizationState::Granted => "granted",
        }
    }

    pub(super) fn parse(name: &str) -> Option<AuthorizationState> {
        match name {
            "not_determined" | "prompt" => Some(AuthorizationState::NotDetermined),
            "restricted" => Some(AuthorizationState::Restricted),
            "denied" => Some(AuthorizationState::Denied),
            "granted" => Some(AuthorizationState::Granted),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(state: &AuthorizationState, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(name(*state))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AuthorizationState, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("unknown authorization state: {raw}")))
    }
}

mod optional_state_name {
    use gloc_core::AuthorizationState;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        state: &Option<AuthorizationState>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match state {
            Some(state) => serializer.serialize_some(super::state_name::name(*state)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<AuthorizationState>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::state_name::parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unknown authorization state: {raw}"))),
            None => Ok(None),
        }
    }
}

/// Snapshot of how often each backend entry point was hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetches: usize,
    pub starts: usize,
    pub stops: usize,
    pub authorization_requests: usize,
    pub availability_checks: usize,
    pub settings_checks: usize,
    pub resolutions: usize,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    authorization_requests: AtomicUsize,
    availability_checks: AtomicUsize,
    settings_checks: AtomicUsize,
    resolutions: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

type Update = Result<NativeFix, NativeError>;

struct Feed {
    tx: mpsc::UnboundedSender<Update>,
    task: JoinHandle<()>,
}

/// Backend replaying a [`Scenario`]
pub struct ScriptedBackend {
    id: String,
    capabilities: BackendCapabilities,
    services_enabled: AtomicBool,
    authorization: watch::Sender<AuthorizationState>,
    on_request: Mutex<Option<AuthorizationState>>,
    availability: Mutex<Availability>,
    settings: Mutex<SettingsStatus>,
    fixes: Mutex<VecDeque<ScriptedStep>>,
    updates: Mutex<Vec<ScriptedStep>>,
    feed: Mutex<Option<Feed>>,
    resolution_launched: Notify,
    resolution_failure: Mutex<Option<GeolocationError>>,
    last_request: Mutex<Option<FixRequest>>,
    requested_kinds: Mutex<Vec<AuthorizationRequestType>>,
    counters: Counters,
}

impl ScriptedBackend {
    pub fn new(id: impl Into<String>, capabilities: BackendCapabilities) -> Self {
        let (authorization, _) = watch::channel(AuthorizationState::Granted);
        Self {
            id: id.into(),
            capabilities,
            services_enabled: AtomicBool::new(true),
            authorization,
            on_request: Mutex::new(None),
            availability: Mutex::new(Availability::Available),
            settings: Mutex::new(SettingsStatus::Satisfied),
            fixes: Mutex::new(VecDeque::new()),
            updates: Mutex::new(Vec::new()),
            feed: Mutex::new(None),
            resolution_launched: Notify::new(),
            resolution_failure: Mutex::new(None),
            last_request: Mutex::new(None),
            requested_kinds: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn from_scenario(id: impl Into<String>, scenario: &Scenario) -> Self {
        let backend = Self::new(id, scenario.capabilities());
        backend.set_services_enabled(scenario.services_enabled);
        backend.set_authorization(scenario.authorization);
        *backend.on_request.lock() = scenario.on_authorization_request;
        *backend.availability.lock() = scenario.availability.into();
        *backend.settings.lock() = scenario.settings.into();
        backend.fixes.lock().extend(scenario.fixes.iter().cloned());
        *backend.updates.lock() = scenario.updates.clone();
        backend
    }

    /// Simulate the user changing the permission outside the app
    pub fn set_authorization(&self, state: AuthorizationState) {
        let previous = self.authorization.send_replace(state);
        if previous != state {
            tracing::debug!(backend = %self.id, ?previous, ?state, "authorization changed");
        }
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.services_enabled.store(enabled, Ordering::SeqCst);
    }

    /// State the permission prompt resolves to
    pub fn answer_authorization_with(&self, state: Option<AuthorizationState>) {
        *self.on_request.lock() = state;
    }

    pub fn set_availability(&self, availability: Availability) {
        *self.availability.lock() = availability;
    }

    pub fn set_settings(&self, status: SettingsStatus) {
        *self.settings.lock() = status;
    }

    /// Make the settings dialog fail to show with `error`
    pub fn fail_resolution_launch(&self, error: Option<GeolocationError>) {
        *self.resolution_failure.lock() = error;
    }

    /// The platform closes the update stream on its own
    pub fn end_updates(&self) {
        if let Some(feed) = self.feed.lock().take() {
            feed.task.abort();
        }
    }

    pub fn push_fix(&self, step: ScriptedStep) {
        self.fixes.lock().push_back(step);
    }

    pub fn set_updates(&self, steps: Vec<ScriptedStep>) {
        *self.updates.lock() = steps;
    }

    /// Feed a continuous update right now; `false` if not monitoring
    pub fn push_update(&self, update: Update) -> bool {
        match self.feed.lock().as_ref() {
            Some(feed) => feed.tx.send(update).is_ok(),
            None => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.feed.lock().is_some()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            fetches: c.fetches.load(Ordering::SeqCst),
            starts: c.starts.load(Ordering::SeqCst),
            stops: c.stops.load(Ordering::SeqCst),
            authorization_requests: c.authorization_requests.load(Ordering::SeqCst),
            availability_checks: c.availability_checks.load(Ordering::SeqCst),
            settings_checks: c.settings_checks.load(Ordering::SeqCst),
            resolutions: c.resolutions.load(Ordering::SeqCst),
        }
    }

    pub fn last_request(&self) -> Option<FixRequest> {
        self.last_request.lock().clone()
    }

    pub fn requested_kinds(&self) -> Vec<AuthorizationRequestType> {
        self.requested_kinds.lock().clone()
    }

    /// Wait until the interactive settings step has been shown
    pub async fn resolution_launched(&self) {
        self.resolution_launched.notified().await;
    }

    fn next_fix(&self) -> Option<ScriptedStep> {
        let mut fixes = self.fixes.lock();
        if fixes.len() > 1 {
            fixes.pop_front()
        } else {
            fixes.front().cloned()
        }
    }
}

#[async_trait]
impl LocationBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn are_location_services_enabled(&self) -> bool {
        self.services_enabled.load(Ordering::SeqCst)
    }

    fn authorization_state(&self) -> AuthorizationState {
        *self.authorization.borrow()
    }

    fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization.subscribe()
    }

    async fn fetch_once(&self, request: &FixRequest) -> Result<NativeFix, NativeError> {
        bump(&self.counters.fetches);
        *self.last_request.lock() = Some(request.clone());

        let Some(step) = self.next_fix() else {
            return Err(NativeError::new(ErrorDomain::Host, host::NO_FIX, "No scripted fix left."));
        };
        if step.delay_ms > 0 {
            tokio::time::sleep(step.delay()).await;
        }
        step.outcome()
    }

    async fn start_continuous(&self, request: &FixRequest) -> GlocResult<UpdateStream> {
        bump(&self.counters.starts);
        *self.last_request.lock() = Some(request.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let script = self.updates.lock().clone();
        let feeder = tx.clone();
        let task = tokio::spawn(async move {
            for step in script {
                tokio::time::sleep(step.delay()).await;
                if feeder.send(step.outcome()).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.feed.lock().replace(Feed { tx, task }) {
            previous.task.abort();
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn stop_continuous(&self) {
        bump(&self.counters.stops);
        if let Some(feed) = self.feed.lock().take() {
            feed.task.abort();
        }
    }

    async fn request_authorization(&self, kind: AuthorizationRequestType) -> GlocResult<()> {
        bump(&self.counters.authorization_requests);
        self.requested_kinds.lock().push(kind);
        let answer = *self.on_request.lock();
        if let Some(state) = answer {
            self.set_authorization(state);
        }
        Ok(())
    }

    async fn check_availability(&self) -> Availability {
        bump(&self.counters.availability_checks);
        *self.availability.lock()
    }

    async fn check_settings(&self, _request: &FixRequest) -> SettingsStatus {
        bump(&self.counters.settings_checks);
        self.settings.lock().clone()
    }

    async fn launch_resolution(&self) -> GlocResult<()> {
        bump(&self.counters.resolutions);
        self.resolution_launched.notify_one();

        let failure = self.resolution_failure.lock().clone();
        match failure {
            Some(e) => {
                // hosts report launch failures from their own callback
                tokio::task::yield_now().await;
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_fixes_replay_in_order_and_last_repeats() {
        let backend = ScriptedBackend::new("scripted", BackendCapabilities::browser());
        backend.push_fix(ScriptedStep::fix(1.0, 1.0, 1.0));
        backend.push_fix(ScriptedStep::fix(2.0, 2.0, 2.0));

        let request = FixRequest::default();
        assert_eq!(backend.fetch_once(&request).await.unwrap().latitude, 1.0);
        assert_eq!(backend.fetch_once(&request).await.unwrap().latitude, 2.0);
        assert_eq!(backend.fetch_once(&request).await.unwrap().latitude, 2.0);
        assert_eq!(backend.calls().fetches, 3);
    }

    #[tokio::test]
    async fn test_empty_script_reports_no_fix() {
        let backend = ScriptedBackend::new("scripted", BackendCapabilities::browser());
        let err = backend.fetch_once(&FixRequest::default()).await.unwrap_err();
        assert_eq!(err.domain, ErrorDomain::Host);
        assert_eq!(err.code, host::NO_FIX);
    }

    #[tokio::test]
    async fn test_authorization_request_answers_prompt() {
        let backend = ScriptedBackend::new("scripted", BackendCapabilities::ios());
        backend.set_authorization(AuthorizationState::NotDetermined);
        backend.answer_authorization_with(Some(AuthorizationState::Granted));

        let mut rx = backend.subscribe_authorization();
        backend.request_authorization(AuthorizationRequestType::Always).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AuthorizationState::Granted);
        assert_eq!(backend.requested_kinds(), vec![AuthorizationRequestType::Always]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_updates_and_stop() {
        let backend = ScriptedBackend::new("scripted", BackendCapabilities::android());
        backend.set_updates(vec![
            ScriptedStep::fix(1.0, 1.0, 1.0).after_ms(100),
            ScriptedStep::fix(2.0, 2.0, 2.0).after_ms(100),
        ]);

        let mut stream = backend.start_continuous(&FixRequest::default()).await.unwrap();
        assert!(backend.is_monitoring());
        assert_eq!(stream.next().await.unwrap().unwrap().latitude, 1.0);
        assert_eq!(stream.next().await.unwrap().unwrap().latitude, 2.0);

        let denied = NativeError::new(ErrorDomain::CoreLocation, 1, "denied");
        assert!(backend.push_update(Err(denied.clone())));
        assert_eq!(stream.next().await.unwrap().unwrap_err(), denied);

        backend.stop_continuous().await;
        assert!(stream.next().await.is_none());
        assert!(!backend.push_update(Err(denied)));
        assert_eq!(backend.calls().stops, 1);
    }

    #[test]
    fn test_scenario_from_toml() {
        let scenario = Scenario::from_toml(
            r#"
            runtime = "android"
            authorization = "not_determined"
            on_authorization_request = "granted"
            availability = "resolvable"
            settings = "resolution_required"
            accept_resolution = true

            [[fixes]]
            delay_ms = 250
            latitude = 38.7223
            longitude = -9.1393
            accuracy = 8.0

            [[fixes]]
            error = { domain = "w3c", code = 2, message = "no signal" }
            "#,
        )
        .unwrap();

        assert_eq!(scenario.runtime, Some(Runtime::Android));
        assert_eq!(scenario.authorization, AuthorizationState::NotDetermined);
        assert_eq!(scenario.on_authorization_request, Some(AuthorizationState::Granted));
        assert!(scenario.services_enabled);
        assert_eq!(scenario.fixes.len(), 2);
        assert_eq!(scenario.fixes[0].delay_ms, 250);
        assert!(scenario.fixes[1].error.is_some());

        let backend = ScriptedBackend::from_scenario("sim", &scenario);
        assert_eq!(backend.authorization_state(), AuthorizationState::NotDetermined);
        assert_eq!(backend.capabilities(), &BackendCapabilities::android());
    }

    #[test]
    fn test_bad_scenario_is_reported() {
        let err = Scenario::from_toml("authorization = \"maybe\"").unwrap_err();
        assert!(matches!(err, GeolocationError::Other(m) if m.contains("Invalid scenario")));
    }
}
