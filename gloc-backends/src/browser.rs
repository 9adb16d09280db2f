//! Browser backend over `navigator.geolocation`
//!
//! The wasm glue implements [`NavigatorGeolocation`] and hands positions
//! over as the JSON the browser produced. Permission is read from the
//! Permissions API; `"prompt"` is treated as undecided and left for the
//! browser to ask on first use.

use async_trait::async_trait;
use gloc_core::{
    normalize::{fix_from_json, w3c},
    AuthorizationState, BackendCapabilities, ErrorDomain, FixRequest, GlocResult, LocationBackend,
    NativeError, NativeFix, UpdateStream,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// `PositionOptions` dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub maximum_age: u64,
}

impl From<&FixRequest> for PositionOptions {
    fn from(request: &FixRequest) -> Self {
        Self {
            enable_high_accuracy: request.enable_high_accuracy,
            timeout: request.deadline.map(|d| d.as_millis() as u64),
            maximum_age: request.maximum_age.as_millis() as u64,
        }
    }
}

pub type PositionSink = mpsc::UnboundedSender<Result<Value, NativeError>>;

/// `navigator.geolocation` plus the Permissions API
#[async_trait]
pub trait NavigatorGeolocation: Send + Sync {
    /// Whether `navigator.geolocation` exists at all
    fn is_supported(&self) -> bool;

    /// `PermissionStatus.state` for `{ name: "geolocation" }`
    fn permission_state(&self) -> String;

    async fn get_current_position(&self, options: &PositionOptions) -> Result<Value, NativeError>;

    /// Returns the browser's watch id
    fn watch_position(&self, options: &PositionOptions, sink: PositionSink) -> i32;

    fn clear_watch(&self, watch_id: i32);
}

/// Map a Permissions API state
pub fn permission_from_state(state: &str) -> AuthorizationState {
    match state {
        "granted" => AuthorizationState::Granted,
        "denied" => AuthorizationState::Denied,
        _ => AuthorizationState::NotDetermined,
    }
}

/// Browser backend
pub struct BrowserBackend<N> {
    id: String,
    navigator: Arc<N>,
    capabilities: BackendCapabilities,
    authorization: watch::Sender<AuthorizationState>,
    watch_id: Mutex<Option<i32>>,
}

impl<N: NavigatorGeolocation> BrowserBackend<N> {
    pub fn new(id: impl Into<String>, navigator: Arc<N>) -> Self {
        let (authorization, _) = watch::channel(permission_from_state(&navigator.permission_state()));
        Self {
            id: id.into(),
            navigator,
            capabilities: BackendCapabilities::browser(),
            authorization,
            watch_id: Mutex::new(None),
        }
    }

    /// `PermissionStatus` `change` event
    pub fn on_permission_change(&self, state: &str) {
        self.authorization.send_replace(permission_from_state(state));
    }
}

#[async_trait]
impl<N: NavigatorGeolocation + 'static> LocationBackend for BrowserBackend<N> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn are_location_services_enabled(&self) -> bool {
        self.navigator.is_supported()
    }

    fn authorization_state(&self) -> AuthorizationState {
        *self.authorization.borrow()
    }

    fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization.subscribe()
    }

    async fn fetch_once(&self, request: &FixRequest) -> Result<NativeFix, NativeError> {
        if !self.navigator.is_supported() {
            return Err(NativeError::new(
                ErrorDomain::W3c,
                w3c::POSITION_UNAVAILABLE,
                "Geolocation is not supported by this browser.",
            ));
        }
        let payload = self.navigator.get_current_position(&PositionOptions::from(request)).await?;
        fix_from_json(&payload)
    }

    async fn start_continuous(&self, request: &FixRequest) -> GlocResult<UpdateStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.navigator.watch_position(&PositionOptions::from(request), tx);
        if let Some(previous) = self.watch_id.lock().replace(id) {
            self.navigator.clear_watch(previous);
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            let update = rx.recv().await?;
            Some((update.and_then(|payload| fix_from_json(&payload)), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn stop_continuous(&self) {
        let previous = self.watch_id.lock().take();
        if let Some(id) = previous {
            self.navigator.clear_watch(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    struct FakeNavigator {
        permission: &'static str,
        reply: Result<Value, NativeError>,
        sinks: Mutex<Vec<PositionSink>>,
        cleared: Mutex<Vec<i32>>,
    }

    impl FakeNavigator {
        fn new(reply: Result<Value, NativeError>) -> Arc<Self> {
            Arc::new(Self {
                permission: "prompt",
                reply,
                sinks: Mutex::new(Vec::new()),
                cleared: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NavigatorGeolocation for FakeNavigator {
        fn is_supported(&self) -> bool {
            true
        }
        fn permission_state(&self) -> String {
            self.permission.to_string()
        }
        async fn get_current_position(&self, _options: &PositionOptions) -> Result<Value, NativeError> {
            self.reply.clone()
        }
        fn watch_position(&self, _options: &PositionOptions, sink: PositionSink) -> i32 {
            let mut sinks = self.sinks.lock();
            sinks.push(sink);
            sinks.len() as i32
        }
        fn clear_watch(&self, watch_id: i32) {
            self.cleared.lock().push(watch_id);
        }
    }

    fn payload() -> Value {
        json!({
            "coords": { "latitude": 40.41, "longitude": -3.70, "accuracy": 30.0,
                        "altitude": null, "altitudeAccuracy": null, "heading": null, "speed": null },
            "timestamp": 1_700_000_000_000_i64
        })
    }

    #[test]
    fn test_position_options_shape() {
        let request = FixRequest {
            enable_high_accuracy: true,
            maximum_age: Duration::from_secs(1),
            deadline: None,
            ..FixRequest::default()
        };
        let value = serde_json::to_value(PositionOptions::from(&request)).unwrap();
        assert_eq!(value, json!({ "enableHighAccuracy": true, "maximumAge": 1000 }));
    }

    #[test]
    fn test_prompt_is_undecided() {
        let backend = BrowserBackend::new("browser", FakeNavigator::new(Ok(payload())));
        assert_eq!(backend.authorization_state(), AuthorizationState::NotDetermined);
        assert!(!backend.capabilities().explicit_permission_request);

        backend.on_permission_change("denied");
        assert_eq!(backend.authorization_state(), AuthorizationState::Denied);
    }

    #[tokio::test]
    async fn test_fetch_decodes_browser_json() {
        let backend = BrowserBackend::new("browser", FakeNavigator::new(Ok(payload())));
        let fix = backend.fetch_once(&FixRequest::default()).await.unwrap();
        assert_eq!(fix.latitude, 40.41);
        assert_eq!(fix.horizontal_accuracy, 30.0);

        let denied = NativeError::new(ErrorDomain::W3c, w3c::PERMISSION_DENIED, "User denied Geolocation");
        let backend = BrowserBackend::new("browser", FakeNavigator::new(Err(denied.clone())));
        assert_eq!(backend.fetch_once(&FixRequest::default()).await.unwrap_err(), denied);
    }

    #[tokio::test]
    async fn test_watch_and_clear() {
        let navigator = FakeNavigator::new(Ok(payload()));
        let backend = BrowserBackend::new("browser", navigator.clone());

        let mut stream = backend.start_continuous(&FixRequest::default()).await.unwrap();
        let sink = navigator.sinks.lock()[0].clone();
        sink.send(Ok(payload())).unwrap();
        sink.send(Ok(json!({ "coords": "garbage" }))).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().latitude, 40.41);
        assert_eq!(stream.next().await.unwrap().unwrap_err().domain, ErrorDomain::Host);

        backend.stop_continuous().await;
        assert_eq!(*navigator.cleared.lock(), vec![1]);
    }
}
