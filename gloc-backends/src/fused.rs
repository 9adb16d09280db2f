// SPDX-License-Identifier: AGPL-3.0-or-later
//! Android backend over the Fused Location Provider
//!
//! The JNI side implements [`FusedHost`]; this adapter turns its callbacks
//! into the shared backend contract. Permission results and settings
//! resolution outcomes arrive through the host activity, so the host calls
//! back into [`FusedLocationBackend::on_permission_result`].

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use gloc_core::{
    normalize::{host, location_settings, play_services},
    AuthorizationRequestType, AuthorizationState, Availability, BackendCapabilities, ErrorDomain,
    FixRequest, GlocResult, LocationBackend, NativeError, NativeFix, SettingsStatus, UpdateStream,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// `com.google.android.gms.location.Priority`
pub mod priority {
    pub const HIGH_ACCURACY: i32 = 100;
    pub const BALANCED_POWER_ACCURACY: i32 = 102;
}

/// `Build.VERSION_CODES.O`, first release reporting vertical accuracy
pub const SDK_VERTICAL_ACCURACY: u32 = 26;

/// `android.location.Location` as marshalled by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: f32,
    pub vertical_accuracy_meters: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    /// UTC milliseconds
    pub time: i64,
}

/// `CurrentLocationRequest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentLocationRequest {
    pub priority: i32,
    pub max_update_age_ms: u64,
    pub duration_ms: Option<u64>,
}

/// `LocationRequest` for settings checks and continuous updates
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub priority: i32,
    pub interval_ms: u64,
    pub min_update_distance_m: f64,
}

pub type LocationSink = mpsc::UnboundedSender<Result<AndroidLocation, NativeError>>;

/// Calls the adapter needs from the Android side
#[async_trait]
pub trait FusedHost: Send + Sync {
    fn sdk_int(&self) -> u32;

    /// `GoogleApiAvailability.isGooglePlayServicesAvailable`
    fn play_services_status(&self) -> i64;

    /// `GoogleApiAvailability.showErrorDialogFragment`
    fn show_error_dialog(&self, status: i64);

    fn is_location_enabled(&self) -> bool;

    fn permission_state(&self) -> AuthorizationState;

    /// Launch the runtime permission prompt; the outcome is reported later
    fn request_permissions(&self, kind: AuthorizationRequestType);

    /// `SettingsClient.checkLocationSettings`
    async fn check_location_settings(&self, request: &UpdateRequest) -> Result<(), NativeError>;

    /// Start the `ResolvableApiException` resolution intent
    fn start_resolution(&self) -> Result<(), NativeError>;

    /// `FusedLocationProviderClient.getCurrentLocation`
    async fn current_location(&self, request: &CurrentLocationRequest)
        -> Result<Option<AndroidLocation>, NativeError>;

    fn request_location_updates(&self, request: &UpdateRequest, sink: LocationSink);

    fn remove_location_updates(&self);
}

/// Fused Location Provider backend
pub struct FusedLocationBackend<H> {
    id: String,
    host: Arc<H>,
    capabilities: BackendCapabilities,
    authorization: watch::Sender<AuthorizationState>,
}

impl<H: FusedHost> FusedLocationBackend<H> {
    pub fn new(id: impl Into<String>, host: Arc<H>) -> Self {
        let (authorization, _) = watch::channel(host.permission_state());
        Self {
            id: id.into(),
            host,
            capabilities: BackendCapabilities::android(),
            authorization,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Permission prompt finished or the app came back to the foreground
    pub fn on_permission_result(&self) {
        self.authorization.send_replace(self.host.permission_state());
    }

    fn priority(request: &FixRequest) -> i32 {
        if request.enable_high_accuracy {
            priority::HIGH_ACCURACY
        } else {
            priority::BALANCED_POWER_ACCURACY
        }
    }

    fn update_request(request: &FixRequest) -> UpdateRequest {
        UpdateRequest {
            priority: Self::priority(request),
            interval_ms: request.interval.as_millis() as u64,
            min_update_distance_m: request.minimum_update_distance,
        }
    }

    fn to_native(&self, location: AndroidLocation) -> NativeFix {
        to_native(location, self.host.sdk_int())
    }
}

fn to_native(location: AndroidLocation, sdk_int: u32) -> NativeFix {
    let vertical_accuracy = if sdk_int >= SDK_VERTICAL_ACCURACY {
        location.vertical_accuracy_meters.map(f64::from)
    } else {
        None
    };

    NativeFix {
        latitude: location.latitude,
        longitude: location.longitude,
        altitude: location.altitude,
        horizontal_accuracy: f64::from(location.accuracy),
        vertical_accuracy,
        course: location.bearing.map(f64::from),
        speed: location.speed.map(f64::from),
        timestamp: Utc.timestamp_millis_opt(location.time).single().unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl<H: FusedHost + 'static> LocationBackend for FusedLocationBackend<H> {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn are_location_services_enabled(&self) -> bool {
        self.host.is_location_enabled()
    }

    fn authorization_state(&self) -> AuthorizationState {
        *self.authorization.borrow()
    }

    fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization.subscribe()
    }

    async fn fetch_once(&self, request: &FixRequest) -> Result<NativeFix, NativeError> {
        let current = CurrentLocationRequest {
            priority: Self::priority(request),
            max_update_age_ms: request.maximum_age.as_millis() as u64,
            duration_ms: request.deadline.map(|d| d.as_millis() as u64),
        };

        match self.host.current_location(&current).await? {
            Some(location) => Ok(self.to_native(location)),
            None => Err(NativeError::new(ErrorDomain::Host, host::NO_FIX, "Location unavailable.")),
        }
    }

    async fn start_continuous(&self, request: &FixRequest) -> GlocResult<UpdateStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.host.request_location_updates(&Self::update_request(request), tx);

        let sdk_int = self.host.sdk_int();
        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            let update = rx.recv().await?;
            Some((update.map(|location| to_native(location, sdk_int)), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn stop_continuous(&self) {
        self.host.remove_location_updates();
    }

    async fn request_authorization(&self, kind: AuthorizationRequestType) -> GlocResult<()> {
        self.host.request_permissions(kind);
        Ok(())
    }

    async fn check_availability(&self) -> Availability {
        let status = self.host.play_services_status();
        if status == play_services::SUCCESS {
            return Availability::Available;
        }

        let resolvable = play_services::is_user_resolvable(status);
        if resolvable {
            self.host.show_error_dialog(status);
        }
        tracing::warn!(status, resolvable, "Google Play services unavailable");
        Availability::Unavailable { resolvable }
    }

    async fn check_settings(&self, request: &FixRequest) -> SettingsStatus {
        match self.host.check_location_settings(&Self::update_request(request)).await {
            Ok(()) => SettingsStatus::Satisfied,
            Err(e)
                if e.domain == ErrorDomain::LocationSettings
                    && e.code == location_settings::RESOLUTION_REQUIRED =>
            {
                SettingsStatus::ResolutionRequired
            }
            Err(e) => SettingsStatus::Failed(e),
        }
    }

    async fn launch_resolution(&self) -> GlocResult<()> {
        self.host
            .start_resolution()
            .map_err(|e| gloc_core::normalize::normalize_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeActivity {
        sdk_int: u32,
        play_status: i64,
        dialogs: Mutex<Vec<i64>>,
        permission: Mutex<AuthorizationState>,
        settings: Option<NativeError>,
        location: Option<AndroidLocation>,
        last_current: Mutex<Option<CurrentLocationRequest>>,
        sink: Mutex<Option<LocationSink>>,
    }

    #[async_trait]
    impl FusedHost for FakeActivity {
        fn sdk_int(&self) -> u32 {
            self.sdk_int
        }
        fn play_services_status(&self) -> i64 {
            self.play_status
        }
        fn show_error_dialog(&self, status: i64) {
            self.dialogs.lock().push(status);
        }
        fn is_location_enabled(&self) -> bool {
            true
        }
        fn permission_state(&self) -> AuthorizationState {
            *self.permission.lock()
        }
        fn request_permissions(&self, _kind: AuthorizationRequestType) {}
        async fn check_location_settings(&self, _request: &UpdateRequest) -> Result<(), NativeError> {
            match &self.settings {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
        fn start_resolution(&self) -> Result<(), NativeError> {
            Ok(())
        }
        async fn current_location(
            &self,
            request: &CurrentLocationRequest,
        ) -> Result<Option<AndroidLocation>, NativeError> {
            *self.last_current.lock() = Some(request.clone());
            Ok(self.location.clone())
        }
        fn request_location_updates(&self, _request: &UpdateRequest, sink: LocationSink) {
            *self.sink.lock() = Some(sink);
        }
        fn remove_location_updates(&self) {
            self.sink.lock().take();
        }
    }

    fn location() -> AndroidLocation {
        AndroidLocation {
            latitude: 52.52,
            longitude: 13.40,
            altitude: Some(34.0),
            accuracy: 6.0,
            vertical_accuracy_meters: Some(3.0),
            bearing: Some(180.0),
            speed: Some(1.25),
            time: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_vertical_accuracy_needs_oreo() {
        let old = FusedLocationBackend::new(
            "fused",
            Arc::new(FakeActivity { sdk_int: 25, location: Some(location()), ..Default::default() }),
        );
        let fix = old.fetch_once(&FixRequest::default()).await.unwrap();
        assert_eq!(fix.vertical_accuracy, None);

        let new = FusedLocationBackend::new(
            "fused",
            Arc::new(FakeActivity { sdk_int: 33, location: Some(location()), ..Default::default() }),
        );
        let fix = new.fetch_once(&FixRequest::default()).await.unwrap();
        assert_eq!(fix.vertical_accuracy, Some(3.0));
        assert_eq!(fix.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_current_location_request_shape() {
        let activity = Arc::new(FakeActivity { sdk_int: 33, ..Default::default() });
        let backend = FusedLocationBackend::new("fused", activity.clone());

        let request = FixRequest {
            enable_high_accuracy: true,
            maximum_age: Duration::from_millis(500),
            deadline: Some(Duration::from_secs(3)),
            ..FixRequest::default()
        };
        let err = backend.fetch_once(&request).await.unwrap_err();
        assert_eq!(err.code, host::NO_FIX);

        let sent = activity.last_current.lock().clone().unwrap();
        assert_eq!(sent.priority, priority::HIGH_ACCURACY);
        assert_eq!(sent.max_update_age_ms, 500);
        assert_eq!(sent.duration_ms, Some(3000));
    }

    #[tokio::test]
    async fn test_resolvable_play_services_shows_dialog() {
        let activity = Arc::new(FakeActivity {
            play_status: play_services::SERVICE_VERSION_UPDATE_REQUIRED,
            ..Default::default()
        });
        let backend = FusedLocationBackend::new("fused", activity.clone());

        assert_eq!(backend.check_availability().await, Availability::Unavailable { resolvable: true });
        assert_eq!(*activity.dialogs.lock(), vec![play_services::SERVICE_VERSION_UPDATE_REQUIRED]);

        let broken = FusedLocationBackend::new("fused", Arc::new(FakeActivity { play_status: 13, ..Default::default() }));
        assert_eq!(broken.check_availability().await, Availability::Unavailable { resolvable: false });
    }

    #[tokio::test]
    async fn test_settings_resolution_required() {
        let activity = FakeActivity {
            settings: Some(NativeError::new(
                ErrorDomain::LocationSettings,
                location_settings::RESOLUTION_REQUIRED,
                "resolution required",
            )),
            ..Default::default()
        };
        let backend = FusedLocationBackend::new("fused", Arc::new(activity));
        assert_eq!(
            backend.check_settings(&FixRequest::default()).await,
            SettingsStatus::ResolutionRequired
        );
    }

    #[tokio::test]
    async fn test_permission_result_is_published() {
        let activity = Arc::new(FakeActivity::default());
        let backend = FusedLocationBackend::new("fused", activity.clone());
        let mut rx = backend.subscribe_authorization();
        assert_eq!(*rx.borrow(), AuthorizationState::NotDetermined);

        *activity.permission.lock() = AuthorizationState::Granted;
        backend.on_permission_result();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_granted());
    }

    #[tokio::test]
    async fn test_location_updates_stream() {
        let activity = Arc::new(FakeActivity { sdk_int: 30, ..Default::default() });
        let backend = FusedLocationBackend::new("fused", activity.clone());

        let mut stream = backend.start_continuous(&FixRequest::default()).await.unwrap();
        let sink = activity.sink.lock().clone().unwrap();
        sink.send(Ok(location())).unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().latitude, 52.52);

        drop(sink);
        backend.stop_continuous().await;
        assert!(stream.next().await.is_none());
    }
}
