//! Location backend trait

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;

use crate::{
    authorization::{AuthorizationRequestType, AuthorizationState},
    error::GlocResult,
    normalize::NativeError,
    options::LocationOptions,
    position::NativeFix,
};

/// Continuous location updates
pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<NativeFix, NativeError>> + Send>>;

/// Which parts of the request flow a backend takes part in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Permission has to be requested explicitly before fetching
    pub explicit_permission_request: bool,
    /// The platform refuses to prompt without a configured usage description
    pub requires_usage_description: bool,
    /// Supporting runtime services must be checked before any fetch
    pub availability_check: bool,
    /// Location settings are checked and may be fixed interactively
    pub settings_resolution: bool,
}

impl BackendCapabilities {
    /// Fused Location Provider
    pub fn android() -> Self {
        Self {
            explicit_permission_request: true,
            requires_usage_description: false,
            availability_check: true,
            settings_resolution: true,
        }
    }

    /// CoreLocation
    pub fn ios() -> Self {
        Self {
            explicit_permission_request: true,
            requires_usage_description: true,
            availability_check: false,
            settings_resolution: false,
        }
    }

    /// `navigator.geolocation`; the browser prompts on first use
    pub fn browser() -> Self {
        Self::default()
    }
}

/// Outcome of the supporting-services check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable { resolvable: bool },
}

/// Outcome of a location settings check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsStatus {
    Satisfied,
    /// The user can fix the settings through an interactive step
    ResolutionRequired,
    Failed(NativeError),
}

/// Parameters handed to a backend for a fix or for continuous updates
#[derive(Debug, Clone, PartialEq)]
pub struct FixRequest {
    pub enable_high_accuracy: bool,
    /// Oldest acceptable fix the backend may return from its own cache
    pub maximum_age: Duration,
    /// Native deadline; `None` waits indefinitely
    pub deadline: Option<Duration>,
    /// Meters between continuous updates
    pub minimum_update_distance: f64,
    /// Desired interval between continuous updates
    pub interval: Duration,
}

impl FixRequest {
    pub fn from_options(options: &LocationOptions, minimum_update_distance: f64, interval: Duration) -> Self {
        Self {
            enable_high_accuracy: options.enable_high_accuracy,
            maximum_age: options.maximum_age(),
            deadline: options.timeout.as_duration(),
            minimum_update_distance,
            interval,
        }
    }
}

impl Default for FixRequest {
    fn default() -> Self {
        Self {
            enable_high_accuracy: false,
            maximum_age: Duration::ZERO,
            deadline: None,
            minimum_update_distance: 10.0,
            interval: Duration::ZERO,
        }
    }
}

/// Native location backend
///
/// The opaque platform services the plugin coordinates. Methods a backend
/// does not take part in (see [`BackendCapabilities`]) have permissive
/// defaults.
#[async_trait]
pub trait LocationBackend: Send + Sync {
    fn id(&self) -> &str;
    fn capabilities(&self) -> &BackendCapabilities;

    /// Whether location services are switched on device-wide
    fn are_location_services_enabled(&self) -> bool;

    fn authorization_state(&self) -> AuthorizationState;

    /// Observe permission changes; the current value is always available
    fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState>;

    async fn fetch_once(&self, request: &FixRequest) -> Result<NativeFix, NativeError>;
    async fn start_continuous(&self, request: &FixRequest) -> GlocResult<UpdateStream>;
    async fn stop_continuous(&self);

    async fn request_authorization(&self, _kind: AuthorizationRequestType) -> GlocResult<()> {
        Ok(())
    }

    async fn check_availability(&self) -> Availability {
        Availability::Available
    }

    async fn check_settings(&self, _request: &FixRequest) -> SettingsStatus {
        SettingsStatus::Satisfied
    }

    /// Show the interactive settings step; its outcome arrives separately
    async fn launch_resolution(&self) -> GlocResult<()> {
        Ok(())
    }
}
