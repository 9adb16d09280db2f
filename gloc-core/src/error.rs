//! Error types for the geolocation plugin

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type GlocResult<T> = Result<T, GeolocationError>;

/// Operation whose input arguments could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgumentsTarget {
    GetCurrentPosition,
    WatchPosition,
    ClearWatch,
}

impl std::fmt::Display for ArgumentsTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArgumentsTarget::GetCurrentPosition => "getCurrentPosition",
            ArgumentsTarget::WatchPosition => "watchPosition",
            ArgumentsTarget::ClearWatch => "clearWatch",
        };
        f.write_str(name)
    }
}

/// Main error type
///
/// Every failure a caller can observe is one of these kinds. Each kind has a
/// fixed wire code (see [`GeolocationError::code`]) that is part of the
/// external contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeolocationError {
    #[error("Position retrieval timed out.")]
    TimedOut,

    #[error("timeout value in PositionOptions set to 0 and no cached Position object available, or cached Position object's age exceeds provided PositionOptions' maximumAge parameter.")]
    NoCachedPosition,

    #[error("Timeout needs to be a positive value.")]
    InvalidTimeout,

    #[error("Location services are not enabled.")]
    ServicesDisabled,

    #[error("Location permission request was denied.")]
    PermissionDenied,

    #[error("Application's use of location services is restricted.")]
    PermissionRestricted,

    #[error("Location usage description missing from the application configuration.")]
    MissingUsageConfiguration,

    #[error("Location services unavailable (user resolvable: {resolvable}).")]
    ServicesUnavailable { resolvable: bool },

    #[error("There is an error with the location settings: {0}")]
    SettingsResolution(String),

    #[error("Request to enable location denied.")]
    ResolutionDenied,

    #[error("There was an error trying to obtain the location.")]
    PositionUnavailable,

    #[error("The '{0}' input parameters aren't valid.")]
    InputArgumentsInvalid(ArgumentsTarget),

    #[error("No location settings resolution is pending.")]
    NoPendingResolution,

    #[error("{0}")]
    Other(String),
}

impl GeolocationError {
    /// Wire code, e.g. `OS-PLUG-GLOC-0003`
    ///
    /// The two client-side timeout kinds use the shorter `OS-GLOC-` prefix,
    /// everything raised on the native side uses `OS-PLUG-GLOC-`.
    pub fn code(&self) -> String {
        match self {
            GeolocationError::TimedOut => "OS-GLOC-0001".to_string(),
            GeolocationError::NoCachedPosition => "OS-GLOC-0002".to_string(),
            other => format!("OS-PLUG-GLOC-{:04}", other.plugin_code()),
        }
    }

    fn plugin_code(&self) -> u16 {
        match self {
            GeolocationError::Other(_) => 1,
            GeolocationError::PositionUnavailable => 2,
            GeolocationError::PermissionDenied => 3,
            GeolocationError::InputArgumentsInvalid(ArgumentsTarget::GetCurrentPosition) => 4,
            GeolocationError::InputArgumentsInvalid(ArgumentsTarget::WatchPosition) => 5,
            GeolocationError::InputArgumentsInvalid(ArgumentsTarget::ClearWatch) => 6,
            GeolocationError::ServicesDisabled => 7,
            GeolocationError::PermissionRestricted => 8,
            GeolocationError::ResolutionDenied => 9,
            GeolocationError::InvalidTimeout => 10,
            GeolocationError::ServicesUnavailable { resolvable: true } => 11,
            GeolocationError::ServicesUnavailable { resolvable: false } => 12,
            GeolocationError::SettingsResolution(_) => 13,
            GeolocationError::MissingUsageConfiguration => 14,
            GeolocationError::NoPendingResolution => 15,
            // client-side kinds never reach here
            GeolocationError::TimedOut | GeolocationError::NoCachedPosition => 0,
        }
    }

    /// Whether the platform may be able to fix this through user interaction
    pub fn is_resolvable(&self) -> bool {
        matches!(self, GeolocationError::ServicesUnavailable { resolvable: true })
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            GeolocationError::PermissionDenied
                | GeolocationError::PermissionRestricted
                | GeolocationError::MissingUsageConfiguration
        )
    }

    /// Wrap any foreign error as [`GeolocationError::Other`]
    pub fn other(cause: impl std::fmt::Display) -> Self {
        GeolocationError::Other(cause.to_string())
    }
}

/// Wire-level error payload delivered to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginError {
    pub code: String,
    pub message: String,
}

impl From<&GeolocationError> for PluginError {
    fn from(err: &GeolocationError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<GeolocationError> for PluginError {
    fn from(err: GeolocationError) -> Self {
        PluginError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_side_codes() {
        assert_eq!(GeolocationError::TimedOut.code(), "OS-GLOC-0001");
        assert_eq!(GeolocationError::NoCachedPosition.code(), "OS-GLOC-0002");
    }

    #[test]
    fn test_plugin_codes_are_stable() {
        assert_eq!(GeolocationError::Other("boom".into()).code(), "OS-PLUG-GLOC-0001");
        assert_eq!(GeolocationError::PositionUnavailable.code(), "OS-PLUG-GLOC-0002");
        assert_eq!(GeolocationError::PermissionDenied.code(), "OS-PLUG-GLOC-0003");
        assert_eq!(
            GeolocationError::InputArgumentsInvalid(ArgumentsTarget::ClearWatch).code(),
            "OS-PLUG-GLOC-0006"
        );
        assert_eq!(GeolocationError::ServicesDisabled.code(), "OS-PLUG-GLOC-0007");
        assert_eq!(GeolocationError::InvalidTimeout.code(), "OS-PLUG-GLOC-0010");
        assert_eq!(
            GeolocationError::ServicesUnavailable { resolvable: true }.code(),
            "OS-PLUG-GLOC-0011"
        );
        assert_eq!(
            GeolocationError::ServicesUnavailable { resolvable: false }.code(),
            "OS-PLUG-GLOC-0012"
        );
        assert_eq!(GeolocationError::NoPendingResolution.code(), "OS-PLUG-GLOC-0015");
    }

    #[test]
    fn test_error_display() {
        let err = GeolocationError::InputArgumentsInvalid(ArgumentsTarget::WatchPosition);
        assert_eq!(err.to_string(), "The 'watchPosition' input parameters aren't valid.");

        let err = GeolocationError::ServicesUnavailable { resolvable: true };
        assert!(err.to_string().contains("user resolvable: true"));
    }

    #[test]
    fn test_plugin_error_payload() {
        let payload = PluginError::from(GeolocationError::ResolutionDenied);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["code"], "OS-PLUG-GLOC-0009");
        assert_eq!(json["message"], "Request to enable location denied.");
    }

    #[test]
    fn test_classification() {
        assert!(GeolocationError::ServicesUnavailable { resolvable: true }.is_resolvable());
        assert!(!GeolocationError::ServicesUnavailable { resolvable: false }.is_resolvable());
        assert!(GeolocationError::PermissionDenied.is_permission_error());
        assert!(!GeolocationError::TimedOut.is_permission_error());
    }
}
