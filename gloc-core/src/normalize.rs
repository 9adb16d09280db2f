// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result normalization
//!
//! Turns whatever a native back-end hands back into either a canonical
//! [`Position`] or a tagged [`GeolocationError`]. Nothing here panics on bad
//! input.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GeolocationError, GlocResult};
use crate::position::{NativeFix, Position};

/// Where a native failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorDomain {
    /// `GeolocationPositionError` codes from a browser
    W3c,
    /// `CLError` codes
    CoreLocation,
    /// `ConnectionResult` codes from Google Play services
    PlayServices,
    /// `LocationSettingsStatusCodes`
    LocationSettings,
    /// Anything raised by the embedding itself
    Host,
}

/// A native failure, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    pub domain: ErrorDomain,
    pub code: i64,
    pub message: String,
}

impl NativeError {
    pub fn new(domain: ErrorDomain, code: i64, message: impl Into<String>) -> Self {
        Self { domain, code, message: message.into() }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Host, 0, message)
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} error {}: {}", self.domain, self.code, self.message)
    }
}

pub mod host {
    pub const UNEXPECTED: i64 = 0;
    /// The platform finished without producing a fix
    pub const NO_FIX: i64 = 1;
    pub const MALFORMED_PAYLOAD: i64 = 2;
}

pub mod w3c {
    pub const PERMISSION_DENIED: i64 = 1;
    pub const POSITION_UNAVAILABLE: i64 = 2;
    pub const TIMEOUT: i64 = 3;
}

pub mod core_location {
    pub const LOCATION_UNKNOWN: i64 = 0;
    pub const DENIED: i64 = 1;
    pub const NETWORK: i64 = 2;
}

pub mod play_services {
    pub const SUCCESS: i64 = 0;
    pub const SERVICE_MISSING: i64 = 1;
    pub const SERVICE_VERSION_UPDATE_REQUIRED: i64 = 2;
    pub const SERVICE_DISABLED: i64 = 3;
    pub const SERVICE_INVALID: i64 = 9;
    pub const SERVICE_UPDATING: i64 = 18;

    /// Codes the platform can fix with a user-facing dialog
    pub fn is_user_resolvable(code: i64) -> bool {
        matches!(
            code,
            SERVICE_MISSING | SERVICE_VERSION_UPDATE_REQUIRED | SERVICE_DISABLED | SERVICE_INVALID | SERVICE_UPDATING
        )
    }
}

pub mod location_settings {
    pub const RESOLUTION_REQUIRED: i64 = 6;
    pub const SETTINGS_CHANGE_UNAVAILABLE: i64 = 8502;
}

/// Map a native failure onto the canonical taxonomy
pub fn normalize_error(err: &NativeError) -> GeolocationError {
    match err.domain {
        ErrorDomain::W3c => match err.code {
            w3c::PERMISSION_DENIED => GeolocationError::PermissionDenied,
            w3c::POSITION_UNAVAILABLE => GeolocationError::PositionUnavailable,
            w3c::TIMEOUT => GeolocationError::TimedOut,
            _ => GeolocationError::other(err),
        },
        ErrorDomain::CoreLocation => match err.code {
            core_location::LOCATION_UNKNOWN | core_location::NETWORK => {
                GeolocationError::PositionUnavailable
            }
            core_location::DENIED => GeolocationError::PermissionDenied,
            _ => GeolocationError::other(err),
        },
        ErrorDomain::PlayServices => GeolocationError::ServicesUnavailable {
            resolvable: play_services::is_user_resolvable(err.code),
        },
        ErrorDomain::LocationSettings => GeolocationError::SettingsResolution(err.message.clone()),
        ErrorDomain::Host => match err.code {
            host::NO_FIX => GeolocationError::PositionUnavailable,
            _ => GeolocationError::other(err),
        },
    }
}

/// Map a native fix onto the canonical shape
pub fn normalize_fix(fix: &NativeFix) -> Position {
    Position {
        latitude: fix.latitude,
        longitude: fix.longitude,
        altitude: fix.altitude,
        accuracy: fix.horizontal_accuracy,
        altitude_accuracy: valid(fix.vertical_accuracy),
        heading: valid(fix.course),
        speed: valid(fix.speed),
        timestamp: fix.timestamp.timestamp_millis(),
    }
}

fn valid(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coordinates {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    altitude_accuracy: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    /// Older plugin builds reported speed under this name
    #[serde(default)]
    velocity: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePosition {
    Nested { coords: Coordinates, timestamp: f64 },
    Flat {
        #[serde(flatten)]
        coords: Coordinates,
        timestamp: f64,
    },
}

fn decode_wire(value: &Value) -> Result<(Coordinates, f64), String> {
    let wire = WirePosition::deserialize(value).map_err(|e| format!("Malformed position payload: {e}"))?;

    let (mut coords, timestamp) = match wire {
        WirePosition::Nested { coords, timestamp } | WirePosition::Flat { coords, timestamp } => {
            (coords, timestamp)
        }
    };

    if !coords.latitude.is_finite() || !coords.longitude.is_finite() || !timestamp.is_finite() {
        return Err("Malformed position payload: non-finite value".into());
    }

    if let Some(velocity) = coords.velocity.take() {
        tracing::trace!("mapping legacy velocity field to speed");
        coords.speed = Some(velocity);
    }
    Ok((coords, timestamp))
}

/// Normalize a JSON position payload
///
/// Accepts the current flat shape, the legacy flat shape (with `velocity`)
/// and the nested `{coords, timestamp}` shape browsers use.
pub fn normalize_json(value: &Value) -> GlocResult<Position> {
    let (coords, timestamp) = decode_wire(value).map_err(GeolocationError::Other)?;

    Ok(Position {
        latitude: coords.latitude,
        longitude: coords.longitude,
        altitude: coords.altitude,
        accuracy: coords.accuracy.unwrap_or_default(),
        altitude_accuracy: coords.altitude_accuracy,
        heading: coords.heading,
        speed: coords.speed,
        timestamp: timestamp as i64,
    })
}

/// Decode a JSON position payload into a native fix
///
/// For back-ends whose platform speaks JSON; the result still goes through
/// [`normalize_fix`] like any other native fix.
pub fn fix_from_json(value: &Value) -> Result<NativeFix, NativeError> {
    let (coords, timestamp) =
        decode_wire(value).map_err(|m| NativeError::new(ErrorDomain::Host, host::MALFORMED_PAYLOAD, m))?;

    let timestamp = Utc.timestamp_millis_opt(timestamp as i64).single().ok_or_else(|| {
        NativeError::new(ErrorDomain::Host, host::MALFORMED_PAYLOAD, "timestamp out of range")
    })?;

    Ok(NativeFix {
        latitude: coords.latitude,
        longitude: coords.longitude,
        altitude: coords.altitude,
        horizontal_accuracy: coords.accuracy.unwrap_or_default(),
        vertical_accuracy: coords.altitude_accuracy,
        course: coords.heading,
        speed: coords.speed,
        timestamp,
    })
}
