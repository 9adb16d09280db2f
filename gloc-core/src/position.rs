//! Positions

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical position delivered to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Only present when the runtime reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
    /// Degrees clockwise from true north
    pub heading: Option<f64>,
    /// Meters per second
    pub speed: Option<f64>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy,
            altitude_accuracy: None,
            heading: None,
            speed: None,
            timestamp,
        }
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Age relative to `now`; fixes stamped in the future count as fresh
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        let age_ms = now.timestamp_millis().saturating_sub(self.timestamp);
        Duration::from_millis(age_ms.max(0) as u64)
    }

    /// Whether this fix satisfies a `maximumAge` tolerance
    pub fn is_fresh(&self, maximum_age: Duration, now: DateTime<Utc>) -> bool {
        !maximum_age.is_zero() && self.age_at(now) <= maximum_age
    }
}

/// A fix as reported by a native back-end, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub horizontal_accuracy: f64,
    /// Negative means invalid
    pub vertical_accuracy: Option<f64>,
    /// Negative means invalid
    pub course: Option<f64>,
    /// Negative means invalid
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl NativeFix {
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            horizontal_accuracy,
            vertical_accuracy: None,
            course: None,
            speed: None,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
