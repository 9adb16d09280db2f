//! Request options

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Request timeout
///
/// Scripting callers express "no timeout" as `Infinity`, which reaches us as
/// `null` (or not at all) once serialized to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Timeout {
    #[default]
    Infinite,
    /// Milliseconds; zero and negative values are kept so they can be rejected
    Millis(i64),
}

impl Timeout {
    pub fn millis(ms: i64) -> Self {
        Timeout::Millis(ms)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Timeout::Infinite)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::Millis(0))
    }

    /// Zero or negative
    pub fn is_non_positive(&self) -> bool {
        matches!(self, Timeout::Millis(ms) if *ms <= 0)
    }

    /// Finite positive deadline, `None` for infinite or invalid values
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Millis(ms) if *ms > 0 => Some(Duration::from_millis(*ms as u64)),
            _ => None,
        }
    }
}

impl From<Option<f64>> for Timeout {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(ms) if ms.is_finite() && ms < i64::MAX as f64 => {
                // sub-millisecond values keep their sign instead of collapsing to 0
                let ms = if ms > 0.0 { ms.max(1.0) } else { ms.floor() };
                Timeout::Millis(ms as i64)
            }
            _ => Timeout::Infinite,
        }
    }
}

impl From<Timeout> for Option<f64> {
    fn from(value: Timeout) -> Self {
        match value {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(ms as f64),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Timeout::Millis(value.as_millis().min(i64::MAX as u128) as i64)
    }
}

/// Options accepted by `getCurrentPosition` and `watchPosition`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationOptions {
    #[serde(default)]
    pub enable_high_accuracy: bool,
    #[serde(default)]
    pub timeout: Timeout,
    /// Staleness tolerance in milliseconds; 0 disables cached answers
    #[serde(default, deserialize_with = "lenient_millis")]
    pub maximum_age: u64,
}

impl LocationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_accuracy(mut self, enabled: bool) -> Self {
        self.enable_high_accuracy = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_timeout_ms(self, ms: i64) -> Self {
        self.with_timeout(Timeout::Millis(ms))
    }

    pub fn with_maximum_age_ms(mut self, ms: u64) -> Self {
        self.maximum_age = ms;
        self
    }

    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age)
    }
}

/// `watchPosition` arguments: location options plus the caller's watch id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOptions {
    pub id: String,
    #[serde(flatten)]
    pub location: LocationOptions,
}

/// `clearWatch` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearWatchOptions {
    pub id: String,
}

/// JS numbers may arrive negative or fractional; clamp to whole milliseconds
fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(match value {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms.min(u64::MAX as f64) as u64,
        Some(ms) if ms == f64::INFINITY => u64::MAX,
        _ => 0,
    })
}
