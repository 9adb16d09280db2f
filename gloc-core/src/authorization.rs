//! Location permission model

use serde::{Deserialize, Serialize};

/// Current location permission as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationState {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    Granted,
}

impl AuthorizationState {
    pub fn is_granted(&self) -> bool {
        *self == AuthorizationState::Granted
    }
}

/// Kind of permission to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationRequestType {
    WhenInUse,
    Always,
}

/// Usage descriptions the host application ships with
///
/// Platforms refuse to prompt for location access unless the application
/// explains why it needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UsageDescriptions {
    #[serde(default)]
    pub when_in_use: Option<String>,
    #[serde(default)]
    pub always: Option<String>,
}

impl UsageDescriptions {
    pub fn when_in_use(description: impl Into<String>) -> Self {
        Self { when_in_use: Some(description.into()), always: None }
    }

    pub fn always(description: impl Into<String>) -> Self {
        Self { when_in_use: None, always: Some(description.into()) }
    }

    /// Prefer "when in use"; `None` when nothing is configured
    pub fn request_type(&self) -> Option<AuthorizationRequestType> {
        if self.when_in_use.is_some() {
            Some(AuthorizationRequestType::WhenInUse)
        } else if self.always.is_some() {
            Some(AuthorizationRequestType::Always)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_preference() {
        let both = UsageDescriptions {
            when_in_use: Some("navigation".into()),
            always: Some("geofencing".into()),
        };
        assert_eq!(both.request_type(), Some(AuthorizationRequestType::WhenInUse));
        assert_eq!(
            UsageDescriptions::always("geofencing").request_type(),
            Some(AuthorizationRequestType::Always)
        );
        assert_eq!(UsageDescriptions::default().request_type(), None);
    }
}
