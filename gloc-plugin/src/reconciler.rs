// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization reconciler
//!
//! Decides what to do next from the permission state and what is waiting.
//! Pure: it is re-run from scratch on every API call and on every observed
//! authorization change.

use gloc_core::{
    AuthorizationRequestType, AuthorizationState, BackendCapabilities, GeolocationError, UsageDescriptions,
};

use crate::registry::PendingSummary;

/// Next step for the session
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing is waiting
    Idle,
    /// Ask the platform for permission and wait for the state to change
    RequestAuthorization(AuthorizationRequestType),
    /// Fail everything that is waiting
    Fail(GeolocationError),
    /// Permission is settled; serve what is waiting
    Proceed { fetch: bool, monitor: bool },
}

/// Everything the decision depends on
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub state: AuthorizationState,
    pub pending: PendingSummary,
    pub capabilities: &'a BackendCapabilities,
    pub services_enabled: bool,
    pub usage: &'a UsageDescriptions,
}

pub fn reconcile(input: ReconcileInput<'_>) -> Decision {
    if input.pending.is_empty() {
        return Decision::Idle;
    }

    let proceed = Decision::Proceed {
        fetch: input.pending.has_one_shots(),
        monitor: input.pending.has_watches(),
    };

    match input.state {
        AuthorizationState::Granted => proceed,
        AuthorizationState::Denied => Decision::Fail(GeolocationError::PermissionDenied),
        AuthorizationState::Restricted => Decision::Fail(GeolocationError::PermissionRestricted),
        AuthorizationState::NotDetermined => {
            // the platform prompts on first use
            if !input.capabilities.explicit_permission_request {
                return proceed;
            }
            if !input.services_enabled {
                return Decision::Fail(GeolocationError::ServicesDisabled);
            }
            if !input.capabilities.requires_usage_description {
                return Decision::RequestAuthorization(AuthorizationRequestType::WhenInUse);
            }
            match input.usage.request_type() {
                Some(kind) => Decision::RequestAuthorization(kind),
                None => Decision::Fail(GeolocationError::MissingUsageConfiguration),
            }
        }
    }
}
