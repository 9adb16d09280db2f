// SPDX-License-Identifier: AGPL-3.0-or-later
//! Location request orchestrator
//!
//! Drives one request through the back-end:
//!
//! ```text
//! Idle -> CheckingAvailability -> [AwaitingResolution] -> Fetching -> Succeeded | Failed -> Idle
//! ```
//!
//! Availability and settings checks only run on back-ends that advertise
//! them. A settings resolution suspends the request until the host reports
//! the user's answer through [`Orchestrator::on_resolution_result`].

use gloc_core::{
    normalize::{normalize_error, normalize_fix},
    Availability, FixRequest, GeolocationError, GlocResult, LocationBackend, Position, SettingsStatus,
    Timeout, UpdateStream,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Where the most recent request currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrchestratorState {
    #[default]
    Idle,
    CheckingAvailability,
    AwaitingResolution,
    Fetching,
    Succeeded,
    Failed,
}

pub struct Orchestrator {
    backend: Arc<dyn LocationBackend>,
    /// Requests suspended on the interactive settings step
    resolution_waiters: Mutex<Vec<oneshot::Sender<GlocResult<()>>>>,
    state: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn LocationBackend>) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            backend,
            resolution_waiters: Mutex::new(Vec::new()),
            state,
        }
    }

    pub fn backend(&self) -> &Arc<dyn LocationBackend> {
        &self.backend
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn has_pending_resolution(&self) -> bool {
        !self.resolution_waiters.lock().is_empty()
    }

    fn transition(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(backend = self.backend.id(), ?previous, ?next, "orchestrator transition");
        }
    }

    /// Resume requests suspended on the settings resolution
    ///
    /// Fails with [`GeolocationError::NoPendingResolution`] when nothing is
    /// waiting.
    pub fn on_resolution_result(&self, accepted: bool) -> GlocResult<()> {
        let waiters = std::mem::take(&mut *self.resolution_waiters.lock());
        if waiters.is_empty() {
            tracing::warn!(accepted, "resolution result without a pending resolution");
            return Err(GeolocationError::NoPendingResolution);
        }

        tracing::info!(accepted, waiting = waiters.len(), "settings resolution finished");
        let outcome = if accepted { Ok(()) } else { Err(GeolocationError::ResolutionDenied) };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        Ok(())
    }

    /// One fix, normalized
    pub async fn fetch(&self, request: &FixRequest, timeout: Timeout) -> GlocResult<Position> {
        let outcome = self.run_fetch(request, timeout).await;
        match &outcome {
            Ok(_) => self.transition(OrchestratorState::Succeeded),
            Err(e) => {
                tracing::error!(code = %e.code(), error = %e, "location request failed");
                self.transition(OrchestratorState::Failed);
            }
        }
        self.transition(OrchestratorState::Idle);
        outcome
    }

    /// Prepare the back-end and open its update stream
    pub async fn start_monitoring(&self, request: &FixRequest, timeout: Timeout) -> GlocResult<UpdateStream> {
        let prepared = self.prepare(request, timeout).await;
        let outcome = match prepared {
            Ok(()) => self.backend.start_continuous(request).await,
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.transition(OrchestratorState::Failed);
        }
        self.transition(OrchestratorState::Idle);
        outcome
    }

    async fn run_fetch(&self, request: &FixRequest, timeout: Timeout) -> GlocResult<Position> {
        self.prepare(request, timeout).await?;

        self.transition(OrchestratorState::Fetching);
        let fetch = self.backend.fetch_once(request);
        let native = match request.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, fetch).await {
                Ok(native) => native,
                Err(_) => {
                    tracing::warn!(?deadline, "native fetch deadline expired");
                    return Err(GeolocationError::TimedOut);
                }
            },
            None => fetch.await,
        };

        native.map(|fix| normalize_fix(&fix)).map_err(|e| normalize_error(&e))
    }

    async fn prepare(&self, request: &FixRequest, timeout: Timeout) -> GlocResult<()> {
        let capabilities = self.backend.capabilities().clone();
        self.transition(OrchestratorState::CheckingAvailability);

        if capabilities.availability_check {
            if let Availability::Unavailable { resolvable } = self.backend.check_availability().await {
                return Err(GeolocationError::ServicesUnavailable { resolvable });
            }
        }

        if timeout.is_non_positive() {
            return Err(GeolocationError::InvalidTimeout);
        }

        if capabilities.settings_resolution {
            match self.backend.check_settings(request).await {
                SettingsStatus::Satisfied => {}
                SettingsStatus::ResolutionRequired => self.await_resolution().await?,
                SettingsStatus::Failed(e) => {
                    tracing::warn!(error = %e, "location settings check failed");
                    return Err(GeolocationError::SettingsResolution(e.message));
                }
            }
        }
        Ok(())
    }

    async fn await_resolution(&self) -> GlocResult<()> {
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut waiters = self.resolution_waiters.lock();
            waiters.push(tx);
            waiters.len() == 1
        };

        self.transition(OrchestratorState::AwaitingResolution);
        // concurrent requests share one interactive step
        if first {
            if let Err(e) = self.backend.launch_resolution().await {
                tracing::error!(error = %e, "settings dialog could not be shown");
                let waiters = std::mem::take(&mut *self.resolution_waiters.lock());
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }

        rx.await.unwrap_or(Err(GeolocationError::ResolutionDenied))
    }
}
