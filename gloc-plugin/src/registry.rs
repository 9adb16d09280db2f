// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callback registry
//!
//! Tracks which caller callbacks are waiting for a result: one-shot ids for
//! `getCurrentPosition` and `watchId -> callbackId` registrations for
//! `watchPosition`. A dispatch reaches every registered id exactly once;
//! one-shots are dropped afterwards, watches stay.

use gloc_core::{GeolocationError, Position};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome delivered to a callback
pub type PluginResult = Result<Position, GeolocationError>;

/// The host's "send this result to that callback id" primitive
pub trait CallbackSink: Send + Sync {
    /// `keep_callback` tells the host more results will follow for this id
    fn send(&self, callback_id: &str, result: PluginResult, keep_callback: bool);
}

/// Snapshot of what is waiting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub one_shots: usize,
    pub watches: usize,
}

impl PendingSummary {
    pub fn has_one_shots(&self) -> bool {
        self.one_shots > 0
    }

    pub fn has_watches(&self) -> bool {
        self.watches > 0
    }

    pub fn is_empty(&self) -> bool {
        self.one_shots == 0 && self.watches == 0
    }
}

struct OneShot {
    callback_id: String,
    /// `None` waits as long as it takes
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Pools {
    one_shots: Vec<OneShot>,
    /// watch id -> callback id
    watches: HashMap<String, String>,
}

/// Registry of pending callbacks
pub struct CallbackRegistry {
    pools: Mutex<Pools>,
    sink: Arc<dyn CallbackSink>,
}

impl CallbackRegistry {
    pub fn new(sink: Arc<dyn CallbackSink>) -> Self {
        Self {
            pools: Mutex::new(Pools::default()),
            sink,
        }
    }

    pub fn add_one_shot(&self, callback_id: impl Into<String>) {
        self.add_one_shot_until(callback_id, None);
    }

    /// Register a one-shot that times out on its own at `deadline`
    pub fn add_one_shot_until(&self, callback_id: impl Into<String>, deadline: Option<Instant>) {
        self.pools.lock().one_shots.push(OneShot {
            callback_id: callback_id.into(),
            deadline,
        });
    }

    /// Latest deadline among waiting one-shots
    ///
    /// `None` when no one-shot waits, `Some(None)` when one of them waits
    /// without a deadline.
    pub fn latest_deadline(&self) -> Option<Option<Instant>> {
        let pools = self.pools.lock();
        let mut latest = None;
        for one_shot in &pools.one_shots {
            latest = match (latest, one_shot.deadline) {
                (None, deadline) => Some(deadline),
                (Some(None), _) | (_, None) => Some(None),
                (Some(Some(a)), Some(b)) => Some(Some(a.max(b))),
            };
        }
        latest
    }

    /// Answer every one-shot whose deadline has passed with `TimedOut`
    ///
    /// Watches and one-shots still within their deadline are untouched.
    pub fn expire(&self, now: Instant) -> usize {
        let mut pools = self.pools.lock();
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut pools.one_shots)
            .into_iter()
            .partition(|one_shot| one_shot.deadline.is_some_and(|deadline| deadline <= now));
        pools.one_shots = waiting;

        for one_shot in &expired {
            tracing::warn!(callback = %one_shot.callback_id, "one-shot request timed out");
            self.sink.send(&one_shot.callback_id, Err(GeolocationError::TimedOut), false);
        }
        expired.len()
    }

    /// Register a watch; returns the callback it replaced, if any
    pub fn add_watch(&self, watch_id: impl Into<String>, callback_id: impl Into<String>) -> Option<String> {
        let watch_id = watch_id.into();
        let previous = self.pools.lock().watches.insert(watch_id.clone(), callback_id.into());
        if previous.is_some() {
            tracing::debug!(watch = %watch_id, "watch re-registered");
        }
        previous
    }

    /// Remove a watch; unknown ids are ignored
    pub fn remove_watch(&self, watch_id: &str) -> bool {
        self.pools.lock().watches.remove(watch_id).is_some()
    }

    pub fn has_one_shot(&self) -> bool {
        !self.pools.lock().one_shots.is_empty()
    }

    pub fn has_watches(&self) -> bool {
        !self.pools.lock().watches.is_empty()
    }

    pub fn summary(&self) -> PendingSummary {
        let pools = self.pools.lock();
        PendingSummary {
            one_shots: pools.one_shots.len(),
            watches: pools.watches.len(),
        }
    }

    /// Drop every registration without delivering anything
    pub fn clear_all(&self) {
        let mut pools = self.pools.lock();
        pools.one_shots.clear();
        pools.watches.clear();
    }

    /// Fan `result` out to every registered callback
    ///
    /// Returns how many callbacks were reached.
    pub fn dispatch(&self, result: PluginResult) -> usize {
        self.dispatch_and(result, || {})
    }

    /// [`dispatch`](Self::dispatch), running `settle` once the one-shot pool
    /// has been taken and before the registry accepts new callbacks
    pub fn dispatch_and(&self, result: PluginResult, settle: impl FnOnce()) -> usize {
        let mut pools = self.pools.lock();
        let one_shots = std::mem::take(&mut pools.one_shots);
        settle();

        for callback_id in pools.watches.values() {
            self.sink.send(callback_id, result.clone(), true);
        }
        for one_shot in &one_shots {
            self.sink.send(&one_shot.callback_id, result.clone(), false);
        }

        let delivered = pools.watches.len() + one_shots.len();
        match &result {
            Ok(_) => tracing::debug!(delivered, "dispatched position"),
            Err(e) => tracing::debug!(delivered, code = %e.code(), "dispatched error"),
        }
        delivered
    }

    /// Answer a single callback that never made it into the pools
    pub fn reply(&self, callback_id: &str, result: PluginResult) {
        self.sink.send(callback_id, result, false);
    }
}

/// Routes every callback id to its own async channel
#[derive(Default)]
pub struct ChannelSink {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<PluginResult>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving results for `callback_id`
    pub fn route(&self, callback_id: impl Into<String>) -> mpsc::UnboundedReceiver<PluginResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(callback_id.into(), tx);
        rx
    }

    pub fn unroute(&self, callback_id: &str) {
        self.routes.lock().remove(callback_id);
    }

    pub fn routed(&self) -> usize {
        self.routes.lock().len()
    }
}

impl CallbackSink for ChannelSink {
    fn send(&self, callback_id: &str, result: PluginResult, keep_callback: bool) {
        let mut routes = self.routes.lock();
        let Some(tx) = routes.get(callback_id) else {
            tracing::warn!(callback = callback_id, "no route for callback");
            return;
        };
        if tx.send(result).is_err() || !keep_callback {
            routes.remove(callback_id);
        }
    }
}
