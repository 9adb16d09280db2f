// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timeout guard
//!
//! Client-side front of every one-shot request: answers from the cache when
//! allowed, fails fast on unusable timeouts, and otherwise races the native
//! request against its own timer. Whichever side completes first wins; the
//! loser's outcome is dropped.

use chrono::Utc;
use gloc_core::{GeolocationError, GlocResult, LocationOptions, Position};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::cache::PositionCache;

/// Something that can be asked for a fresh position
///
/// Implementations must eventually complete `pending` exactly once, or drop
/// it. Completing an already-settled request is harmless.
pub trait PositionSource: Send + Sync {
    fn request(&self, options: &LocationOptions, pending: PendingRequest);
}

/// A one-shot request still waiting for its outcome
///
/// Clones share the same slot; the first completion takes it and every later
/// completion is a no-op.
#[derive(Clone)]
pub struct PendingRequest {
    id: u64,
    slot: Arc<Mutex<Option<oneshot::Sender<GlocResult<Position>>>>>,
}

impl PendingRequest {
    pub fn new(id: u64) -> (Self, oneshot::Receiver<GlocResult<Position>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id,
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (pending, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Deliver `outcome`; returns `false` if the request was already settled
    pub fn complete(&self, outcome: GlocResult<Position>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            tracing::debug!(request = self.id, "discarding late outcome for settled request");
            return false;
        };
        // receiver gone means the caller stopped waiting
        tx.send(outcome).is_ok()
    }

    pub fn succeed(&self, position: Position) -> bool {
        self.complete(Ok(position))
    }

    pub fn fail(&self, error: GeolocationError) -> bool {
        self.complete(Err(error))
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Cache-aware, timeout-enforcing front for a [`PositionSource`]
pub struct PositionGuard<S: ?Sized> {
    source: Arc<S>,
    cache: Arc<PositionCache>,
    next_id: AtomicU64,
}

impl<S: PositionSource + ?Sized> PositionGuard<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_cache(source, Arc::new(PositionCache::new()))
    }

    pub fn with_cache(source: Arc<S>, cache: Arc<PositionCache>) -> Self {
        Self {
            source,
            cache,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn cache(&self) -> &PositionCache {
        &self.cache
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Resolve one position request
    pub async fn request_position(&self, options: &LocationOptions) -> GlocResult<Position> {
        if let Some(cached) = self.cache.fresh(options.maximum_age(), Utc::now()) {
            tracing::debug!(timestamp = cached.timestamp, "answering from cached position");
            return Ok(cached);
        }

        if options.timeout.is_zero() {
            return Err(GeolocationError::NoCachedPosition);
        }
        if options.timeout.is_non_positive() {
            return Err(GeolocationError::InvalidTimeout);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (pending, rx) = PendingRequest::new(id);

        let timer = options.timeout.as_duration().map(|deadline| {
            let pending = pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if pending.fail(GeolocationError::TimedOut) {
                    tracing::warn!(request = pending.id(), ?deadline, "position request timed out");
                }
            })
        });

        tracing::debug!(request = id, timeout = ?options.timeout, "requesting native position");
        self.source.request(options, pending);

        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(GeolocationError::Other("Position request was dropped.".into())));

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Ok(position) = &outcome {
            self.cache.store(position.clone());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Replies after a fixed delay, recording every call
    struct DelayedSource {
        delay: Duration,
        reply: GlocResult<Position>,
        calls: AtomicUsize,
        late_deliveries: Arc<AtomicUsize>,
    }

    impl DelayedSource {
        fn new(delay_ms: u64, reply: GlocResult<Position>) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                reply,
                calls: AtomicUsize::new(0),
                late_deliveries: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PositionSource for DelayedSource {
        fn request(&self, _options: &LocationOptions, pending: PendingRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let reply = self.reply.clone();
            let late = self.late_deliveries.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !pending.complete(reply) {
                    late.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    }

    fn fix(timestamp: i64) -> Position {
        Position::new(38.7, -9.1, 5.0, timestamp)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_within_timeout() {
        let source = DelayedSource::new(1000, Ok(fix(Utc::now().timestamp_millis())));
        let guard = PositionGuard::new(source.clone());

        let options = LocationOptions::new().with_timeout_ms(5000);
        let position = guard.request_position(&options).await.unwrap();

        assert_eq!(position.latitude, 38.7);
        assert_eq!(source.calls(), 1);
        assert_eq!(guard.cache().latest(), Some(position));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_late_fix() {
        let source = DelayedSource::new(6000, Ok(fix(0)));
        let guard = PositionGuard::new(source.clone());

        let options = LocationOptions::new().with_timeout_ms(5000);
        let started = tokio::time::Instant::now();
        let err = guard.request_position(&options).await.unwrap_err();

        assert_eq!(err, GeolocationError::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert!(started.elapsed() < Duration::from_millis(6000));

        // let the native reply arrive
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(source.late_deliveries.load(Ordering::SeqCst), 1);
        assert!(guard.cache().latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_error_cancels_timer() {
        let source = DelayedSource::new(10, Err(GeolocationError::PositionUnavailable));
        let guard = PositionGuard::new(source);

        let options = LocationOptions::new().with_timeout_ms(5000);
        let err = guard.request_position(&options).await.unwrap_err();
        assert_eq!(err, GeolocationError::PositionUnavailable);
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_native_call() {
        let source = DelayedSource::new(0, Err(GeolocationError::PositionUnavailable));
        let guard = PositionGuard::new(source.clone());
        let cached = fix(Utc::now().timestamp_millis());
        guard.cache().store(cached.clone());

        let options = LocationOptions::new().with_timeout_ms(0).with_maximum_age_ms(60_000);
        assert_eq!(guard.request_position(&options).await.unwrap(), cached);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_without_cache() {
        let source = DelayedSource::new(0, Ok(fix(0)));
        let guard = PositionGuard::new(source.clone());

        let err = guard
            .request_position(&LocationOptions::new().with_timeout_ms(0))
            .await
            .unwrap_err();
        assert_eq!(err, GeolocationError::NoCachedPosition);

        let err = guard
            .request_position(&LocationOptions::new().with_timeout_ms(-1))
            .await
            .unwrap_err();
        assert_eq!(err, GeolocationError::InvalidTimeout);

        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_goes_native() {
        let source = DelayedSource::new(0, Ok(fix(Utc::now().timestamp_millis())));
        let guard = PositionGuard::new(source.clone());
        guard.cache().store(fix(0));

        let options = LocationOptions::new().with_maximum_age_ms(1000);
        guard.request_position(&options).await.unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_pending_request_completes_once() {
        let (pending, mut rx) = PendingRequest::new(7);
        let other = pending.clone();

        assert!(pending.fail(GeolocationError::TimedOut));
        assert!(!other.succeed(fix(0)));
        assert!(!other.is_pending());
        assert_eq!(rx.try_recv().unwrap(), Err(GeolocationError::TimedOut));
    }

    #[tokio::test]
    async fn test_dropped_source_reports_error() {
        struct Forgetful;
        impl PositionSource for Forgetful {
            fn request(&self, _options: &LocationOptions, _pending: PendingRequest) {}
        }

        let guard = PositionGuard::new(Arc::new(Forgetful));
        let err = guard.request_position(&LocationOptions::new()).await.unwrap_err();
        assert!(matches!(err, GeolocationError::Other(_)));
    }
}
