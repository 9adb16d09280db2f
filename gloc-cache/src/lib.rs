//! Position caching and timeout enforcement
//!
//! The client-side shim in front of the native plugin:
//! - [`PositionCache`]: last successful one-shot fix, answered against `maximumAge`
//! - [`PositionGuard`]: fail-fast timeout checks and a timer that wins over late native results

pub mod cache;
pub mod guard;

pub use cache::{CacheStats, PositionCache};
pub use guard::{PendingRequest, PositionGuard, PositionSource};
