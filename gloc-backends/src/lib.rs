//! Location backends for the unified geolocation plugin
//!
//! One adapter per platform stack, each behind its own feature: the Fused
//! Location Provider on Android, CoreLocation on iOS and
//! `navigator.geolocation` in browsers. The scripted backend is always
//! available for tests and the simulator.

pub mod scripted;

#[cfg(feature = "fused")]
pub mod fused;

#[cfg(feature = "core-location")]
pub mod core_location;

#[cfg(feature = "browser")]
pub mod browser;

pub use scripted::{CallCounts, Scenario, ScriptedBackend, ScriptedStep};

#[cfg(feature = "fused")]
pub use fused::{FusedHost, FusedLocationBackend};

#[cfg(feature = "core-location")]
pub use core_location::{CoreLocationBackend, CoreLocationHost};

#[cfg(feature = "browser")]
pub use browser::{BrowserBackend, NavigatorGeolocation};
