//! Unified geolocation core
//!
//! Core traits, types, and abstractions shared by every platform backend.

pub mod authorization;
pub mod backend;
pub mod error;
pub mod normalize;
pub mod options;
pub mod platform;
pub mod position;

pub use authorization::{AuthorizationRequestType, AuthorizationState, UsageDescriptions};
pub use backend::{Availability, BackendCapabilities, FixRequest, LocationBackend, SettingsStatus, UpdateStream};
pub use error::{ArgumentsTarget, GeolocationError, GlocResult, PluginError};
pub use normalize::{ErrorDomain, NativeError};
pub use options::{ClearWatchOptions, LocationOptions, Timeout, WatchOptions};
pub use platform::Runtime;
pub use position::{NativeFix, Position};
