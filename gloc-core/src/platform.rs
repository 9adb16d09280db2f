//! Platform detection
//!
//! Supports: Android, iOS, and browsers (wasm32)

use serde::{Deserialize, Serialize};

use crate::backend::BackendCapabilities;

/// Runtime the plugin is embedded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Android,
    Ios,
    Browser,
}

impl Runtime {
    pub fn detect() -> Self {
        #[cfg(target_os = "android")]
        return Self::Android;

        #[cfg(target_os = "ios")]
        return Self::Ios;

        #[cfg(not(any(target_os = "android", target_os = "ios")))]
        return Self::Browser;
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        match self {
            Runtime::Android => BackendCapabilities::android(),
            Runtime::Ios => BackendCapabilities::ios(),
            Runtime::Browser => BackendCapabilities::browser(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Runtime::Android => "android",
            Runtime::Ios => "ios",
            Runtime::Browser => "browser",
        }
    }
}

impl std::str::FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Runtime::Android),
            "ios" => Ok(Runtime::Ios),
            "browser" | "web" => Ok(Runtime::Browser),
            other => Err(format!("unknown runtime: {other}")),
        }
    }
}
