// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripting bridge
//!
//! JSON in, JSON out. A web view posts `{action, callbackId, args}` calls;
//! results come back as `{callbackId, status, data, keepCallback}` messages
//! through a [`MessageSink`].

use gloc_core::{
    ArgumentsTarget, ClearWatchOptions, GeolocationError, GlocResult, LocationBackend, LocationOptions,
    PluginError, WatchOptions,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::plugin::GeolocationPlugin;
use crate::registry::{CallbackSink, PluginResult};

/// Actions the bridge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    GetCurrentPosition,
    WatchPosition,
    ClearWatch,
    AreLocationServicesEnabled,
    OnResolutionResult,
}

/// One call from the scripting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeCall {
    pub action: Action,
    pub callback_id: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// One message back to the scripting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub callback_id: String,
    pub status: Status,
    pub data: Value,
    pub keep_callback: bool,
}

impl BridgeMessage {
    pub fn ok(callback_id: impl Into<String>, data: Value, keep_callback: bool) -> Self {
        Self { callback_id: callback_id.into(), status: Status::Ok, data, keep_callback }
    }

    pub fn error(callback_id: impl Into<String>, error: &GeolocationError, keep_callback: bool) -> Self {
        let payload = PluginError::from(error);
        Self {
            callback_id: callback_id.into(),
            status: Status::Error,
            data: json!({ "code": payload.code, "message": payload.message }),
            keep_callback,
        }
    }
}

/// Where bridge messages go (the web view)
pub trait MessageSink: Send + Sync {
    fn post(&self, message: BridgeMessage);
}

/// Serializes registry deliveries into bridge messages
struct JsonSink {
    out: Arc<dyn MessageSink>,
}

impl CallbackSink for JsonSink {
    fn send(&self, callback_id: &str, result: PluginResult, keep_callback: bool) {
        let message = match result {
            Ok(position) => match serde_json::to_value(&position) {
                Ok(data) => BridgeMessage::ok(callback_id, data, keep_callback),
                Err(e) => BridgeMessage::error(callback_id, &GeolocationError::other(e), keep_callback),
            },
            Err(e) => BridgeMessage::error(callback_id, &e, keep_callback),
        };
        self.out.post(message);
    }
}

#[derive(Debug, Deserialize)]
struct ResolutionArgs {
    accepted: bool,
}

/// JSON front of a [`GeolocationPlugin`]
pub struct Bridge {
    plugin: GeolocationPlugin,
    out: Arc<dyn MessageSink>,
}

impl Bridge {
    pub fn new(backend: Arc<dyn LocationBackend>, out: Arc<dyn MessageSink>, config: PluginConfig) -> Self {
        let sink = Arc::new(JsonSink { out: out.clone() });
        Self {
            plugin: GeolocationPlugin::new(backend, sink, config),
            out,
        }
    }

    pub fn plugin(&self) -> &GeolocationPlugin {
        &self.plugin
    }

    /// Handle a raw JSON call
    ///
    /// A call that cannot even be routed back is an error for the caller of
    /// this method; everything else is answered through the message sink.
    pub async fn handle_json(&self, raw: &str) -> GlocResult<()> {
        let call: BridgeCall = serde_json::from_str(raw)
            .map_err(|e| GeolocationError::Other(format!("Malformed bridge call: {e}")))?;
        self.handle(call).await;
        Ok(())
    }

    pub async fn handle(&self, call: BridgeCall) {
        let BridgeCall { action, callback_id, args } = call;
        tracing::debug!(?action, callback = %callback_id, "bridge call");

        match action {
            Action::GetCurrentPosition => {
                match self.decode_options(&args) {
                    Ok(options) => self.plugin.get_current_position(callback_id, options),
                    Err(()) => self.reject(&callback_id, ArgumentsTarget::GetCurrentPosition),
                }
            }
            Action::WatchPosition => match decode::<WatchOptions>(&args) {
                Ok(options) => self.plugin.watch_position(callback_id, options),
                Err(()) => self.reject(&callback_id, ArgumentsTarget::WatchPosition),
            },
            Action::ClearWatch => match decode::<ClearWatchOptions>(&args) {
                Ok(options) => {
                    self.plugin.clear_watch(&options).await;
                    self.out.post(BridgeMessage::ok(callback_id, Value::Null, false));
                }
                Err(()) => self.reject(&callback_id, ArgumentsTarget::ClearWatch),
            },
            Action::AreLocationServicesEnabled => {
                let enabled = self.plugin.are_location_services_enabled();
                self.out.post(BridgeMessage::ok(callback_id, json!({ "enabled": enabled }), false));
            }
            Action::OnResolutionResult => {
                let outcome = decode::<ResolutionArgs>(&args)
                    .map_err(|()| GeolocationError::Other("Expected {\"accepted\": bool}.".into()))
                    .and_then(|args| self.plugin.on_resolution_result(args.accepted));
                let message = match outcome {
                    Ok(()) => BridgeMessage::ok(callback_id, Value::Null, false),
                    Err(e) => BridgeMessage::error(callback_id, &e, false),
                };
                self.out.post(message);
            }
        }
    }

    /// Missing options fall back to the configured defaults
    fn decode_options(&self, args: &Value) -> Result<LocationOptions, ()> {
        if args.is_null() {
            return Ok(self.plugin.config().default_options.clone());
        }
        decode(args)
    }

    fn reject(&self, callback_id: &str, target: ArgumentsTarget) {
        tracing::warn!(callback = callback_id, %target, "invalid arguments");
        self.plugin.reply(callback_id, GeolocationError::InputArgumentsInvalid(target));
    }
}

fn decode<T: DeserializeOwned>(args: &Value) -> Result<T, ()> {
    T::deserialize(args).map_err(|e| {
        tracing::debug!(error = %e, "argument decoding failed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gloc_backends::{ScriptedBackend, ScriptedStep};
    use gloc_core::{BackendCapabilities, SettingsStatus};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct WebView {
        messages: Mutex<Vec<BridgeMessage>>,
    }

    impl MessageSink for WebView {
        fn post(&self, message: BridgeMessage) {
            self.messages.lock().push(message);
        }
    }

    impl WebView {
        async fn wait_for(&self, count: usize) -> Vec<BridgeMessage> {
            for _ in 0..500 {
                if self.messages.lock().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            self.messages.lock().clone()
        }
    }

    fn bridge(capabilities: BackendCapabilities) -> (Arc<ScriptedBackend>, Arc<WebView>, Bridge) {
        let backend = Arc::new(ScriptedBackend::new("scripted", capabilities));
        let view = Arc::new(WebView::default());
        let bridge = Bridge::new(backend.clone(), view.clone(), PluginConfig::default());
        (backend, view, bridge)
    }

    #[tokio::test]
    async fn test_get_current_position_round_trip() {
        let (backend, view, bridge) = bridge(BackendCapabilities::ios());
        backend.push_fix(ScriptedStep::fix(38.7, -9.1, 5.0));

        bridge
            .handle_json(r#"{"action":"getCurrentPosition","callbackId":"c1","args":{"enableHighAccuracy":true,"timeout":5000}}"#)
            .await
            .unwrap();

        let messages = view.wait_for(1).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, Status::Ok);
        assert_eq!(messages[0].data["latitude"], json!(38.7));
        assert!(messages[0].data.get("velocity").is_none());
        assert!(!messages[0].keep_callback);
    }

    #[tokio::test]
    async fn test_bad_arguments_fail_only_the_caller() {
        let (backend, view, bridge) = bridge(BackendCapabilities::ios());

        bridge
            .handle(BridgeCall {
                action: Action::WatchPosition,
                callback_id: "w".into(),
                args: json!({ "enableHighAccuracy": true }),
            })
            .await;
        bridge
            .handle(BridgeCall {
                action: Action::ClearWatch,
                callback_id: "c".into(),
                args: json!({ "id": 42 }),
            })
            .await;
        bridge
            .handle(BridgeCall {
                action: Action::GetCurrentPosition,
                callback_id: "g".into(),
                args: json!({ "timeout": "soon" }),
            })
            .await;

        let codes: Vec<_> = view.messages.lock().iter().map(|m| (m.callback_id.clone(), m.data["code"].clone())).collect();
        assert_eq!(
            codes,
            vec![
                ("w".to_string(), json!("OS-PLUG-GLOC-0005")),
                ("c".to_string(), json!("OS-PLUG-GLOC-0006")),
                ("g".to_string(), json!("OS-PLUG-GLOC-0004")),
            ]
        );
        assert!(bridge.plugin().pending().is_empty());
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_watch_then_clear() {
        let (backend, view, bridge) = bridge(BackendCapabilities::ios());
        backend.set_updates(vec![ScriptedStep::fix(1.0, 1.0, 1.0)]);

        bridge
            .handle(BridgeCall {
                action: Action::WatchPosition,
                callback_id: "w".into(),
                args: json!({ "id": "watch-1", "enableHighAccuracy": false }),
            })
            .await;
        let messages = view.wait_for(1).await;
        assert!(messages[0].keep_callback);

        bridge
            .handle(BridgeCall { action: Action::ClearWatch, callback_id: "c".into(), args: json!({ "id": "watch-1" }) })
            .await;
        let messages = view.wait_for(2).await;
        assert_eq!(messages[1].callback_id, "c");
        assert_eq!(messages[1].status, Status::Ok);
        assert_eq!(backend.calls().stops, 1);
    }

    #[tokio::test]
    async fn test_services_enabled_and_resolution_without_pending() {
        let (backend, view, bridge) = bridge(BackendCapabilities::android());
        backend.set_services_enabled(false);

        bridge
            .handle(BridgeCall { action: Action::AreLocationServicesEnabled, callback_id: "s".into(), args: Value::Null })
            .await;
        bridge
            .handle(BridgeCall {
                action: Action::OnResolutionResult,
                callback_id: "r".into(),
                args: json!({ "accepted": true }),
            })
            .await;

        let messages = view.messages.lock().clone();
        assert_eq!(messages[0].data, json!({ "enabled": false }));
        assert_eq!(messages[1].status, Status::Error);
        assert_eq!(messages[1].data["code"], json!("OS-PLUG-GLOC-0015"));
    }

    #[tokio::test]
    async fn test_resolution_resumes_pending_request() {
        let (backend, view, bridge) = bridge(BackendCapabilities::android());
        backend.set_settings(SettingsStatus::ResolutionRequired);
        backend.push_fix(ScriptedStep::fix(59.33, 18.06, 7.0));

        bridge
            .handle(BridgeCall { action: Action::GetCurrentPosition, callback_id: "g".into(), args: Value::Null })
            .await;
        backend.resolution_launched().await;
        bridge
            .handle(BridgeCall {
                action: Action::OnResolutionResult,
                callback_id: "r".into(),
                args: json!({ "accepted": false }),
            })
            .await;

        let messages = view.wait_for(2).await;
        let denied = messages.iter().find(|m| m.callback_id == "g").unwrap();
        assert_eq!(denied.data["code"], json!("OS-PLUG-GLOC-0009"));
        assert_eq!(backend.calls().fetches, 0);
    }

    #[tokio::test]
    async fn test_unroutable_call_is_an_error() {
        let (_backend, view, bridge) = bridge(BackendCapabilities::browser());
        assert!(bridge.handle_json(r#"{"action":"teleport","callbackId":"x"}"#).await.is_err());
        assert!(view.messages.lock().is_empty());
    }
}
