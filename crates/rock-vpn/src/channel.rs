//! Method Channel
//!
//! The UI talks to the VPN core through named method calls with a map of
//! arguments, and receives status pushes on a second channel.
//!
//! ```text
//! UI ──MethodCall──▶ MethodChannel::handle ──▶ VpnManager ──▶ VpnBackend
//! UI ◀──onVPNStatusChanged── forward_status ◀── StatusEvent broadcast
//! ```
//!
//! | Method | Arguments | Result |
//! |--------|-----------|--------|
//! | `initialize` | - | `true` |
//! | `getCurrentStatus` | - | status map |
//! | `connect` | `serverAddress`, `username`, `password`, `sharedSecret`, `countryCode?`, `countryName?` | `true` |
//! | `connectVless` | `vlessUri`, `countryCode?`, `countryName?` | `true` |
//! | `disconnect` | - | `true` |
//! | `isConnected` | - | bool |
//! | `getConnectionDuration` | - | seconds |
//! | `testServerConnectivity` | `serverAddress`, `port?` (500) | bool |
//! | `checkPermission` | - | bool |
//! | `requestPermission` | - | bool |

use crate::credentials::VpnCredentials;
use crate::manager::{VpnError, VpnManager, DEFAULT_PROBE_PORT};
use crate::platform::VpnBackend;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Channel carrying method calls from the UI
pub const VPN_CHANNEL: &str = "com.theholylabs.network/vpn";

/// Channel carrying status pushes to the UI
pub const VPN_STATUS_CHANNEL: &str = "com.theholylabs.network/vpn_status";

/// Method invoked on the UI for every status change
pub const STATUS_CHANGED_METHOD: &str = "onVPNStatusChanged";

pub const INVALID_ARGS: &str = "INVALID_ARGS";
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
pub const DISCONNECTION_FAILED: &str = "DISCONNECTION_FAILED";

/// A named call with a map of arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Call without arguments
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Value::Null)
    }

    fn args(&self) -> Result<&Map<String, Value>, MethodResult> {
        self.arguments
            .as_object()
            .ok_or_else(|| MethodResult::error(INVALID_ARGS, "Arguments must be a map"))
    }
}

/// Reply to a method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodResult {
    Success(Value),
    Error {
        code: String,
        message: String,
        #[serde(default)]
        details: Option<Value>,
    },
    NotImplemented,
}

impl MethodResult {
    pub fn success(value: impl Into<Value>) -> Self {
        MethodResult::Success(value.into())
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        MethodResult::Error {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Check if the call succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, MethodResult::Success(_))
    }

    /// Error code, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            MethodResult::Error { code, .. } => Some(code),
            _ => None,
        }
    }

    fn from_vpn_error(err: &VpnError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

/// Dispatches method calls to a [`VpnManager`]
pub struct MethodChannel<B: VpnBackend> {
    manager: Arc<VpnManager<B>>,
}

impl<B: VpnBackend> Clone for MethodChannel<B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<B: VpnBackend> MethodChannel<B> {
    /// Create a channel over a manager
    pub fn new(manager: Arc<VpnManager<B>>) -> Self {
        Self { manager }
    }

    /// Manager behind the channel
    pub fn manager(&self) -> &Arc<VpnManager<B>> {
        &self.manager
    }

    /// Handle one call
    pub async fn handle(&self, call: MethodCall) -> MethodResult {
        debug!("Method call: {}", call.method);

        let result = match call.method.as_str() {
            "initialize" => match self.manager.initialize().await {
                Ok(()) => MethodResult::success(true),
                Err(e) => MethodResult::from_vpn_error(&e),
            },
            "getCurrentStatus" => {
                let event = self.manager.current_status().await;
                match serde_json::to_value(event) {
                    Ok(value) => MethodResult::Success(value),
                    Err(e) => MethodResult::error(CONNECTION_FAILED, e.to_string()),
                }
            }
            "connect" => self.connect(&call).await,
            "connectVless" => self.connect_vless(&call).await,
            "disconnect" => match self.manager.disconnect().await {
                Ok(()) => MethodResult::success(true),
                Err(e) => MethodResult::error(DISCONNECTION_FAILED, e.to_string()),
            },
            "isConnected" => MethodResult::success(self.manager.is_connected()),
            "getConnectionDuration" => {
                let secs = self
                    .manager
                    .connection_duration()
                    .await
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                MethodResult::success(secs)
            }
            "testServerConnectivity" => self.test_connectivity(&call).await,
            "checkPermission" => MethodResult::success(self.manager.check_permission().await),
            "requestPermission" => match self.manager.request_permission().await {
                Ok(granted) => MethodResult::success(granted),
                Err(e) => MethodResult::from_vpn_error(&e),
            },
            _ => MethodResult::NotImplemented,
        };

        if let MethodResult::Error { code, message, .. } = &result {
            warn!("Method {} failed: {} ({})", call.method, message, code);
        }
        result
    }

    async fn connect(&self, call: &MethodCall) -> MethodResult {
        let args = match call.args() {
            Ok(args) => args,
            Err(reply) => return reply,
        };

        let (Some(server), Some(username), Some(password), Some(secret)) = (
            string_arg(args, "serverAddress"),
            string_arg(args, "username"),
            string_arg(args, "password"),
            string_arg(args, "sharedSecret"),
        ) else {
            return MethodResult::error(INVALID_ARGS, "Missing required arguments");
        };

        let credentials = VpnCredentials::new(server, username, password, secret).with_country(
            string_arg(args, "countryCode"),
            string_arg(args, "countryName"),
        );

        match self.manager.connect_ipsec(credentials).await {
            Ok(()) => MethodResult::success(true),
            Err(e) => MethodResult::from_vpn_error(&e),
        }
    }

    async fn connect_vless(&self, call: &MethodCall) -> MethodResult {
        let args = match call.args() {
            Ok(args) => args,
            Err(reply) => return reply,
        };

        let Some(uri) = string_arg(args, "vlessUri") else {
            return MethodResult::error(INVALID_ARGS, "Missing vlessUri");
        };
        let code = string_arg(args, "countryCode");
        let name = string_arg(args, "countryName");

        match self
            .manager
            .connect_vless(&uri, code.as_deref(), name.as_deref())
            .await
        {
            Ok(()) => MethodResult::success(true),
            Err(e) => MethodResult::from_vpn_error(&e),
        }
    }

    async fn test_connectivity(&self, call: &MethodCall) -> MethodResult {
        let args = match call.args() {
            Ok(args) => args,
            Err(reply) => return reply,
        };

        let Some(server) = string_arg(args, "serverAddress") else {
            return MethodResult::error(INVALID_ARGS, "Missing serverAddress");
        };
        let port = match args.get("port").and_then(Value::as_u64) {
            None => DEFAULT_PROBE_PORT,
            Some(p) => match u16::try_from(p) {
                Ok(p) if p != 0 => p,
                _ => return MethodResult::error(INVALID_ARGS, format!("Invalid port: {p}")),
            },
        };

        MethodResult::success(self.manager.test_server_connectivity(&server, port).await)
    }

    /// Push every status event to `sink` as an `onVPNStatusChanged` call.
    ///
    /// The task ends when the sink is dropped.
    pub fn forward_status(&self, sink: mpsc::Sender<MethodCall>) -> JoinHandle<()> {
        let mut rx = self.manager.subscribe();

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} status events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let arguments = serde_json::to_value(&event).unwrap_or_else(|_| json!({}));
                if sink
                    .send(MethodCall::new(STATUS_CHANGED_METHOD, arguments))
                    .await
                    .is_err()
                {
                    debug!("Status listener gone");
                    break;
                }
            }
        })
    }
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}
