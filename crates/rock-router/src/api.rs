//! Proxy Router API Types
//!
//! JSON bodies exchanged with the router backend. Field names are camelCase
//! on the wire. Response fields the backend may omit carry serde defaults.
//!
//! | Endpoint | Method | Request | Response |
//! |----------|--------|---------|----------|
//! | `/api/proxy/register` | POST | [`RegisterRequest`] | [`RegisterResponse`] |
//! | `/api/proxy/heartbeat` | POST | [`HeartbeatRequest`] | [`HeartbeatResponse`] |
//! | `/api/proxy/clients` | GET | - | [`ClientsResponse`] |
//! | `/api/proxy/route` | POST | [`RouteRequest`] | [`RouteResponse`] |
//! | `/api/proxy/ping-ip` | POST | [`PingRequest`] | [`PingResponse`] |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Router endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Register,
    Heartbeat,
    Clients,
    Route,
    PingIp,
}

impl Endpoint {
    /// Path relative to the base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Register => "api/proxy/register",
            Endpoint::Heartbeat => "api/proxy/heartbeat",
            Endpoint::Clients => "api/proxy/clients",
            Endpoint::Route => "api/proxy/route",
            Endpoint::PingIp => "api/proxy/ping-ip",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}

/// Announce this device as a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub client_id: String,
    pub device_name: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Local SOCKS port peers may be routed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Public address the router saw
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub success: bool,
    /// Server time, milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// A registered peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub client_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub last_seen: Option<u64>,
    #[serde(default = "default_true")]
    pub online: bool,
}

fn default_true() -> bool {
    true
}

/// Peer list, either bare or wrapped in `{"clients": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientsResponse {
    Wrapped { clients: Vec<PeerInfo> },
    Bare(Vec<PeerInfo>),
}

impl ClientsResponse {
    pub fn into_peers(self) -> Vec<PeerInfo> {
        match self {
            ClientsResponse::Wrapped { clients } => clients,
            ClientsResponse::Bare(clients) => clients,
        }
    }
}

/// Ask the router to route this client through a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub client_id: String,
    pub target_client_id: String,
}

/// SOCKS endpoint of the chosen peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RouteResponse {
    /// `host:port` of the proxy, when the route was granted
    pub fn proxy_endpoint(&self) -> Option<String> {
        match (&self.proxy_host, self.proxy_port) {
            (Some(host), Some(port)) if self.success => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    #[serde(default)]
    pub reachable: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::PingIp.to_string(), "/api/proxy/ping-ip");
        assert_eq!(Endpoint::Clients.path(), "api/proxy/clients");
    }

    #[test]
    fn test_register_request_json() {
        let req = RegisterRequest {
            client_id: "rock-1".into(),
            device_name: "pixel".into(),
            platform: "android".into(),
            country_code: None,
            socks_port: Some(10808),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["clientId"], "rock-1");
        assert_eq!(json["socksPort"], 10808);
        assert!(json.get("countryCode").is_none());
    }

    #[test]
    fn test_clients_both_shapes() {
        let wrapped: ClientsResponse =
            serde_json::from_str(r#"{"clients":[{"clientId":"a"}]}"#).unwrap();
        let bare: ClientsResponse =
            serde_json::from_str(r#"[{"clientId":"b","online":false}]"#).unwrap();

        let a = wrapped.into_peers();
        assert_eq!(a[0].client_id, "a");
        assert!(a[0].online);

        let b = bare.into_peers();
        assert!(!b[0].online);
    }

    #[test]
    fn test_route_endpoint() {
        let granted: RouteResponse =
            serde_json::from_str(r#"{"success":true,"proxyHost":"10.0.0.5","proxyPort":1080}"#)
                .unwrap();
        assert_eq!(granted.proxy_endpoint().as_deref(), Some("10.0.0.5:1080"));

        let denied: RouteResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert_eq!(denied.proxy_endpoint(), None);
    }
}
