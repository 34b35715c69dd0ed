//! XRay Configuration
//!
//! Typed mirror of the subset of XRay's JSON schema the packet tunnel
//! consumes: one local SOCKS inbound and one VLESS outbound.
//!
//! ```text
//! {
//!   "inbounds":  [{ "port": 10808, "listen": "127.0.0.1", "protocol": "socks", ... }],
//!   "outbounds": [{ "protocol": "vless", "settings": { "vnext": [...] },
//!                   "streamSettings": { "network": "ws", "security": "tls", ... } }]
//! }
//! ```

use crate::vless::{Network, Security, VlessError, VlessUri};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Local SOCKS port XRay listens on inside the tunnel extension
pub const DEFAULT_SOCKS_PORT: u16 = 10808;

/// Listen address of the SOCKS inbound
pub const SOCKS_LISTEN: &str = "127.0.0.1";

/// Top-level XRay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayConfig {
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

/// Local listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    pub port: u16,
    pub listen: String,
    pub protocol: String,
    #[serde(default)]
    pub settings: InboundSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub udp: bool,
}

/// Upstream proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub protocol: String,
    pub settings: OutboundSettings,
    pub stream_settings: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSettings {
    pub vnext: Vec<VnextServer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VnextServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<VlessUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlessUser {
    pub id: String,
    pub encryption: String,
    #[serde(default)]
    pub level: u32,
}

/// Transport and security of the outbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub header: TcpHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpHeader {
    #[serde(rename = "type")]
    pub kind: String,
}

impl StreamSettings {
    /// Derive stream settings from a parsed link.
    ///
    /// TLS fields appear only when `security` is not `none`; Reality
    /// fields only when it is `reality`. Transport blocks follow `type`.
    pub fn from_vless(uri: &VlessUri) -> Self {
        let mut settings = Self {
            network: uri.network.as_str().to_string(),
            security: None,
            tls_settings: None,
            ws_settings: None,
            grpc_settings: None,
            tcp_settings: None,
        };

        if uri.security.is_encrypted() {
            let reality_settings = (uri.security == Security::Reality).then(|| RealitySettings {
                public_key: uri.public_key.clone(),
                short_id: uri.short_id.clone(),
                spider_x: uri.spider_x.clone(),
            });

            settings.security = Some(uri.security.as_str().to_string());
            settings.tls_settings = Some(TlsSettings {
                server_name: uri.sni.clone(),
                fingerprint: uri.fingerprint.clone(),
                alpn: (!uri.alpn.is_empty()).then(|| uri.alpn.clone()),
                reality_settings,
            });
        }

        match uri.network {
            Network::Grpc => {
                settings.grpc_settings = Some(GrpcSettings {
                    service_name: uri.service_name.clone().unwrap_or_default(),
                });
            }
            Network::Ws => {
                let mut headers = BTreeMap::new();
                if let Some(host) = &uri.host_header {
                    headers.insert("Host".to_string(), host.clone());
                }
                settings.ws_settings = Some(WsSettings {
                    path: uri.path.clone().unwrap_or_else(|| "/".to_string()),
                    headers,
                });
            }
            Network::Tcp => {
                settings.tcp_settings = uri.header_type.as_ref().map(|kind| TcpSettings {
                    header: TcpHeader { kind: kind.clone() },
                });
            }
            Network::Other(_) => {}
        }

        settings
    }
}

impl XrayConfig {
    /// Build the tunnel configuration for a parsed link
    pub fn from_vless(uri: &VlessUri) -> Result<Self, VlessError> {
        let config = Self {
            inbounds: vec![Inbound {
                port: DEFAULT_SOCKS_PORT,
                listen: SOCKS_LISTEN.to_string(),
                protocol: "socks".to_string(),
                settings: InboundSettings { udp: true },
            }],
            outbounds: vec![Outbound {
                protocol: "vless".to_string(),
                settings: OutboundSettings {
                    vnext: vec![VnextServer {
                        address: uri.host.clone(),
                        port: uri.port,
                        users: vec![VlessUser {
                            id: uri.user_id.clone(),
                            encryption: uri.encryption.clone(),
                            level: 0,
                        }],
                    }],
                },
                stream_settings: StreamSettings::from_vless(uri),
            }],
        };

        config.validate()?;
        Ok(config)
    }

    /// Move the SOCKS inbound to another local port
    pub fn with_socks_port(mut self, port: u16) -> Self {
        for inbound in self.inbounds.iter_mut().filter(|i| i.protocol == "socks") {
            inbound.port = port;
        }
        self
    }

    /// Check the outbound carries address, port and user id
    pub fn validate(&self) -> Result<(), VlessError> {
        let server = self
            .outbounds
            .first()
            .and_then(|o| o.settings.vnext.first())
            .ok_or(VlessError::MissingHost)?;

        if server.address.trim().is_empty() {
            return Err(VlessError::MissingHost);
        }
        if server.port == 0 {
            return Err(VlessError::InvalidPort(server.port));
        }
        match server.users.first() {
            Some(user) if !user.id.trim().is_empty() => Ok(()),
            _ => Err(VlessError::MissingUserId),
        }
    }

    /// First VLESS outbound
    pub fn outbound(&self) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.protocol == "vless")
    }

    /// Port of the first local `socks` or `http` inbound.
    ///
    /// The tunnel extension points Tun2Socks at this port.
    pub fn socks_port(&self) -> Option<u16> {
        self.inbounds
            .iter()
            .find(|i| matches!(i.protocol.as_str(), "socks" | "http"))
            .map(|i| i.port)
    }

    /// Compact JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Pretty JSON text
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Compact JSON bytes, as stored in the provider configuration
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        debug!("XRay config size: {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Parse JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Parse a VLESS link and build its XRay configuration in one step
pub fn translate(uri: &str) -> Result<XrayConfig, VlessError> {
    let uri = VlessUri::parse(uri)?;
    XrayConfig::from_vless(&uri)
}
