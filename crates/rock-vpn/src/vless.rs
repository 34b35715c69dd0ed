//! VLESS URI Parsing
//!
//! Turns a share link of the form
//! `vless://<uuid>@<host>:<port>?<query>#<label>` into a typed
//! [`VlessUri`]. The result is transient: it only lives long enough to
//! derive an [`XrayConfig`](crate::xray::XrayConfig).
//!
//! # Rules
//!
//! - Scheme must be `vless`
//! - User id, host and a non-zero port are required
//! - Each query value is percent-decoded on its own (`+` is kept literally)
//! - Unknown query keys are ignored
//! - Empty values count as absent

use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use url::{Host, Url};

/// Label used when the link carries no fragment
pub const DEFAULT_LABEL: &str = "VLESS Server";

/// VLESS parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VlessError {
    #[error("Malformed VLESS URI: {0}")]
    Malformed(String),

    #[error("Unsupported scheme '{0}' (expected 'vless')")]
    UnsupportedScheme(String),

    #[error("VLESS URI is missing the user id")]
    MissingUserId,

    #[error("VLESS URI is missing the host")]
    MissingHost,

    #[error("VLESS URI is missing the port")]
    MissingPort,

    #[error("Invalid port: {0}")]
    InvalidPort(u16),
}

/// Transport network (`type` query parameter)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    Grpc,
    /// Any other transport XRay understands (h2, kcp, httpupgrade, ...)
    Other(String),
}

impl Network {
    /// Name as written in XRay's `streamSettings.network`
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::Other(s) => s,
        }
    }
}

impl From<&str> for Network {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Network::Tcp,
            "ws" | "websocket" => Network::Ws,
            "grpc" => Network::Grpc,
            other => Network::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport security (`security` query parameter)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
    Other(String),
}

impl Security {
    /// Name as written in XRay's `streamSettings.security`
    pub fn as_str(&self) -> &str {
        match self {
            Security::None => "none",
            Security::Tls => "tls",
            Security::Reality => "reality",
            Security::Other(s) => s,
        }
    }

    /// Does this security mode carry TLS parameters?
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Security::None)
    }
}

impl From<&str> for Security {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Security::None,
            "tls" => Security::Tls,
            "reality" => Security::Reality,
            other => Security::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed VLESS share link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlessUri {
    /// Authentication identity (UUID)
    pub user_id: String,
    /// Server host (domain or IP, without brackets)
    pub host: String,
    /// Server port
    pub port: u16,
    /// Transport (`type`)
    pub network: Network,
    /// Transport security (`security`)
    pub security: Security,
    /// VLESS encryption (`encryption`), always "none" in practice
    pub encryption: String,
    /// TLS server name (`sni`)
    pub sni: Option<String>,
    /// uTLS fingerprint (`fp`)
    pub fingerprint: Option<String>,
    /// ALPN list (`alpn`, comma separated)
    pub alpn: Vec<String>,
    /// Reality public key (`pbk`)
    pub public_key: Option<String>,
    /// Reality short id (`sid`)
    pub short_id: Option<String>,
    /// Reality spider path (`spx`)
    pub spider_x: Option<String>,
    /// TCP header obfuscation (`headerType`)
    pub header_type: Option<String>,
    /// WebSocket path (`path`)
    pub path: Option<String>,
    /// WebSocket Host header (`host`)
    pub host_header: Option<String>,
    /// gRPC service name (`serviceName`)
    pub service_name: Option<String>,
    /// Display label (fragment)
    pub label: String,
}

impl VlessUri {
    /// Parse a `vless://` link
    pub fn parse(input: &str) -> Result<Self, VlessError> {
        let input = input.trim();
        let url = Url::parse(input).map_err(|e| VlessError::Malformed(e.to_string()))?;

        if url.scheme() != "vless" {
            return Err(VlessError::UnsupportedScheme(url.scheme().to_string()));
        }

        let user_id = decode(url.username());
        if user_id.trim().is_empty() {
            return Err(VlessError::MissingUserId);
        }

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => decode(d),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(VlessError::MissingHost),
        };

        let port = url.port().ok_or(VlessError::MissingPort)?;
        if port == 0 {
            return Err(VlessError::InvalidPort(port));
        }

        let mut params = query_params(url.query().unwrap_or(""));
        let mut take = |key: &str| params.remove(key);

        let uri = Self {
            user_id,
            host,
            port,
            network: take("type").as_deref().map(Network::from).unwrap_or_default(),
            security: take("security").as_deref().map(Security::from).unwrap_or_default(),
            encryption: take("encryption").unwrap_or_else(|| "none".to_string()),
            sni: take("sni"),
            fingerprint: take("fp"),
            alpn: take("alpn")
                .map(|a| {
                    a.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            public_key: take("pbk"),
            short_id: take("sid"),
            spider_x: take("spx"),
            header_type: take("headerType"),
            path: take("path"),
            host_header: take("host"),
            service_name: take("serviceName"),
            label: url
                .fragment()
                .map(decode)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        };

        debug!(
            "Parsed VLESS URI: {} ({}, {}/{})",
            uri.label,
            uri.endpoint(),
            uri.network,
            uri.security
        );

        Ok(uri)
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for VlessUri {
    type Err = VlessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Split a raw query into decoded key/value pairs.
///
/// Pairs without `=` or with an empty value are dropped. Later keys win.
fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (decode(k), decode(v)))
        .collect()
}
