//! Server Catalog
//!
//! Servers normally arrive through remote config. Each profile carries its
//! country and either IPSec credentials or a VLESS link.
//!
//! ```toml
//! [[servers]]
//! id = "de-1"
//! country_code = "DE"
//! country_name = "Germany"
//! protocol = "ipsec"
//! server_address = "de.rockvpn.example"
//! username = "user"
//! password = "secret"
//! shared_secret = "psk"
//!
//! [[servers]]
//! id = "nl-reality"
//! country_code = "NL"
//! protocol = "vless"
//! vless_uri = "vless://...@nl.example:443?security=reality&pbk=..."
//! ```

use crate::country::Country;
use crate::credentials::VpnCredentials;
use crate::vless::{VlessError, VlessUri};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Server {id} is missing {field}")]
    MissingField { id: String, field: &'static str },

    #[error("Server {id} has an invalid VLESS URI: {source}")]
    InvalidUri {
        id: String,
        #[source]
        source: VlessError,
    },

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Server {0} is disabled")]
    Disabled(String),
}

/// Tunnel protocol of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ipsec,
    Vless,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ipsec => write!(f, "ipsec"),
            Protocol::Vless => write!(f, "vless"),
        }
    }
}

/// Server entry as delivered by remote config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Unique identifier
    pub id: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    pub protocol: Protocol,
    /// Is this server offered?
    #[serde(default = "default_true")]
    pub enabled: bool,

    // IPSec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,

    // VLESS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vless_uri: Option<String>,
}

fn default_true() -> bool {
    true
}

/// What a profile resolves to when the user taps it
#[derive(Debug, Clone, PartialEq)]
pub enum ServerConnection {
    IpSec(VpnCredentials),
    Vless {
        uri: String,
        country_code: Option<String>,
        country_name: Option<String>,
    },
}

impl ServerProfile {
    /// Host the profile points at
    pub fn host(&self) -> Option<String> {
        match self.protocol {
            Protocol::Ipsec => self.server_address.clone(),
            Protocol::Vless => self
                .vless_uri
                .as_deref()
                .and_then(|u| VlessUri::parse(u).ok())
                .map(|u| u.host),
        }
    }

    /// Country shown for this profile
    pub fn country(&self) -> Country {
        Country::resolve(
            self.country_code.as_deref(),
            self.country_name.as_deref(),
            &self.host().unwrap_or_default(),
        )
    }

    /// Validate and convert to connect arguments
    pub fn connection(&self) -> Result<ServerConnection, CatalogError> {
        let country = self.country();
        let code = self.country_code.clone().or(Some(country.code));
        let name = self.country_name.clone().or(Some(country.name));

        match self.protocol {
            Protocol::Ipsec => {
                let credentials = VpnCredentials::new(
                    self.require(&self.server_address, "server_address")?,
                    self.require(&self.username, "username")?,
                    self.require(&self.password, "password")?,
                    self.require(&self.shared_secret, "shared_secret")?,
                )
                .with_country(code, name);
                Ok(ServerConnection::IpSec(credentials))
            }
            Protocol::Vless => {
                let uri = self.require(&self.vless_uri, "vless_uri")?;
                VlessUri::parse(&uri).map_err(|source| CatalogError::InvalidUri {
                    id: self.id.clone(),
                    source,
                })?;
                Ok(ServerConnection::Vless {
                    uri,
                    country_code: code,
                    country_name: name,
                })
            }
        }
    }

    fn require(&self, value: &Option<String>, field: &'static str) -> Result<String, CatalogError> {
        value
            .as_ref()
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| CatalogError::MissingField {
                id: self.id.clone(),
                field,
            })
    }
}

/// Ordered list of servers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCatalog {
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
}

impl ServerCatalog {
    pub fn new(servers: Vec<ServerProfile>) -> Self {
        Self { servers }
    }

    /// Find server by id
    pub fn find(&self, id: &str) -> Result<&ServerProfile, CatalogError> {
        let profile = self
            .servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownServer(id.to_string()))?;
        if !profile.enabled {
            return Err(CatalogError::Disabled(id.to_string()));
        }
        Ok(profile)
    }

    /// Get enabled servers
    pub fn enabled(&self) -> impl Iterator<Item = &ServerProfile> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Enabled servers in a country (case-insensitive code)
    pub fn by_country<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ServerProfile> + 'a {
        self.enabled()
            .filter(move |s| s.country().code.eq_ignore_ascii_case(code))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipsec(id: &str, host: &str) -> ServerProfile {
        ServerProfile {
            id: id.to_string(),
            country_code: None,
            country_name: None,
            protocol: Protocol::Ipsec,
            enabled: true,
            server_address: Some(host.to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            shared_secret: Some("psk".to_string()),
            vless_uri: None,
        }
    }

    fn vless(id: &str, uri: &str) -> ServerProfile {
        ServerProfile {
            id: id.to_string(),
            country_code: Some("NL".to_string()),
            country_name: Some("Netherlands".to_string()),
            protocol: Protocol::Vless,
            enabled: true,
            server_address: None,
            username: None,
            password: None,
            shared_secret: None,
            vless_uri: Some(uri.to_string()),
        }
    }

    #[test]
    fn test_ipsec_connection() {
        let conn = ipsec("de-1", "de.rockvpn.example").connection().unwrap();
        let ServerConnection::IpSec(creds) = conn else {
            panic!("expected ipsec");
        };
        assert_eq!(creds.server_address, "de.rockvpn.example");
        assert_eq!(creds.country_code.as_deref(), Some("DE"));
        assert_eq!(creds.country_name.as_deref(), Some("Germany"));
    }

    #[test]
    fn test_missing_field() {
        let mut profile = ipsec("us-1", "us.example");
        profile.shared_secret = Some("  ".to_string());

        let err = profile.connection().unwrap_err();
        assert!(matches!(err, CatalogError::MissingField { field: "shared_secret", .. }));
    }

    #[test]
    fn test_vless_connection() {
        let profile = vless("nl-1", "vless://id@nl.example:443?security=tls");
        assert_eq!(profile.host().as_deref(), Some("nl.example"));

        let ServerConnection::Vless { uri, country_name, .. } = profile.connection().unwrap() else {
            panic!("expected vless");
        };
        assert!(uri.starts_with("vless://"));
        assert_eq!(country_name.as_deref(), Some("Netherlands"));

        let bad = vless("nl-2", "vmess://id@nl.example:443");
        assert!(matches!(bad.connection(), Err(CatalogError::InvalidUri { .. })));
    }

    #[test]
    fn test_catalog_lookup() {
        let mut disabled = ipsec("ru-1", "ru.example");
        disabled.enabled = false;

        let catalog = ServerCatalog::new(vec![
            ipsec("de-1", "de.example"),
            ipsec("de-2", "germany-2.example"),
            disabled,
            vless("nl-1", "vless://id@nl.example:443"),
        ]);

        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.enabled().count(), 3);
        assert_eq!(catalog.by_country("de").count(), 2);
        assert!(catalog.find("de-2").is_ok());
        assert!(matches!(catalog.find("ru-1"), Err(CatalogError::Disabled(_))));
        assert!(matches!(catalog.find("xx"), Err(CatalogError::UnknownServer(_))));
    }

    #[test]
    fn test_profile_toml() {
        let toml = r#"
            [[servers]]
            id = "us-1"
            protocol = "ipsec"
            server_address = "usa.example.com"
            username = "u"
            password = "p"
            shared_secret = "s"
        "#;

        let catalog: ServerCatalog = toml::from_str(toml).unwrap();
        assert!(catalog.servers[0].enabled);
        assert_eq!(catalog.servers[0].protocol, Protocol::Ipsec);
        assert_eq!(catalog.servers[0].country().name, "United States");
    }
}
