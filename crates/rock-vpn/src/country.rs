//! Country Metadata
//!
//! Servers are presented to the user by country. Remote config normally
//! supplies the code and name; when it does not, the country is guessed from
//! the server's host name.
//!
//! | Code | Country | Host tokens |
//! |------|---------|-------------|
//! | US | United States | `us`, `usa` |
//! | DE | Germany | `de`, `germany` |
//! | IL | Israel | `il`, `israel` |
//! | UK | United Kingdom | `uk`, `gb` |
//! | RU | Russia | `ru`, `russia` |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Countries the client knows how to recognise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CountryId {
    US,
    DE,
    IL,
    UK,
    RU,
}

impl CountryId {
    /// Get all known countries
    pub fn all() -> &'static [CountryId] {
        &[
            CountryId::US,
            CountryId::DE,
            CountryId::IL,
            CountryId::UK,
            CountryId::RU,
        ]
    }

    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            CountryId::US => "United States",
            CountryId::DE => "Germany",
            CountryId::IL => "Israel",
            CountryId::UK => "United Kingdom",
            CountryId::RU => "Russia",
        }
    }

    /// Get country code
    pub fn code(&self) -> &'static str {
        match self {
            CountryId::US => "US",
            CountryId::DE => "DE",
            CountryId::IL => "IL",
            CountryId::UK => "UK",
            CountryId::RU => "RU",
        }
    }

    /// Host-name tokens that identify this country
    fn host_tokens(&self) -> &'static [&'static str] {
        match self {
            CountryId::US => &["us", "usa"],
            CountryId::DE => &["de", "germany"],
            CountryId::IL => &["il", "israel"],
            CountryId::UK => &["uk", "gb"],
            CountryId::RU => &["ru", "russia"],
        }
    }

    /// Guess the country from a server host name.
    ///
    /// The host is split on `.` and `-` and each token is compared whole, so
    /// `de-fra-1.example.com` is Germany while `russia` never reads as `us`.
    /// IP literals yield `None`.
    pub fn infer_from_server(address: &str) -> Option<CountryId> {
        let host = address.trim().to_ascii_lowercase();
        if host.parse::<std::net::IpAddr>().is_ok() {
            return None;
        }

        let tokens: Vec<&str> = host.split(['.', '-']).filter(|t| !t.is_empty()).collect();
        CountryId::all()
            .iter()
            .copied()
            .find(|c| c.host_tokens().iter().any(|t| tokens.contains(t)))
    }
}

impl fmt::Display for CountryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for CountryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "US" | "USA" => Ok(CountryId::US),
            "DE" => Ok(CountryId::DE),
            "IL" => Ok(CountryId::IL),
            "UK" | "GB" => Ok(CountryId::UK),
            "RU" => Ok(CountryId::RU),
            _ => Err(format!("unknown country: {s}")),
        }
    }
}

/// Country shown next to a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub code: String,
    pub name: String,
}

impl Country {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// Placeholder used when nothing is known
    pub fn unknown() -> Self {
        Self::new("Unknown", "Unknown")
    }

    /// Resolve metadata for a server.
    ///
    /// Explicit code/name win and a known code fills in its name. The
    /// address is only consulted when neither part is given, so a code and
    /// a name always describe the same country.
    pub fn resolve(code: Option<&str>, name: Option<&str>, server_address: &str) -> Self {
        let code = code.filter(|c| !c.is_empty());
        let name = name.filter(|n| !n.is_empty());

        let known = match (code, name) {
            (None, None) => CountryId::infer_from_server(server_address),
            (Some(code), _) => code.parse::<CountryId>().ok(),
            (None, Some(_)) => None,
        };

        let code = code
            .map(str::to_string)
            .or_else(|| known.map(|k| k.code().to_string()));
        let name = name
            .map(str::to_string)
            .or_else(|| known.map(|k| k.name().to_string()));

        match (code, name) {
            (None, None) => Self::unknown(),
            (code, name) => Self::new(
                code.unwrap_or_else(|| "Unknown".to_string()),
                name.unwrap_or_else(|| "Unknown".to_string()),
            ),
        }
    }
}

impl From<CountryId> for Country {
    fn from(id: CountryId) -> Self {
        Self::new(id.code(), id.name())
    }
}
