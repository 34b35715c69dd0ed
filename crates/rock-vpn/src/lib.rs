//! Rock VPN - Client Core
//!
//! Connects the user to IPSec or VLESS/XRay servers through the operating
//! system's VPN subsystem and relays connection status back to the UI.
//! Protocol work (IKE, VLESS framing, tun forwarding) stays in the OS and
//! in the XRay / Tun2Socks engines; this crate is the glue around them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          UI                                  │
//! └───────┬───────────────────────────────────────▲──────────────┘
//!         │ MethodCall                            │ onVPNStatusChanged
//!         ▼                                       │
//! ┌───────────────┐    ┌──────────────┐    ┌──────┴───────┐
//! │ MethodChannel │───▶│  VpnManager  │───▶│ StatusEvent  │
//! └───────────────┘    └──┬────────┬──┘    │  broadcast   │
//!                         │        │       └──────▲───────┘
//!            IPSec creds  │        │ vless://     │
//!                         ▼        ▼              │
//!              ┌────────────┐  ┌────────────┐     │
//!              │ Credential │  │ XrayConfig │     │
//!              │   Store    │  │ translator │     │
//!              └────────────┘  └─────┬──────┘     │
//!                                    ▼            │
//!                        ┌───────────────────────────┐
//!                        │   VpnBackend (OS seam)    │
//!                        │ IPSec │ packet tunnel     │
//!                        └───────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **VLESS translation**: `vless://` links become XRay JSON with a local
//!   SOCKS inbound on 127.0.0.1:10808
//! - **IPSec**: IKEv1 + XAuth profiles from stored credentials
//! - **Status relay**: OS transitions enriched with server and country
//! - **Server catalog**: TOML/JSON profiles as delivered by remote config

mod catalog;
mod channel;
mod config;
mod country;
mod credentials;
mod manager;
mod platform;
mod status;
mod tunnel;
mod vless;
mod xray;

pub use catalog::{CatalogError, Protocol, ServerCatalog, ServerConnection, ServerProfile};
pub use channel::{
    MethodCall, MethodChannel, MethodResult, CONNECTION_FAILED, DISCONNECTION_FAILED,
    INVALID_ARGS, PERMISSION_DENIED, STATUS_CHANGED_METHOD, VPN_CHANNEL, VPN_STATUS_CHANNEL,
};
pub use config::{ConfigError, ConfigFormat, RockConfig, RouterSettings, TunnelOptions};
pub use country::{Country, CountryId};
pub use credentials::{
    CredentialError, CredentialStore, FileStore, MemoryStore, VpnCredentials, KEY_PASSWORD,
    KEY_SERVER_ADDRESS, KEY_SHARED_SECRET, KEY_USERNAME,
};
pub use manager::{
    probe, ManagerSettings, SessionKind, VpnError, VpnManager, DEFAULT_PROBE_PORT,
};
pub use platform::{
    BackendError, IpSecConfiguration, PacketTunnelConfiguration, SimulatedBackend,
    TunnelConfiguration, VpnBackend, DEFAULT_PROVIDER_BUNDLE_ID, IPSEC_DESCRIPTION,
};
pub use status::{ConnectionStatus, StatusBroadcaster, StatusEvent};
pub use tunnel::{
    parse_delay_reply, AppMessage, PacketTunnelSettings, TrafficStats, Tun2SocksConfig,
    DELAY_MESSAGE_PREFIX, TRAFFIC_MESSAGE,
};
pub use vless::{Network, Security, VlessError, VlessUri, DEFAULT_LABEL};
pub use xray::{translate, StreamSettings, XrayConfig, DEFAULT_SOCKS_PORT, SOCKS_LISTEN};
