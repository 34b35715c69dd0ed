//! Rock VPN - Proxy Router Client
//!
//! Client for the remote "proxy router" backend used for peer discovery and
//! route coordination. The router's own logic lives server-side; this crate
//! only speaks its JSON API.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐   register / heartbeat   ┌──────────────────┐
//! │ ProxyRouterClient │ ───────────────────────▶ │  Proxy router    │
//! │  (hyper + rustls) │ ◀─────────────────────── │  /api/proxy/*    │
//! └─────────┬─────────┘   clients / route / ping └──────────────────┘
//!           │
//!           ▼ heartbeat task (tokio interval)
//! ```
//!
//! # Features
//!
//! - **Typed API**: camelCase JSON bodies for every endpoint
//! - **Single attempt**: no retries, per-request timeout
//! - **TLS**: rustls with webpki roots, no system OpenSSL

mod api;
mod client;
mod router;

pub use api::{
    ClientsResponse, Endpoint, HeartbeatRequest, HeartbeatResponse, PeerInfo, PingRequest,
    PingResponse, RegisterRequest, RegisterResponse, RouteRequest, RouteResponse,
};
pub use client::{HttpClient, HttpClientConfig, HttpError, Response};
pub use router::{generate_client_id, HeartbeatHandle, ProxyRouterClient, RouterError};
