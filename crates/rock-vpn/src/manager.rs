//! VPN Manager
//!
//! Drives the platform backend for both connection kinds and relays the
//! OS status stream to listeners, enriched with the server and country the
//! user picked.
//!
//! # Usage
//!
//! ```rust,ignore
//! let vpn = VpnManager::new(backend, Arc::new(MemoryStore::new()));
//! vpn.initialize().await?;
//!
//! // IPSec with credentials from remote config
//! vpn.connect_ipsec(credentials).await?;
//!
//! // or VLESS through the packet tunnel
//! vpn.connect_vless("vless://...", Some("DE"), Some("Germany")).await?;
//!
//! vpn.disconnect().await?;
//! ```

use crate::country::Country;
use crate::credentials::{CredentialError, CredentialStore, VpnCredentials};
use crate::platform::{
    BackendError, IpSecConfiguration, PacketTunnelConfiguration, TunnelConfiguration, VpnBackend,
    DEFAULT_PROVIDER_BUNDLE_ID,
};
use crate::status::{ConnectionStatus, StatusBroadcaster, StatusEvent};
use crate::tunnel::{parse_delay_reply, AppMessage, TrafficStats};
use crate::vless::{VlessError, VlessUri};
use crate::xray::{XrayConfig, DEFAULT_SOCKS_PORT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Default port probed by `test_server_connectivity` (IKE)
pub const DEFAULT_PROBE_PORT: u16 = 500;

/// VPN Manager errors
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    #[error("VPN already connected")]
    AlreadyConnected,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid VLESS URI: {0}")]
    Vless(#[from] VlessError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Failed to serialize XRay config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unexpected tunnel reply: {0}")]
    InvalidReply(String),
}

impl VpnError {
    /// Structured error code used across the method channel
    pub fn code(&self) -> &'static str {
        match self {
            VpnError::InvalidArguments(_) => "INVALID_ARGS",
            VpnError::Backend(BackendError::PermissionDenied) => "PERMISSION_DENIED",
            _ => "CONNECTION_FAILED",
        }
    }
}

/// Kind of tunnel in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    IpSec,
    Vless,
}

/// What the user asked to connect to
#[derive(Debug, Clone)]
struct Session {
    kind: SessionKind,
    /// Real server (not the loopback address of a packet tunnel)
    server_address: String,
    country: Country,
    connected_at: Option<Instant>,
}

/// Manager tunables
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Bundle id of the packet-tunnel extension
    pub provider_bundle_id: String,
    /// Local SOCKS port of the XRay inbound
    pub socks_port: u16,
    /// Timeout of `test_server_connectivity`
    pub probe_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            provider_bundle_id: DEFAULT_PROVIDER_BUNDLE_ID.to_string(),
            socks_port: DEFAULT_SOCKS_PORT,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// VPN Manager
///
/// - Stores IPSec credentials before configuring the OS
/// - Translates VLESS links into packet-tunnel configurations
/// - Relays status transitions as [`StatusEvent`]s
pub struct VpnManager<B: VpnBackend> {
    backend: Arc<B>,
    store: Arc<dyn CredentialStore>,
    settings: ManagerSettings,
    events: StatusBroadcaster,
    session: Arc<RwLock<Option<Session>>>,
    relay_started: AtomicBool,
}

impl<B: VpnBackend> VpnManager<B> {
    /// Create a manager with default settings
    pub fn new(backend: Arc<B>, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_settings(backend, store, ManagerSettings::default())
    }

    /// Create a manager with explicit settings
    pub fn with_settings(
        backend: Arc<B>,
        store: Arc<dyn CredentialStore>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            backend,
            store,
            settings,
            events: StatusBroadcaster::default(),
            session: Arc::new(RwLock::new(None)),
            relay_started: AtomicBool::new(false),
        }
    }

    /// Backend in use
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Credential store in use
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Load preferences and start relaying status changes
    pub async fn initialize(&self) -> Result<(), VpnError> {
        self.ensure_relay();
        self.backend.load_preferences().await?;
        Ok(())
    }

    /// Listen for status events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.ensure_relay();
        self.events.subscribe()
    }

    /// Current status with server and country details
    pub async fn current_status(&self) -> StatusEvent {
        let status = self.backend.status();
        let session = self.session.read().await.clone();
        Self::describe(status, session.as_ref(), self.backend.configured_server())
    }

    /// Check if the tunnel is up
    pub fn is_connected(&self) -> bool {
        self.backend.status().is_connected()
    }

    /// Kind of the active or last requested session
    pub async fn session_kind(&self) -> Option<SessionKind> {
        self.session.read().await.as_ref().map(|s| s.kind)
    }

    /// Time since the tunnel came up
    pub async fn connection_duration(&self) -> Option<Duration> {
        if !self.is_connected() {
            return None;
        }
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.connected_at)
            .map(|t| t.elapsed())
    }

    /// Check whether VPN preferences are accessible
    pub async fn check_permission(&self) -> bool {
        match self.backend.load_preferences().await {
            Ok(()) => true,
            Err(e) => {
                warn!("VPN permission check failed: {}", e);
                false
            }
        }
    }

    /// Prompt for VPN permission
    pub async fn request_permission(&self) -> Result<bool, VpnError> {
        let granted = self.backend.request_permission().await?;
        info!("VPN permission {}", if granted { "granted" } else { "denied" });
        Ok(granted)
    }

    /// Connect over IPSec.
    ///
    /// Credentials are written to the store first, overwriting any
    /// previous ones, then the OS profile is saved and started.
    pub async fn connect_ipsec(&self, credentials: VpnCredentials) -> Result<(), VpnError> {
        for (field, value) in [
            ("serverAddress", &credentials.server_address),
            ("username", &credentials.username),
            ("password", &credentials.password),
            ("sharedSecret", &credentials.shared_secret),
        ] {
            if value.trim().is_empty() {
                return Err(VpnError::InvalidArguments(format!("missing {field}")));
            }
        }
        self.ensure_idle()?;

        let country = Country::resolve(
            credentials.country_code.as_deref(),
            credentials.country_name.as_deref(),
            &credentials.server_address,
        );
        info!(
            "Connecting to VPN server: {} ({})",
            credentials.server_address, country.name
        );

        self.store.save(&credentials)?;
        let config = TunnelConfiguration::IpSec(IpSecConfiguration::from_credentials(&credentials));
        let session = Session {
            kind: SessionKind::IpSec,
            server_address: credentials.server_address.clone(),
            country,
            connected_at: None,
        };

        self.start(config, session).await
    }

    /// Reconnect with the credentials saved by the last IPSec connect
    pub async fn reconnect_ipsec(&self) -> Result<(), VpnError> {
        let credentials = self.store.load()?;
        self.connect_ipsec(credentials).await
    }

    /// Connect to a VLESS server through the packet tunnel
    pub async fn connect_vless(
        &self,
        vless_uri: &str,
        country_code: Option<&str>,
        country_name: Option<&str>,
    ) -> Result<(), VpnError> {
        let uri = VlessUri::parse(vless_uri)?;
        self.ensure_idle()?;

        let xray = XrayConfig::from_vless(&uri)?.with_socks_port(self.settings.socks_port);
        let bytes = xray.to_bytes()?;

        let country = Country::resolve(country_code, country_name, &uri.host);
        info!("Connecting to VLESS server: {} via XRay", country.name);

        let config = TunnelConfiguration::PacketTunnel(PacketTunnelConfiguration::new(
            bytes,
            &self.settings.provider_bundle_id,
            &country.name,
        ));
        let session = Session {
            kind: SessionKind::Vless,
            server_address: uri.endpoint(),
            country,
            connected_at: None,
        };

        self.start(config, session).await
    }

    /// Stop the tunnel
    pub async fn disconnect(&self) -> Result<(), VpnError> {
        info!("Disconnecting VPN");
        self.backend.stop_tunnel().await?;

        if let Some(session) = self.session.write().await.as_mut() {
            session.connected_at = None;
        }

        info!("VPN disconnected");
        Ok(())
    }

    /// Traffic counters of the running packet tunnel
    pub async fn traffic_stats(&self) -> Result<TrafficStats, VpnError> {
        let reply = self
            .backend
            .send_provider_message(AppMessage::Traffic.to_bytes())
            .await?;
        let text = String::from_utf8_lossy(&reply);
        TrafficStats::parse(&text)
            .ok_or_else(|| VpnError::InvalidReply(text.into_owned()))
    }

    /// Latency to `url` through the packet tunnel; `None` when unreachable
    pub async fn measure_delay(&self, url: &str) -> Result<Option<Duration>, VpnError> {
        let reply = self
            .backend
            .send_provider_message(AppMessage::Delay(url.to_string()).to_bytes())
            .await?;
        Ok(parse_delay_reply(&String::from_utf8_lossy(&reply)))
    }

    /// Probe a server with a plain TCP connect
    pub async fn test_server_connectivity(&self, address: &str, port: u16) -> bool {
        probe(address, port, self.settings.probe_timeout).await
    }

    fn ensure_idle(&self) -> Result<(), VpnError> {
        match self.backend.status() {
            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                Err(VpnError::AlreadyConnected)
            }
            _ => Ok(()),
        }
    }

    async fn start(&self, config: TunnelConfiguration, session: Session) -> Result<(), VpnError> {
        self.ensure_relay();
        // Transitions of this attempt describe the new server; a failure puts the old one back.
        let previous = self.session.write().await.replace(session.clone());

        let result: Result<(), BackendError> = async {
            self.backend.load_preferences().await?;
            self.backend.save_configuration(config).await?;
            self.backend.start_tunnel().await
        }
        .await;

        match result {
            Ok(()) => {
                if self.backend.status().is_connected() {
                    Self::mark_connected(&self.session).await;
                }
                info!("VPN configured for {} ({})", session.country.name, session.server_address);
                Ok(())
            }
            Err(e) => {
                error!("VPN connection failed: {}", e);
                *self.session.write().await = previous;
                let event = StatusEvent::new(self.backend.status())
                    .with_server(session.server_address.clone())
                    .with_country(Some(session.country.code), Some(session.country.name))
                    .with_error(e.to_string());
                self.events.publish(event);
                Err(e.into())
            }
        }
    }

    async fn mark_connected(session: &RwLock<Option<Session>>) {
        if let Some(s) = session.write().await.as_mut() {
            s.connected_at.get_or_insert_with(Instant::now);
        }
    }

    fn describe(
        status: ConnectionStatus,
        session: Option<&Session>,
        configured_server: Option<String>,
    ) -> StatusEvent {
        let mut event = StatusEvent::new(status);
        match session {
            Some(s) => {
                event = event
                    .with_server(s.server_address.clone())
                    .with_country(Some(s.country.code.clone()), Some(s.country.name.clone()));
            }
            None => {
                if let Some(server) = configured_server {
                    let country = Country::resolve(None, None, &server);
                    event = event
                        .with_server(server)
                        .with_country(Some(country.code), Some(country.name));
                }
            }
        }
        event
    }

    /// Spawn the task turning OS transitions into status events
    fn ensure_relay(&self) {
        if self.relay_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut rx = self.backend.subscribe();
        let backend = self.backend.clone();
        let session = self.session.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                let status = match rx.recv().await {
                    Ok(status) => status,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Status relay lagged by {} events", skipped);
                        backend.status()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                match status {
                    ConnectionStatus::Connected => Self::mark_connected(&session).await,
                    ConnectionStatus::Disconnected | ConnectionStatus::Invalid => {
                        if let Some(s) = session.write().await.as_mut() {
                            s.connected_at = None;
                        }
                    }
                    _ => {}
                }

                let snapshot = session.read().await.clone();
                let event = Self::describe(status, snapshot.as_ref(), backend.configured_server());
                info!(
                    "VPN Status: {} - Server: {} - Country: {}",
                    event.status,
                    event.server_address.as_deref().unwrap_or("Unknown"),
                    event.country_name.as_deref().unwrap_or("Unknown")
                );
                events.publish(event);
            }
        });
    }
}

/// TCP reachability probe with a timeout
pub async fn probe(address: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => {
            debug!("Server {}:{} is reachable", address, port);
            true
        }
        Ok(Err(e)) => {
            warn!("Server {}:{} is not reachable: {}", address, port, e);
            false
        }
        Err(_) => {
            warn!("Server {}:{} timed out", address, port);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use crate::platform::SimulatedBackend;
    use tokio::net::TcpListener;

    fn manager(backend: SimulatedBackend) -> VpnManager<SimulatedBackend> {
        VpnManager::new(Arc::new(backend), Arc::new(MemoryStore::new()))
    }

    fn credentials() -> VpnCredentials {
        VpnCredentials::new("de.rockvpn.example", "user", "secret", "psk")
    }

    async fn next_status(
        rx: &mut broadcast::Receiver<StatusEvent>,
        status: ConnectionStatus,
    ) -> StatusEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.status == status {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_connect_ipsec() {
        let vpn = manager(SimulatedBackend::new());
        let mut rx = vpn.subscribe();

        vpn.connect_ipsec(credentials()).await.unwrap();

        assert!(vpn.is_connected());
        assert_eq!(vpn.session_kind().await, Some(SessionKind::IpSec));
        assert!(vpn.connection_duration().await.is_some());

        let event = next_status(&mut rx, ConnectionStatus::Connected).await;
        assert!(event.is_connected);
        assert_eq!(event.server_address.as_deref(), Some("de.rockvpn.example"));
        assert_eq!(event.country_name.as_deref(), Some("Germany"));

        let stored = vpn.store().load().unwrap();
        assert_eq!(stored.username, "user");
    }

    #[tokio::test]
    async fn test_connect_ipsec_missing_fields() {
        let vpn = manager(SimulatedBackend::new());
        let mut creds = credentials();
        creds.shared_secret.clear();

        let err = vpn.connect_ipsec(creds).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGS");
        assert!(vpn.store().load().is_err());
    }

    #[tokio::test]
    async fn test_already_connected() {
        let vpn = manager(SimulatedBackend::new());
        vpn.connect_ipsec(credentials()).await.unwrap();

        let err = vpn.connect_ipsec(credentials()).await.unwrap_err();
        assert!(matches!(err, VpnError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_connect_vless() {
        let vpn = manager(SimulatedBackend::new());
        vpn.connect_vless(
            "vless://123e4567-e89b-12d3-a456-426614174000@nl.example:443?type=ws&security=tls",
            Some("NL"),
            Some("Netherlands"),
        )
        .await
        .unwrap();

        let status = vpn.current_status().await;
        assert_eq!(status.status, ConnectionStatus::Connected);
        assert_eq!(status.server_address.as_deref(), Some("nl.example:443"));
        assert_eq!(status.country_name.as_deref(), Some("Netherlands"));

        let Some(TunnelConfiguration::PacketTunnel(pt)) = vpn.backend().saved_configuration() else {
            panic!("expected packet tunnel configuration");
        };
        let xray = XrayConfig::from_slice(&pt.xray_config).unwrap();
        assert_eq!(xray.outbound().unwrap().stream_settings.network, "ws");
        assert_eq!(pt.description, "Rock VPN - Netherlands (VLESS)");
    }

    #[tokio::test]
    async fn test_connect_vless_rejects_bad_uri() {
        let vpn = manager(SimulatedBackend::new());
        let err = vpn.connect_vless("ss://abc@h:1", None, None).await.unwrap_err();

        assert!(matches!(err, VpnError::Vless(VlessError::UnsupportedScheme(_))));
        assert!(vpn.backend().saved_configuration().is_none());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let vpn = manager(SimulatedBackend::new().denying_permission());
        assert!(!vpn.request_permission().await.unwrap());

        let err = vpn.connect_ipsec(credentials()).await.unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let vpn = manager(SimulatedBackend::new().failing_start("IKE negotiation failed"));
        let mut rx = vpn.subscribe();

        let err = vpn.connect_ipsec(credentials()).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_FAILED");

        let event = rx.recv().await.unwrap();
        assert!(!event.is_connected);
        assert!(event.error.unwrap().contains("IKE negotiation failed"));
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_previous_session() {
        let vpn = manager(SimulatedBackend::new());
        vpn.connect_ipsec(credentials()).await.unwrap();
        vpn.disconnect().await.unwrap();

        vpn.backend().set_start_failure(Some("IKE negotiation failed".to_string()));
        let next = VpnCredentials::new("us.rockvpn.example", "user", "secret", "psk");
        assert!(vpn.connect_ipsec(next).await.is_err());

        let status = vpn.current_status().await;
        assert_eq!(status.server_address.as_deref(), Some("de.rockvpn.example"));
        assert_eq!(status.country_name.as_deref(), Some("Germany"));
        assert_eq!(vpn.session_kind().await, Some(SessionKind::IpSec));
    }

    #[tokio::test]
    async fn test_failed_connect_without_previous_session() {
        let vpn = manager(SimulatedBackend::new().denying_permission());
        assert!(vpn.connect_vless("vless://id@de.example:443", None, None).await.is_err());

        assert_eq!(vpn.session_kind().await, None);
        assert_eq!(vpn.current_status().await.server_address, None);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let vpn = manager(SimulatedBackend::new());
        let mut rx = vpn.subscribe();
        vpn.connect_ipsec(credentials()).await.unwrap();
        vpn.disconnect().await.unwrap();

        assert!(!vpn.is_connected());
        assert!(vpn.connection_duration().await.is_none());
        next_status(&mut rx, ConnectionStatus::Disconnected).await;
    }

    #[tokio::test]
    async fn test_reconnect_uses_stored_credentials() {
        let vpn = manager(SimulatedBackend::new());
        vpn.connect_ipsec(credentials()).await.unwrap();
        vpn.disconnect().await.unwrap();

        vpn.reconnect_ipsec().await.unwrap();
        assert!(vpn.is_connected());
    }

    #[tokio::test]
    async fn test_reasserting_is_relayed() {
        let vpn = manager(SimulatedBackend::new());
        let mut rx = vpn.subscribe();
        vpn.connect_ipsec(credentials()).await.unwrap();

        vpn.backend().set_status(ConnectionStatus::Reasserting);
        let event = next_status(&mut rx, ConnectionStatus::Reasserting).await;
        assert!(!event.is_connected);
    }

    #[tokio::test]
    async fn test_traffic_and_delay() {
        let vpn = manager(SimulatedBackend::new());
        assert!(vpn.traffic_stats().await.is_err());

        vpn.connect_vless("vless://id@de.example:443", None, None)
            .await
            .unwrap();
        vpn.backend().record_traffic(1024, 2048);

        let stats = vpn.traffic_stats().await.unwrap();
        assert_eq!(stats.up_bytes, 1024);
        assert_eq!(stats.down_bytes, 2048);

        assert_eq!(vpn.measure_delay("https://www.google.com").await.unwrap(), None);
        vpn.backend().set_delay(Some(Duration::from_millis(42)));
        assert_eq!(
            vpn.measure_delay("https://www.google.com").await.unwrap(),
            Some(Duration::from_millis(42))
        );
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let vpn = manager(SimulatedBackend::new());
        assert!(vpn.test_server_connectivity("127.0.0.1", port).await);

        drop(listener);
        assert!(!vpn.test_server_connectivity("127.0.0.1", port).await);
    }
}
