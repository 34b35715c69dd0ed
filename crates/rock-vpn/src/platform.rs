//! Platform VPN Seam
//!
//! The OS VPN subsystem (NetworkExtension on iOS, VpnService on Android)
//! owns the tunnel. [`VpnBackend`] is the narrow surface this crate drives:
//! load/save a configuration, start/stop, and observe status.
//!
//! [`SimulatedBackend`] walks the same state machine in-process. The CLI uses
//! it for dry runs and the tests use it to exercise the manager.

use crate::credentials::VpnCredentials;
use crate::status::ConnectionStatus;
use crate::tunnel::{AppMessage, PacketTunnelSettings, TrafficStats, Tun2SocksConfig};
use crate::xray::XrayConfig;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Bundle id of the packet-tunnel extension
pub const DEFAULT_PROVIDER_BUNDLE_ID: &str = "com.theholylabs.network.PacketTunnelProvider";

/// Description shown in system settings for IPSec profiles
pub const IPSEC_DESCRIPTION: &str = "Rock VPN";

/// Backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to load preferences: {0}")]
    Preferences(String),

    #[error("VPN permission denied by user")]
    PermissionDenied,

    #[error("Failed to save VPN configuration: {0}")]
    Save(String),

    #[error("Failed to start VPN: {0}")]
    Start(String),

    #[error("No VPN configuration saved")]
    NotConfigured,
}

/// IPSec (IKEv1 + XAuth, shared secret) profile
#[derive(Clone, PartialEq, Eq)]
pub struct IpSecConfiguration {
    pub server_address: String,
    pub username: String,
    pub password: String,
    pub shared_secret: String,
    pub local_identifier: String,
    pub remote_identifier: String,
    pub use_extended_authentication: bool,
    pub description: String,
}

impl IpSecConfiguration {
    /// Profile for stored credentials
    pub fn from_credentials(credentials: &VpnCredentials) -> Self {
        Self {
            server_address: credentials.server_address.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            shared_secret: credentials.shared_secret.clone(),
            local_identifier: String::new(),
            remote_identifier: credentials.server_address.clone(),
            use_extended_authentication: true,
            description: IPSEC_DESCRIPTION.to_string(),
        }
    }
}

impl std::fmt::Debug for IpSecConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpSecConfiguration")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("remote_identifier", &self.remote_identifier)
            .field("use_extended_authentication", &self.use_extended_authentication)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Packet-tunnel profile carrying an XRay config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTunnelConfiguration {
    /// Always loopback; the real server lives inside the XRay config
    pub server_address: String,
    pub provider_bundle_id: String,
    /// Serialized XRay JSON
    pub xray_config: Vec<u8>,
    pub settings: PacketTunnelSettings,
    pub description: String,
}

impl PacketTunnelConfiguration {
    pub fn new(xray_config: Vec<u8>, provider_bundle_id: &str, country_name: &str) -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            provider_bundle_id: provider_bundle_id.to_string(),
            xray_config,
            settings: PacketTunnelSettings::default(),
            description: format!("Rock VPN - {country_name} (VLESS)"),
        }
    }
}

/// Configuration handed to the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelConfiguration {
    IpSec(IpSecConfiguration),
    PacketTunnel(PacketTunnelConfiguration),
}

impl TunnelConfiguration {
    /// Server address as the OS reports it
    pub fn server_address(&self) -> &str {
        match self {
            TunnelConfiguration::IpSec(c) => &c.server_address,
            TunnelConfiguration::PacketTunnel(c) => &c.server_address,
        }
    }

    /// Description shown in system settings
    pub fn description(&self) -> &str {
        match self {
            TunnelConfiguration::IpSec(c) => &c.description,
            TunnelConfiguration::PacketTunnel(c) => &c.description,
        }
    }
}

/// Operations the OS VPN subsystem offers
pub trait VpnBackend: Send + Sync + 'static {
    /// Load saved preferences (fails when the app may not manage VPNs)
    fn load_preferences(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Ask the user for permission to add VPN configurations
    fn request_permission(&self) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Replace the saved configuration and enable it
    fn save_configuration(
        &self,
        config: TunnelConfiguration,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Start the saved configuration
    fn start_tunnel(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Stop the tunnel (no-op when already down)
    fn stop_tunnel(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Current status
    fn status(&self) -> ConnectionStatus;

    /// Server address of the saved configuration
    fn configured_server(&self) -> Option<String>;

    /// Status transitions as the OS reports them
    fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus>;

    /// Send an app message to the running packet tunnel and wait for the reply
    fn send_provider_message(
        &self,
        message: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, BackendError>> + Send;
}

#[derive(Debug)]
struct SimulatedState {
    status: ConnectionStatus,
    config: Option<TunnelConfiguration>,
    permission_granted: bool,
    /// SOCKS port Tun2Socks would be pointed at
    tun2socks: Option<Tun2SocksConfig>,
    traffic: TrafficStats,
    /// Reply to delay probes in ms, -1 when unreachable
    delay_ms: i64,
    start_failure: Option<String>,
}

/// In-process stand-in for the OS VPN subsystem
#[derive(Debug)]
pub struct SimulatedBackend {
    state: Mutex<SimulatedState>,
    events: broadcast::Sender<ConnectionStatus>,
    deny_permission: bool,
    transition_delay: Duration,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(SimulatedState {
                status: ConnectionStatus::Invalid,
                config: None,
                permission_granted: false,
                tun2socks: None,
                traffic: TrafficStats::default(),
                delay_ms: -1,
                start_failure: None,
            }),
            events,
            deny_permission: false,
            transition_delay: Duration::ZERO,
        }
    }

    /// Simulate the user refusing the VPN permission prompt
    pub fn denying_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Simulate the OS refusing to start the tunnel
    pub fn failing_start(self, reason: impl Into<String>) -> Self {
        self.set_start_failure(Some(reason.into()));
        self
    }

    /// Make later starts fail (or succeed again with `None`)
    pub fn set_start_failure(&self, reason: Option<String>) {
        self.lock().start_failure = reason;
    }

    /// Pause between intermediate and final states
    pub fn with_transition_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = delay;
        self
    }

    /// Force a status, as the OS does on network changes
    pub fn set_status(&self, status: ConnectionStatus) {
        self.lock().status = status;
        let _ = self.events.send(status);
    }

    /// Add to the traffic counters of the running tunnel
    pub fn record_traffic(&self, up_bytes: u64, down_bytes: u64) {
        let mut state = self.lock();
        state.traffic.up_bytes += up_bytes;
        state.traffic.down_bytes += down_bytes;
    }

    /// Latency the tunnel reports to delay probes
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay_ms = delay.map_or(-1, |d| d.as_millis() as i64);
    }

    /// Saved configuration, if any
    pub fn saved_configuration(&self) -> Option<TunnelConfiguration> {
        self.lock().config.clone()
    }

    /// Tun2Socks setup of the running packet tunnel
    pub fn tun2socks(&self) -> Option<Tun2SocksConfig> {
        self.lock().tun2socks.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        if !self.transition_delay.is_zero() {
            tokio::time::sleep(self.transition_delay).await;
        }
    }

    /// What the tunnel extension does before bringing the interface up
    fn prepare_packet_tunnel(config: &PacketTunnelConfiguration) -> Result<Tun2SocksConfig, BackendError> {
        let xray = XrayConfig::from_slice(&config.xray_config)
            .map_err(|e| BackendError::Start(format!("No XRay config found: {e}")))?;
        let port = xray
            .socks_port()
            .ok_or_else(|| BackendError::Start("XRay config has no socks inbound".to_string()))?;
        Ok(Tun2SocksConfig::new(port))
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VpnBackend for SimulatedBackend {
    async fn load_preferences(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.status == ConnectionStatus::Invalid && state.config.is_some() {
            state.status = ConnectionStatus::Disconnected;
        }
        Ok(())
    }

    async fn request_permission(&self) -> Result<bool, BackendError> {
        let granted = !self.deny_permission;
        self.lock().permission_granted = granted;
        Ok(granted)
    }

    async fn save_configuration(&self, config: TunnelConfiguration) -> Result<(), BackendError> {
        if self.deny_permission {
            return Err(BackendError::PermissionDenied);
        }

        let mut state = self.lock();
        state.permission_granted = true;
        debug!("Saving VPN configuration: {}", config.description());
        state.config = Some(config);
        if state.status == ConnectionStatus::Invalid {
            state.status = ConnectionStatus::Disconnected;
        }
        Ok(())
    }

    async fn start_tunnel(&self) -> Result<(), BackendError> {
        let (config, failure) = {
            let state = self.lock();
            (state.config.clone(), state.start_failure.clone())
        };
        let config = config.ok_or(BackendError::NotConfigured)?;

        if let Some(reason) = failure {
            warn!("Simulated start failure: {}", reason);
            return Err(BackendError::Start(reason));
        }

        let tun2socks = match &config {
            TunnelConfiguration::PacketTunnel(pt) => Some(Self::prepare_packet_tunnel(pt)?),
            TunnelConfiguration::IpSec(_) => None,
        };

        self.set_status(ConnectionStatus::Connecting);
        self.pause().await;

        self.lock().tun2socks = tun2socks;
        self.set_status(ConnectionStatus::Connected);
        info!("Simulated tunnel up ({})", config.server_address());
        Ok(())
    }

    async fn stop_tunnel(&self) -> Result<(), BackendError> {
        if self.lock().status.is_idle() {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Disconnecting);
        self.pause().await;

        {
            let mut state = self.lock();
            state.tun2socks = None;
            state.traffic = TrafficStats::default();
        }
        self.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn send_provider_message(&self, message: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let state = self.lock();
        if state.tun2socks.is_none() {
            return Err(BackendError::NotConfigured);
        }

        let reply = match AppMessage::parse(&message) {
            AppMessage::Traffic => state.traffic.to_reply().into_bytes(),
            AppMessage::Delay(url) => {
                debug!("Delay probe to {}", url);
                state.delay_ms.to_string().into_bytes()
            }
            AppMessage::Echo(data) => data,
        };
        Ok(reply)
    }

    fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    fn configured_server(&self) -> Option<String> {
        self.lock().config.as_ref().map(|c| c.server_address().to_string())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xray::translate;

    fn ipsec() -> TunnelConfiguration {
        TunnelConfiguration::IpSec(IpSecConfiguration::from_credentials(&VpnCredentials::new(
            "vpn.example.com",
            "user",
            "pass",
            "psk",
        )))
    }

    #[test]
    fn test_ipsec_profile() {
        let TunnelConfiguration::IpSec(profile) = ipsec() else {
            panic!("expected ipsec");
        };
        assert_eq!(profile.remote_identifier, "vpn.example.com");
        assert!(profile.local_identifier.is_empty());
        assert!(profile.use_extended_authentication);
        assert!(!format!("{profile:?}").contains("pass\""));
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let backend = SimulatedBackend::new();
        assert_eq!(backend.start_tunnel().await, Err(BackendError::NotConfigured));
        assert_eq!(backend.status(), ConnectionStatus::Invalid);
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let backend = SimulatedBackend::new();
        let mut rx = backend.subscribe();

        backend.save_configuration(ipsec()).await.unwrap();
        assert_eq!(backend.status(), ConnectionStatus::Disconnected);

        backend.start_tunnel().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ConnectionStatus::Connecting);
        assert_eq!(rx.recv().await.unwrap(), ConnectionStatus::Connected);
        assert_eq!(backend.configured_server().as_deref(), Some("vpn.example.com"));

        backend.stop_tunnel().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ConnectionStatus::Disconnecting);
        assert_eq!(rx.recv().await.unwrap(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_denied_permission() {
        let backend = SimulatedBackend::new().denying_permission();
        assert_eq!(backend.request_permission().await, Ok(false));
        assert_eq!(
            backend.save_configuration(ipsec()).await,
            Err(BackendError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn test_packet_tunnel_reads_socks_port() {
        let xray = translate("vless://id@h.example:443")
            .unwrap()
            .with_socks_port(1086);
        let config = PacketTunnelConfiguration::new(xray.to_bytes().unwrap(), DEFAULT_PROVIDER_BUNDLE_ID, "Germany");
        assert_eq!(config.description, "Rock VPN - Germany (VLESS)");

        let backend = SimulatedBackend::new();
        backend
            .save_configuration(TunnelConfiguration::PacketTunnel(config))
            .await
            .unwrap();
        backend.start_tunnel().await.unwrap();

        assert_eq!(backend.tun2socks().unwrap().socks_port, 1086);
        assert_eq!(backend.configured_server().as_deref(), Some("127.0.0.1"));

        backend.record_traffic(2048, 4096);
        let reply = backend
            .send_provider_message(AppMessage::Traffic.to_bytes())
            .await
            .unwrap();
        assert_eq!(reply, b"2048,4096");

        let echo = backend.send_provider_message(b"ping".to_vec()).await.unwrap();
        assert_eq!(echo, b"ping");
    }

    #[tokio::test]
    async fn test_provider_message_needs_packet_tunnel() {
        let backend = SimulatedBackend::new();
        backend.save_configuration(ipsec()).await.unwrap();
        backend.start_tunnel().await.unwrap();

        assert_eq!(
            backend.send_provider_message(AppMessage::Traffic.to_bytes()).await,
            Err(BackendError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_packet_tunnel_rejects_bad_config() {
        let config = PacketTunnelConfiguration::new(b"{}".to_vec(), DEFAULT_PROVIDER_BUNDLE_ID, "X");
        let backend = SimulatedBackend::new();
        backend
            .save_configuration(TunnelConfiguration::PacketTunnel(config))
            .await
            .unwrap();

        assert!(matches!(backend.start_tunnel().await, Err(BackendError::Start(_))));
        assert_eq!(backend.status(), ConnectionStatus::Disconnected);
    }
}
