//! Connection Status
//!
//! The OS VPN subsystem owns the connection state machine. This module only
//! names its states and relays transitions to listeners.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Connection status as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No usable configuration
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    /// Re-establishing after a network change
    Reasserting,
    Disconnecting,
}

impl ConnectionStatus {
    /// Status string relayed across the method channel
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Invalid => "invalid",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reasserting => "reasserting",
            ConnectionStatus::Disconnecting => "disconnecting",
        }
    }

    /// Check if traffic flows through the tunnel
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Check if the OS is moving between states
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Reasserting
                | ConnectionStatus::Disconnecting
        )
    }

    /// Check if a new connection may be started
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionStatus::Invalid | ConnectionStatus::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invalid" => Ok(ConnectionStatus::Invalid),
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "connecting" => Ok(ConnectionStatus::Connecting),
            "connected" => Ok(ConnectionStatus::Connected),
            "reasserting" => Ok(ConnectionStatus::Reasserting),
            "disconnecting" => Ok(ConnectionStatus::Disconnecting),
            other => Err(format!("unknown connection status: {other}")),
        }
    }
}

/// Status change relayed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: ConnectionStatus,
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    /// Bare event for a status
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            is_connected: status.is_connected(),
            country_name: None,
            country_code: None,
            server_address: None,
            error: None,
        }
    }

    /// Attach the server the event refers to
    pub fn with_server(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Attach country metadata
    pub fn with_country(mut self, code: Option<String>, name: Option<String>) -> Self {
        self.country_code = code;
        self.country_name = name;
        self
    }

    /// Attach an error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Fan-out of status events to any number of listeners
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcaster {
    /// Create with a bounded backlog per listener
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Relay an event; returns how many listeners received it
    pub fn publish(&self, event: StatusEvent) -> usize {
        debug!("VPN status: {}", event.status);
        self.tx.send(event).unwrap_or(0)
    }

    /// Register a listener
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Number of live listeners
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(ConnectionStatus::Reasserting.as_str(), "reasserting");
        assert_eq!("CONNECTED".parse::<ConnectionStatus>(), Ok(ConnectionStatus::Connected));
        assert!("bogus".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn test_status_predicates() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Reasserting.is_connected());
        assert!(ConnectionStatus::Disconnecting.is_transitioning());
        assert!(ConnectionStatus::Invalid.is_idle());
        assert!(!ConnectionStatus::Connecting.is_idle());
    }

    #[test]
    fn test_event_json() {
        let event = StatusEvent::new(ConnectionStatus::Connected)
            .with_server("93.184.216.34")
            .with_country(Some("DE".into()), Some("Germany".into()));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "connected");
        assert_eq!(json["isConnected"], true);
        assert_eq!(json["countryName"], "Germany");
        assert_eq!(json["serverAddress"], "93.184.216.34");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_broadcast() {
        let broadcaster = StatusBroadcaster::default();
        assert_eq!(broadcaster.publish(StatusEvent::new(ConnectionStatus::Connecting)), 0);

        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.publish(StatusEvent::new(ConnectionStatus::Connected)), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, ConnectionStatus::Connected);
        assert!(event.is_connected);
    }
}
