//! Packet Tunnel Settings
//!
//! Everything the packet-tunnel extension needs besides the XRay config
//! itself: the virtual interface settings, the Tun2Socks configuration that
//! bridges the tun device to XRay's SOCKS inbound, and the small app-message
//! protocol the host app uses to poll traffic and latency.
//!
//! ```text
//!  tun (198.18.0.1) ──▶ Tun2Socks ──▶ SOCKS 127.0.0.1:10808 ──▶ XRay ──▶ VLESS server
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// App message asking for traffic counters
pub const TRAFFIC_MESSAGE: &str = "xray_traffic";

/// App message prefix asking for a delay measurement (`xray_delay<url>`)
pub const DELAY_MESSAGE_PREFIX: &str = "xray_delay";

/// Network settings applied to the virtual interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketTunnelSettings {
    /// Placeholder remote address required by the OS
    pub tunnel_remote_address: String,
    pub mtu: u32,
    pub ipv4_address: String,
    pub ipv4_subnet_mask: String,
    pub ipv6_address: String,
    pub ipv6_prefix_length: u8,
    /// Route everything through the tunnel
    pub include_default_routes: bool,
    pub dns_servers: Vec<String>,
}

impl Default for PacketTunnelSettings {
    fn default() -> Self {
        Self {
            tunnel_remote_address: "254.1.1.1".to_string(),
            mtu: 9000,
            ipv4_address: "198.18.0.1".to_string(),
            ipv4_subnet_mask: "255.255.0.0".to_string(),
            ipv6_address: "fd6e:a81b:704f:1211::1".to_string(),
            ipv6_prefix_length: 64,
            include_default_routes: true,
            dns_servers: vec!["8.8.8.8".to_string(), "114.114.114.114".to_string()],
        }
    }
}

/// Tun2Socks configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tun2SocksConfig {
    pub mtu: u32,
    pub socks_address: String,
    pub socks_port: u16,
    pub udp: bool,
    pub task_stack_size: u32,
    pub connect_timeout: Duration,
    pub read_write_timeout: Duration,
    pub log_level: String,
    pub limit_nofile: u32,
}

impl Tun2SocksConfig {
    /// Configuration pointing at a local SOCKS port
    pub fn new(socks_port: u16) -> Self {
        Self {
            mtu: 9000,
            socks_address: "127.0.0.1".to_string(),
            socks_port,
            udp: true,
            task_stack_size: 20480,
            connect_timeout: Duration::from_millis(5000),
            read_write_timeout: Duration::from_millis(60000),
            log_level: "debug".to_string(),
            limit_nofile: 65535,
        }
    }

    /// Render the YAML document Tun2Socks reads
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let doc = Tun2SocksDocument {
            tunnel: TunnelSection { mtu: self.mtu },
            socks5: Socks5Section {
                port: self.socks_port,
                address: &self.socks_address,
                udp: self.udp.then_some("udp"),
            },
            misc: MiscSection {
                task_stack_size: self.task_stack_size,
                connect_timeout: self.connect_timeout.as_millis() as u64,
                read_write_timeout: self.read_write_timeout.as_millis() as u64,
                log_file: "stdout",
                log_level: &self.log_level,
                limit_nofile: self.limit_nofile,
            },
        };
        serde_yaml::to_string(&doc)
    }
}

#[derive(Serialize)]
struct Tun2SocksDocument<'a> {
    tunnel: TunnelSection,
    socks5: Socks5Section<'a>,
    misc: MiscSection<'a>,
}

#[derive(Serialize)]
struct TunnelSection {
    mtu: u32,
}

#[derive(Serialize)]
struct Socks5Section<'a> {
    port: u16,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    udp: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct MiscSection<'a> {
    task_stack_size: u32,
    connect_timeout: u64,
    read_write_timeout: u64,
    log_file: &'static str,
    log_level: &'a str,
    limit_nofile: u32,
}

/// Traffic counters reported by the tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    /// Bytes sent upstream
    pub up_bytes: u64,
    /// Bytes received
    pub down_bytes: u64,
}

impl TrafficStats {
    /// Parse the `"<up>,<down>"` reply
    pub fn parse(reply: &str) -> Option<Self> {
        let (up, down) = reply.trim().split_once(',')?;
        Some(Self {
            up_bytes: up.trim().parse().ok()?,
            down_bytes: down.trim().parse().ok()?,
        })
    }

    /// Reply text for these counters
    pub fn to_reply(&self) -> String {
        format!("{},{}", self.up_bytes, self.down_bytes)
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "↑ {} | ↓ {}",
            format_bytes(self.up_bytes),
            format_bytes(self.down_bytes)
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Message the host app sends to the running tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMessage {
    /// Ask for traffic counters
    Traffic,
    /// Measure delay to a URL through the tunnel
    Delay(String),
    /// Anything else is echoed back
    Echo(Vec<u8>),
}

impl AppMessage {
    /// Classify raw message bytes
    pub fn parse(data: &[u8]) -> Self {
        match std::str::from_utf8(data) {
            Ok(TRAFFIC_MESSAGE) => AppMessage::Traffic,
            Ok(text) => match text.strip_prefix(DELAY_MESSAGE_PREFIX) {
                Some(url) => AppMessage::Delay(url.to_string()),
                None => AppMessage::Echo(data.to_vec()),
            },
            Err(_) => AppMessage::Echo(data.to_vec()),
        }
    }

    /// Encode for sending
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            AppMessage::Traffic => TRAFFIC_MESSAGE.as_bytes().to_vec(),
            AppMessage::Delay(url) => format!("{DELAY_MESSAGE_PREFIX}{url}").into_bytes(),
            AppMessage::Echo(data) => data.clone(),
        }
    }
}

/// Parse a delay reply in milliseconds; `-1` or garbage means unreachable
pub fn parse_delay_reply(reply: &str) -> Option<Duration> {
    let ms: i64 = reply.trim().parse().ok()?;
    u64::try_from(ms).ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PacketTunnelSettings::default();
        assert_eq!(settings.mtu, 9000);
        assert_eq!(settings.ipv4_address, "198.18.0.1");
        assert_eq!(settings.dns_servers.len(), 2);
    }

    #[test]
    fn test_tun2socks_render() {
        let yaml = Tun2SocksConfig::new(10808).render().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["tunnel"]["mtu"].as_u64(), Some(9000));
        assert_eq!(doc["socks5"]["port"].as_u64(), Some(10808));
        assert_eq!(doc["socks5"]["address"].as_str(), Some("127.0.0.1"));
        assert_eq!(doc["socks5"]["udp"].as_str(), Some("udp"));
        assert_eq!(doc["misc"]["task-stack-size"].as_u64(), Some(20480));
        assert_eq!(doc["misc"]["connect-timeout"].as_u64(), Some(5000));
        assert_eq!(doc["misc"]["read-write-timeout"].as_u64(), Some(60000));
        assert_eq!(doc["misc"]["log-file"].as_str(), Some("stdout"));
        assert_eq!(doc["misc"]["log-level"].as_str(), Some("debug"));
        assert_eq!(doc["misc"]["limit-nofile"].as_u64(), Some(65535));
    }

    #[test]
    fn test_tun2socks_without_udp() {
        let mut config = Tun2SocksConfig::new(1080);
        config.udp = false;
        let doc: serde_yaml::Value = serde_yaml::from_str(&config.render().unwrap()).unwrap();
        assert!(doc["socks5"].get("udp").is_none());
        assert_eq!(doc["socks5"]["port"].as_u64(), Some(1080));
    }

    #[test]
    fn test_traffic_stats() {
        let stats = TrafficStats::parse("1024,2048").unwrap();
        assert_eq!(stats.up_bytes, 1024);
        assert_eq!(stats.down_bytes, 2048);
        assert_eq!(stats.to_reply(), "1024,2048");
        assert_eq!(stats.format(), "↑ 1.00 KB | ↓ 2.00 KB");

        assert!(TrafficStats::parse("nope").is_none());
        assert!(TrafficStats::parse("1,x").is_none());
    }

    #[test]
    fn test_app_message() {
        assert_eq!(AppMessage::parse(b"xray_traffic"), AppMessage::Traffic);
        assert_eq!(
            AppMessage::parse(b"xray_delayhttps://www.google.com/generate_204"),
            AppMessage::Delay("https://www.google.com/generate_204".to_string())
        );
        assert_eq!(AppMessage::parse(b"hello"), AppMessage::Echo(b"hello".to_vec()));

        let msg = AppMessage::Delay("https://a.example".to_string());
        assert_eq!(AppMessage::parse(&msg.to_bytes()), msg);
    }

    #[test]
    fn test_delay_reply() {
        assert_eq!(parse_delay_reply("120"), Some(Duration::from_millis(120)));
        assert_eq!(parse_delay_reply("-1"), None);
        assert_eq!(parse_delay_reply(""), None);
    }
}
