//! Proxy Router Client
//!
//! Talks to the router backend that coordinates peers: a device registers,
//! keeps itself alive with heartbeats, lists other peers, and asks to be
//! routed through one of them.
//!
//! Every call is a single attempt. Failed heartbeats are logged and the
//! next one goes out on schedule.

use crate::api::{
    ClientsResponse, Endpoint, HeartbeatRequest, HeartbeatResponse, PeerInfo, PingRequest,
    PingResponse, RegisterRequest, RegisterResponse, RouteRequest, RouteResponse,
};
use crate::client::{HttpClient, HttpClientConfig, HttpError};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

/// Router client errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid router URL: {0}")]
    InvalidBaseUrl(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Router returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid router response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Random client id (`rock-` + 16 hex digits)
pub fn generate_client_id() -> String {
    format!("rock-{:016x}", rand::thread_rng().r#gen::<u64>())
}

/// Proxy router client
pub struct ProxyRouterClient {
    http: HttpClient,
    base_url: Url,
    client_id: String,
}

impl ProxyRouterClient {
    /// Create a client with a fresh client id
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouterError> {
        let base = Url::parse(base_url).map_err(|e| RouterError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(RouterError::InvalidBaseUrl(base_url.to_string()));
        }

        let http = HttpClient::new(HttpClientConfig {
            timeout,
            ..HttpClientConfig::default()
        });

        Ok(Self {
            http,
            base_url: base,
            client_id: generate_client_id(),
        })
    }

    /// Use a known client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL of an endpoint, keeping any path prefix of the base
    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, RouterError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, endpoint.path()))
            .map_err(|e| RouterError::InvalidBaseUrl(e.to_string()))
    }

    /// Register this device as a peer
    pub async fn register(
        &self,
        device_name: &str,
        country_code: Option<&str>,
        socks_port: Option<u16>,
    ) -> Result<RegisterResponse, RouterError> {
        let request = RegisterRequest {
            client_id: self.client_id.clone(),
            device_name: device_name.to_string(),
            platform: std::env::consts::OS.to_string(),
            country_code: country_code.map(str::to_string),
            socks_port,
        };

        let response: RegisterResponse = self.post(Endpoint::Register, &request).await?;
        info!(
            "Registered with proxy router as {} (success: {})",
            self.client_id, response.success
        );
        Ok(response)
    }

    /// Tell the router this device is still alive
    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, RouterError> {
        let request = HeartbeatRequest {
            client_id: self.client_id.clone(),
        };
        self.post(Endpoint::Heartbeat, &request).await
    }

    /// List registered peers
    pub async fn clients(&self) -> Result<Vec<PeerInfo>, RouterError> {
        let url = self.endpoint_url(Endpoint::Clients)?;
        let response = self.http.get(&url).await?;
        let peers = Self::decode::<ClientsResponse>(response)?.into_peers();
        debug!("Proxy router lists {} peers", peers.len());
        Ok(peers)
    }

    /// Route this device through a peer
    pub async fn route(&self, target_client_id: &str) -> Result<RouteResponse, RouterError> {
        let request = RouteRequest {
            client_id: self.client_id.clone(),
            target_client_id: target_client_id.to_string(),
        };

        let response: RouteResponse = self.post(Endpoint::Route, &request).await?;
        match response.proxy_endpoint() {
            Some(endpoint) => info!("Routed through {} via {}", target_client_id, endpoint),
            None => warn!(
                "Route to {} refused: {}",
                target_client_id,
                response.message.as_deref().unwrap_or("no reason given")
            ),
        }
        Ok(response)
    }

    /// Ask the router to ping an address
    pub async fn ping_ip(&self, ip: &str, port: Option<u16>) -> Result<PingResponse, RouterError> {
        let request = PingRequest {
            ip: ip.to_string(),
            port,
        };
        self.post(Endpoint::PingIp, &request).await
    }

    /// Send heartbeats every `interval` until the handle is stopped
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> HeartbeatHandle {
        let client = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sent = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let (sent_count, failed_count) = (sent.clone(), failed.clone());

        info!("Starting proxy router heartbeat every {:?}", interval);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match client.heartbeat().await {
                            Ok(_) => {
                                sent_count.fetch_add(1, Ordering::Relaxed);
                                debug!("Proxy router heartbeat");
                            }
                            Err(e) => {
                                failed_count.fetch_add(1, Ordering::Relaxed);
                                warn!("Proxy router heartbeat failed: {}", e);
                            }
                        }
                    }
                }
            }

            debug!("Proxy router heartbeat stopped");
        });

        HeartbeatHandle {
            stop: Some(stop_tx),
            join,
            sent,
            failed,
        }
    }

    async fn post<Req, Resp>(&self, endpoint: Endpoint, body: &Req) -> Result<Resp, RouterError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint)?;
        let bytes = serde_json::to_vec(body)?;
        let response = self.http.post_json(&url, bytes).await?;
        Self::decode(response)
    }

    fn decode<T: DeserializeOwned>(response: crate::client::Response) -> Result<T, RouterError> {
        if !response.is_success() {
            return Err(RouterError::Status {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }
}

/// Running heartbeat task
pub struct HeartbeatHandle {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl HeartbeatHandle {
    /// Successful heartbeats so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Failed heartbeats so far
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop the task and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.join).await;
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::fake_server;

    fn client(base: &Url) -> ProxyRouterClient {
        ProxyRouterClient::new(base.as_str(), Duration::from_secs(2))
            .unwrap()
            .with_client_id("rock-test")
    }

    #[test]
    fn test_client_id() {
        let id = generate_client_id();
        assert!(id.starts_with("rock-"));
        assert_eq!(id.len(), 5 + 16);
        assert_ne!(id, generate_client_id());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ProxyRouterClient::new("not a url", Duration::from_secs(1)).is_err());
        assert!(ProxyRouterClient::new("ftp://router", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_endpoint_url_keeps_prefix() {
        let router = ProxyRouterClient::new("https://router.example.com/v1/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            router.endpoint_url(Endpoint::Heartbeat).unwrap().as_str(),
            "https://router.example.com/v1/api/proxy/heartbeat"
        );
    }

    #[tokio::test]
    async fn test_register() {
        let (base, mut rx) = fake_server(vec![(
            200,
            r#"{"success":true,"clientId":"rock-test","publicIp":"203.0.113.9"}"#.to_string(),
        )])
        .await;

        let response = client(&base)
            .register("pixel-8", Some("DE"), Some(10808))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.public_ip.as_deref(), Some("203.0.113.9"));

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.request_line, "POST /api/proxy/register HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body["clientId"], "rock-test");
        assert_eq!(body["deviceName"], "pixel-8");
        assert_eq!(body["countryCode"], "DE");
        assert_eq!(body["socksPort"], 10808);
    }

    #[tokio::test]
    async fn test_clients() {
        let (base, mut rx) = fake_server(vec![(
            200,
            r#"{"clients":[{"clientId":"a","publicIp":"198.51.100.1"},{"clientId":"b","online":false}]}"#
                .to_string(),
        )])
        .await;

        let peers = client(&base).clients().await.unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].public_ip.as_deref(), Some("198.51.100.1"));
        assert!(!peers[1].online);

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.request_line, "GET /api/proxy/clients HTTP/1.1");
    }

    #[tokio::test]
    async fn test_route_and_ping() {
        let (base, mut rx) = fake_server(vec![
            (
                200,
                r#"{"success":true,"proxyHost":"198.51.100.1","proxyPort":1080}"#.to_string(),
            ),
            (200, r#"{"reachable":true,"latencyMs":23}"#.to_string()),
        ])
        .await;
        let router = client(&base);

        let route = router.route("peer-a").await.unwrap();
        assert_eq!(route.proxy_endpoint().as_deref(), Some("198.51.100.1:1080"));
        let seen = rx.recv().await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body["targetClientId"], "peer-a");

        let ping = router.ping_ip("198.51.100.1", None).await.unwrap();
        assert!(ping.reachable);
        assert_eq!(ping.latency_ms, Some(23));
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.request_line, "POST /api/proxy/ping-ip HTTP/1.1");
    }

    #[tokio::test]
    async fn test_error_status() {
        let (base, _rx) = fake_server(vec![(404, r#"{"error":"unknown client"}"#.to_string())]).await;

        let err = client(&base).heartbeat().await.unwrap_err();
        match err {
            RouterError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("unknown client"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_bad_json() {
        let (base, _rx) = fake_server(vec![(200, "not json".to_string())]).await;
        let err = client(&base).heartbeat().await.unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_task() {
        let replies = (0..3)
            .map(|_| (200, r#"{"success":true}"#.to_string()))
            .collect();
        let (base, mut rx) = fake_server(replies).await;
        let router = Arc::new(client(&base));

        let handle = router.spawn_heartbeat(Duration::from_millis(20));
        for _ in 0..2 {
            let seen = rx.recv().await.unwrap();
            assert_eq!(seen.request_line, "POST /api/proxy/heartbeat HTTP/1.1");
        }

        handle.stop().await;
    }
}
