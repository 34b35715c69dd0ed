//! HTTP Client
//!
//! Uses hyper with tokio for single-shot HTTP/1.1 JSON requests.
//! Features:
//! - Automatic HTTPS with rustls (webpki roots)
//! - Whole-request timeout
//! - Origin-form request targets with an explicit Host header

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use url::Url;

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Body read error: {0}")]
    BodyError(String),

    #[error("Response body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout (connect, send, read body)
    pub timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
    /// Maximum response body size
    pub max_body_size: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("RockVPN/{}", env!("CARGO_PKG_VERSION")),
            max_body_size: 1024 * 1024,
        }
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
    /// Total request time
    pub total_time: Duration,
}

impl Response {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get body as (lossy) text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Get Content-Type header
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }
}

/// Single-connection-per-request HTTP client
pub struct HttpClient {
    config: HttpClientConfig,
    tls: Arc<ClientConfig>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Self {
        info!("HTTP client initialized (timeout: {:?})", config.timeout);

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            config,
            tls: Arc::new(tls),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    /// Active configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Perform a GET request
    pub async fn get(&self, url: &Url) -> Result<Response, HttpError> {
        self.request(Method::GET, url, None).await
    }

    /// Perform a POST request with a JSON body
    pub async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<Response, HttpError> {
        self.request(Method::POST, url, Some(body)).await
    }

    /// Perform an HTTP request under the configured timeout
    pub async fn request(
        &self,
        method: Method,
        url: &Url,
        body: Option<Vec<u8>>,
    ) -> Result<Response, HttpError> {
        match tokio::time::timeout(self.config.timeout, self.send(method, url, body)).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<Vec<u8>>,
    ) -> Result<Response, HttpError> {
        let start = Instant::now();

        // 1. Resolve target
        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(HttpError::InvalidUrl(format!("unsupported scheme: {other}"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("No host in URL".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::InvalidUrl("No port in URL".to_string()))?;

        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        // 2. Build request
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, host_header)
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| HttpError::HttpError(e.to_string()))?;

        // 3. Connect (IPv6 literals come bracketed from the URL)
        let connect_host = host.trim_start_matches('[').trim_end_matches(']');
        let stream = tokio::net::TcpStream::connect((connect_host, port))
            .await
            .map_err(|e| HttpError::ConnectionFailed(e.to_string()))?;

        let response = if is_https {
            let connector = TlsConnector::from(self.tls.clone());
            let server_name = rustls::pki_types::ServerName::try_from(connect_host.to_string())
                .map_err(|_| HttpError::TlsError("Invalid server name".to_string()))?;
            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::TlsError(e.to_string()))?;
            Self::exchange(tls_stream, request).await?
        } else {
            Self::exchange(stream, request).await?
        };

        // 4. Read response
        let status = response.status();
        let headers = response.headers().clone();
        let limit = self.config.max_body_size;
        let collected = Limited::new(response.into_body(), limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    HttpError::BodyTooLarge(limit)
                } else {
                    HttpError::BodyError(e.to_string())
                }
            })?;
        let body = collected.to_bytes().to_vec();

        let total_time = start.elapsed();
        debug!(
            "HTTP {} {} -> {} ({} bytes, {:?})",
            method, url, status, body.len(), total_time
        );

        Ok(Response {
            status,
            headers,
            body,
            total_time,
        })
    }

    async fn exchange<S>(
        stream: S,
        request: Request<Full<Bytes>>,
    ) -> Result<hyper::Response<hyper::body::Incoming>, HttpError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::HttpError(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!("Connection error: {}", e);
            }
        });

        sender
            .send_request(request)
            .await
            .map_err(|e| HttpError::HttpError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Request as seen by the fake server
    #[derive(Debug, Clone)]
    pub struct Captured {
        pub request_line: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl Captured {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Serve canned replies on loopback, one connection per reply
    pub async fn fake_server(
        replies: Vec<(u16, String)>,
    ) -> (Url, mpsc::UnboundedReceiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, reply_body) in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };

                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
                let request_line = lines.next().unwrap_or_default().to_string();
                let headers: Vec<(String, String)> = lines
                    .filter_map(|l| l.split_once(':'))
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .collect();
                let length = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.parse::<usize>().ok())
                    .unwrap_or(0);

                while buf.len() < header_end + length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let _ = tx.send(Captured {
                    request_line,
                    headers,
                    body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
                });

                let reply = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply_body}",
                    reply_body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{addr}")).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::with_defaults();
        assert_eq!(client.config().timeout, Duration::from_secs(10));
        assert!(client.config().user_agent.starts_with("RockVPN/"));
    }

    #[tokio::test]
    async fn test_post_json() {
        let (base, mut rx) = fake_server(vec![(200, r#"{"ok":true}"#.to_string())]).await;
        let client = HttpClient::with_defaults();

        let url = base.join("/api/echo?x=1").unwrap();
        let response = client.post_json(&url, br#"{"a":1}"#.to_vec()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.text(), r#"{"ok":true}"#);
        assert_eq!(response.content_type(), Some("application/json"));

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.request_line, "POST /api/echo?x=1 HTTP/1.1");
        assert_eq!(seen.header("content-type"), Some("application/json"));
        assert_eq!(seen.header("host"), Some(format!("127.0.0.1:{}", base.port().unwrap()).as_str()));
        assert_eq!(seen.body, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_error_status_is_returned() {
        let (base, _rx) = fake_server(vec![(503, "{}".to_string())]).await;
        let client = HttpClient::with_defaults();

        let response = client.get(&base.join("/down").unwrap()).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_body_size_limit() {
        let (base, _rx) = fake_server(vec![
            (200, "x".repeat(64)),
            (200, "x".repeat(16)),
        ])
        .await;
        let client = HttpClient::new(HttpClientConfig {
            max_body_size: 16,
            ..HttpClientConfig::default()
        });

        let url = base.join("/big").unwrap();
        assert!(matches!(client.get(&url).await, Err(HttpError::BodyTooLarge(16))));

        let response = client.get(&url).await.unwrap();
        assert_eq!(response.body.len(), 16);
    }

    #[tokio::test]
    async fn test_timeout() {
        // Accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = HttpClient::new(HttpClientConfig {
            timeout: Duration::from_millis(100),
            ..HttpClientConfig::default()
        });
        let url = Url::parse(&format!("http://{addr}/slow")).unwrap();
        assert!(matches!(client.get(&url).await, Err(HttpError::Timeout)));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let client = HttpClient::with_defaults();
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(matches!(client.get(&url).await, Err(HttpError::InvalidUrl(_))));
    }
}
