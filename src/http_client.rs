//! Per-session HTTP client and fetch helpers.
//!
//! Every simulated session gets its own [`Client`], bound to the session's
//! source address, so sessions never share connections. Redirects are never
//! followed by the transport; the resolution chain handles them explicitly.

use crate::config::ClientIdentity;
use crate::error::{Result, SimError};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode, redirect};
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default overall timeout for one request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// TCP keep-alive probe interval on session sockets.
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Configuration for [`build_session_client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local address outgoing connections bind to.
    ///
    /// When `None`, the OS picks the source address.
    pub source_addr: Option<IpAddr>,
    /// Limit on establishing a TCP connection.
    pub connect_timeout: Duration,
    /// Limit on one complete request, body included.
    pub request_timeout: Duration,
    /// Reuse connections within the session.
    pub keep_alive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            source_addr: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            keep_alive: true,
        }
    }
}

/// Build a client for one session.
///
/// # Errors
///
/// Returns [`SimError::Transport`] if the TLS backend cannot be initialised.
pub fn build_session_client(config: &ClientConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::none())
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .tcp_keepalive(TCP_KEEPALIVE)
        .local_address(config.source_addr);

    if !config.keep_alive {
        builder = builder.pool_max_idle_per_host(0);
    }

    Ok(builder.build()?)
}

/// GET `url` with the identity header and require `expected` status.
///
/// # Errors
///
/// [`SimError::Transport`] on connection failure or timeout,
/// [`SimError::UnexpectedStatus`] when the server answers anything else.
pub async fn get_expecting(
    client: &Client,
    url: &Url,
    identity: &ClientIdentity,
    expected: StatusCode,
) -> Result<Response> {
    debug!("GET {}", url);

    let response = client
        .get(url.clone())
        .header(identity.header.as_str(), identity.value.as_str())
        .send()
        .await?;

    if response.status() != expected {
        return Err(SimError::UnexpectedStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response)
}

/// Read a response body to the end, discarding it. Returns the byte count.
pub async fn drain(response: Response) -> Result<u64> {
    let mut stream = response.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        total += chunk?.len() as u64;
    }

    Ok(total)
}

/// GET a media object, require 200 and drain it. Returns the byte count.
pub async fn download(client: &Client, url: &Url, identity: &ClientIdentity) -> Result<u64> {
    let response = get_expecting(client, url, identity, StatusCode::OK).await?;
    let bytes = drain(response).await?;
    debug!("Data received complete {} ({} bytes)", url, bytes);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> ClientIdentity {
        ClientIdentity::new("X-Test-Agent", "playgen")
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn client_config_defaults() {
        let cfg = ClientConfig::default();
        assert!(cfg.source_addr.is_none());
        assert_eq!(
            cfg.connect_timeout,
            Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
        );
        assert!(cfg.keep_alive);
    }

    #[test]
    fn builds_client_without_keep_alive() {
        let cfg = ClientConfig {
            keep_alive: false,
            source_addr: Some("127.0.0.1".parse().unwrap()),
            ..Default::default()
        };
        assert!(build_session_client(&cfg).is_ok());
    }

    #[tokio::test]
    async fn sends_identity_header() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/seg.ts"))
            .and(header("X-Test-Agent", "playgen"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_session_client(&ClientConfig::default()).unwrap();
        let bytes = download(&client, &url(&server, "/seg.ts"), &identity())
            .await
            .unwrap();
        assert_eq!(bytes, 1024);
    }

    #[tokio::test]
    async fn unexpected_status_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_session_client(&ClientConfig::default()).unwrap();
        let err = download(&client, &url(&server, "/missing.ts"), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::UnexpectedStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/elsewhere"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/elsewhere"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = build_session_client(&ClientConfig::default()).unwrap();
        let response = get_expecting(
            &client,
            &url(&server, "/moved"),
            &identity(),
            StatusCode::MOVED_PERMANENTLY,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let client = build_session_client(&ClientConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let target = Url::parse("http://127.0.0.1:1/seg.ts").unwrap();
        let err = download(&client, &target, &identity()).await.unwrap_err();
        assert!(matches!(err, SimError::Transport(_)));
    }
}
