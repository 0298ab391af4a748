//! Drives one RTSP control session and drains its media for the play budget.

use super::connector::RtspConnector;
use super::headers::{sdp_connection_host, server_port, session_id};
use super::message::{Inbound, RtspConnection, RtspResponse};
use super::{CICP_MEDIA_PORT, DEFAULT_RTSP_PORT, RtspState};
use crate::config::{ClientIdentity, RtspFlavor};
use crate::error::{Result, SimError};
use crate::http_client::download;
use reqwest::Client;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};
use url::Url;

/// Message code of the CICP side-channel registration frame
const CICP_REGISTER: u32 = 10002;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Knobs for one RTSP session
#[derive(Debug, Clone)]
pub struct RtspOptions {
    pub flavor: RtspFlavor,
    pub play_duration: Duration,
    pub heartbeat_interval: Duration,
    /// Upper bound on one media read, so timers are checked on a silent stream
    pub poll_interval: Duration,
    /// Wait between SETUP and PLAY
    pub pre_play_delay: Duration,
    /// How long to drain the control connection after TEARDOWN
    pub drain_timeout: Duration,
    /// Limit on one request/response exchange
    pub request_timeout: Duration,
    /// Identity value doubles as the RTSP `User-Agent`
    pub identity: ClientIdentity,
    pub source_addr: IpAddr,
}

impl RtspOptions {
    pub fn new(
        flavor: RtspFlavor,
        play_duration: Duration,
        source_addr: IpAddr,
        identity: ClientIdentity,
    ) -> Self {
        Self {
            flavor,
            play_duration,
            heartbeat_interval: flavor.heartbeat_interval(),
            poll_interval: Duration::from_secs(1),
            pre_play_delay: Duration::ZERO,
            drain_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            identity,
            source_addr,
        }
    }
}

/// How a session that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Play budget spent, TEARDOWN issued
    TornDown,
    /// Server closed the media stream first
    StreamEnded,
}

/// Control connection plus the state negotiated during SETUP
struct Negotiated<S> {
    control: RtspConnection<S>,
    url: Url,
    session: String,
    /// `Transport` header of the accepted SETUP
    transport: Option<String>,
    media: Option<S>,
}

pub struct RtspPlayer<'a, C> {
    connector: &'a C,
    options: &'a RtspOptions,
    http: &'a Client,
}

impl<'a, C> RtspPlayer<'a, C>
where
    C: RtspConnector,
{
    pub fn new(connector: &'a C, options: &'a RtspOptions, http: &'a Client) -> Self {
        Self {
            connector,
            options,
            http,
        }
    }

    /// Run DESCRIBE, SETUP, PLAY and the read loop against `url`.
    ///
    /// Once SETUP has produced a session, any later failure still sends a
    /// TEARDOWN before the error is returned.
    pub async fn run(&self, url: &Url) -> Result<SessionEnd> {
        let mut control = self.open(url).await?;

        let sdp = self.describe(&mut control, url).await?;

        let setup_url = match self.options.flavor {
            RtspFlavor::Cicp => cicp_setup_url(url, &sdp)?,
            _ => url.clone(),
        };
        if !same_endpoint(url, &setup_url) {
            control.shutdown().await;
            control = self.open(&setup_url).await?;
        }

        let mut session = self.setup(control, &setup_url).await?;

        let result = self.drive(&mut session).await;
        if let Err(e) = &result {
            debug!("Session {} aborting: {}", session.session, e);
            self.abort(&mut session).await;
        }
        result
    }

    async fn drive(&self, session: &mut Negotiated<C::Stream>) -> Result<SessionEnd> {
        session.media = self.open_media(session).await?;

        if !self.options.pre_play_delay.is_zero() {
            debug!("Waiting {:?} before PLAY", self.options.pre_play_delay);
            sleep(self.options.pre_play_delay).await;
        }

        self.play(session).await?;
        self.stream(session).await
    }

    async fn open(&self, url: &Url) -> Result<RtspConnection<C::Stream>> {
        let host = url
            .host_str()
            .ok_or_else(|| SimError::MalformedReference(format!("no host in {url}")))?;
        let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);

        let stream = self.connector.connect(host, port).await?;
        Ok(RtspConnection::new(stream, self.options.identity.value.clone()))
    }

    async fn exchange(
        &self,
        control: &mut RtspConnection<C::Stream>,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        timeout(
            self.options.request_timeout,
            control.request(method, url, headers),
        )
        .await?
    }

    async fn describe(&self, control: &mut RtspConnection<C::Stream>, url: &Url) -> Result<String> {
        let start = Instant::now();
        let response = self
            .exchange(control, "DESCRIBE", url, &[("Accept", "application/sdp")])
            .await?;
        require_status(&response, 200, RtspState::Describing)?;
        info!("describe response time: {} ms", start.elapsed().as_millis());

        Ok(response.body_text())
    }

    async fn setup(
        &self,
        mut control: RtspConnection<C::Stream>,
        url: &Url,
    ) -> Result<Negotiated<C::Stream>> {
        let transport = self.options.flavor.transport(self.options.source_addr);
        let headers = [("Transport", transport.as_str())];

        let start = Instant::now();
        let mut response = self.exchange(&mut control, "SETUP", url, &headers).await?;
        info!("setup response time: {} ms", start.elapsed().as_millis());

        let mut control_url = url.clone();
        match response.status {
            200 => {}
            301 => {
                let location = response.header("Location").ok_or_else(|| {
                    SimError::ProtocolState {
                        state: RtspState::Redirecting,
                        detail: "301 without Location".to_string(),
                    }
                })?;
                let target = url
                    .join(location)
                    .map_err(|e| SimError::MalformedReference(format!("{location}: {e}")))?;

                if !same_endpoint(url, &target) {
                    control.shutdown().await;
                    control = self.open(&target).await?;
                }

                let start = Instant::now();
                response = self.exchange(&mut control, "SETUP", &target, &headers).await?;
                require_status(&response, 200, RtspState::Redirecting)?;
                info!(
                    "redirect setup response time: {} ms, url = {}",
                    start.elapsed().as_millis(),
                    target
                );
                control_url = target;
            }
            _ => require_status(&response, 200, RtspState::SettingUp)?,
        }

        let header = response
            .header("Session")
            .ok_or_else(|| SimError::ProtocolState {
                state: RtspState::SettingUp,
                detail: "SETUP response without Session".to_string(),
            })?;
        let session = session_id(header)?;

        Ok(Negotiated {
            control,
            url: control_url,
            session,
            transport: response.header("Transport").map(str::to_string),
            media: None,
        })
    }

    /// Flavor-specific media connection, `None` when media is interleaved
    async fn open_media(&self, session: &mut Negotiated<C::Stream>) -> Result<Option<C::Stream>> {
        let host = session
            .url
            .host_str()
            .ok_or_else(|| SimError::MalformedReference(format!("no host in {}", session.url)))?;

        match self.options.flavor {
            RtspFlavor::Interleaved => Ok(None),
            RtspFlavor::DataChannel => {
                let port = session
                    .transport
                    .as_deref()
                    .and_then(server_port)
                    .ok_or_else(|| SimError::ProtocolState {
                        state: RtspState::SettingUp,
                        detail: "no server_port in Transport".to_string(),
                    })?;

                self.fetch_ad_schedule(&session.url, &session.session).await?;
                let media = self.connector.connect(host, port).await?;

                let response = self
                    .exchange(
                        &mut session.control,
                        "SET_PARAMETER",
                        &session.url,
                        &[("Session", session.session.as_str())],
                    )
                    .await?;
                require_status(&response, 200, RtspState::SettingUp)?;

                Ok(Some(media))
            }
            RtspFlavor::Cicp => {
                let id: u32 = session.session.parse().map_err(|_| SimError::ProtocolState {
                    state: RtspState::SettingUp,
                    detail: format!("session '{}' is not numeric", session.session),
                })?;

                let mut media = self.connector.connect(host, CICP_MEDIA_PORT).await?;
                timeout(self.options.request_timeout, register(&mut media, id)).await??;
                debug!("Registered session {} on media channel", id);

                Ok(Some(media))
            }
        }
    }

    async fn fetch_ad_schedule(&self, url: &Url, session: &str) -> Result<()> {
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let raw = format!(
            "http://{}/adm/adv-schedules/{}?format=cic",
            authority,
            urlencoding::encode(session)
        );
        let schedule =
            Url::parse(&raw).map_err(|e| SimError::MalformedReference(format!("{raw}: {e}")))?;

        download(self.http, &schedule, &self.options.identity).await?;
        Ok(())
    }

    async fn play(&self, session: &mut Negotiated<C::Stream>) -> Result<()> {
        let start = Instant::now();
        let response = self
            .exchange(
                &mut session.control,
                "PLAY",
                &session.url,
                &[("Session", session.session.as_str()), ("Range", "npt=0.000-")],
            )
            .await?;
        require_status(&response, 200, RtspState::Playing)?;
        info!("play response time: {} ms", start.elapsed().as_millis());
        Ok(())
    }

    /// Read loop: drain media, keep the session alive, tear down on budget.
    async fn stream(&self, session: &mut Negotiated<C::Stream>) -> Result<SessionEnd> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let started = Instant::now();
        let mut last_heartbeat = started;
        let mut pending_heartbeat = None;
        let mut received = 0u64;

        loop {
            match self.next_event(session, &mut buf).await? {
                ReadEvent::Closed => {
                    info!("stream ended after {} bytes", received);
                    if let Some(mut media) = session.media.take() {
                        let _ = media.shutdown().await;
                    }
                    session.control.shutdown().await;
                    return Ok(SessionEnd::StreamEnded);
                }
                ReadEvent::Data(n) => received += n as u64,
                ReadEvent::Response(response) => {
                    check_keepalive(&response, &mut pending_heartbeat)?
                }
                ReadEvent::Idle => {}
            }

            if started.elapsed() >= self.options.play_duration {
                debug!("Play budget spent after {} bytes", received);
                self.teardown(session).await?;
                return Ok(SessionEnd::TornDown);
            }

            if last_heartbeat.elapsed() >= self.options.heartbeat_interval {
                pending_heartbeat = self.heartbeat(session).await?;
                last_heartbeat = Instant::now();
            }
        }
    }

    /// Wait up to one poll interval for media or a control response
    async fn next_event(
        &self,
        session: &mut Negotiated<C::Stream>,
        buf: &mut [u8],
    ) -> Result<ReadEvent> {
        let poll = self.options.poll_interval;

        if let Some(media) = session.media.as_mut() {
            return match timeout(poll, media.read(buf)).await {
                Ok(Ok(0)) => Ok(ReadEvent::Closed),
                Ok(Ok(n)) => Ok(ReadEvent::Data(n)),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Ok(ReadEvent::Idle),
            };
        }

        match timeout(poll, session.control.readable()).await {
            Ok(Ok(false)) => Ok(ReadEvent::Closed),
            Ok(Ok(true)) => {
                let inbound =
                    timeout(self.options.request_timeout, session.control.read_inbound())
                        .await??;
                Ok(match inbound {
                    Inbound::Data { len, .. } => ReadEvent::Data(len),
                    Inbound::Response(response) => ReadEvent::Response(response),
                    Inbound::Closed => ReadEvent::Closed,
                })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(ReadEvent::Idle),
        }
    }

    /// Send a keep-alive. Returns the CSeq whose response is still outstanding.
    async fn heartbeat(&self, session: &mut Negotiated<C::Stream>) -> Result<Option<u32>> {
        let headers = [("Session", session.session.as_str())];

        let pending = if self.options.flavor.separate_media() {
            let response = self
                .exchange(&mut session.control, "GET_PARAMETER", &session.url, &headers)
                .await?;
            require_status(&response, 200, RtspState::Playing)?;
            None
        } else {
            // Response arrives interleaved with media; checked by the read loop
            let cseq = session
                .control
                .write_request("GET_PARAMETER", &session.url, &headers)
                .await?;
            Some(cseq)
        };

        debug!("Heartbeat sent for session {}", session.session);
        Ok(pending)
    }

    async fn teardown(&self, session: &mut Negotiated<C::Stream>) -> Result<()> {
        let headers = [("Session", session.session.as_str())];

        match session.media.take() {
            None => {
                session
                    .control
                    .write_request("TEARDOWN", &session.url, &headers)
                    .await?;
                if timeout(self.options.drain_timeout, drain_to_eof(&mut session.control))
                    .await
                    .is_err()
                {
                    debug!("Teardown drain timed out");
                }
            }
            Some(mut media) => {
                let response = self
                    .exchange(&mut session.control, "TEARDOWN", &session.url, &headers)
                    .await?;
                debug!("TEARDOWN -> {}", response.status);
                let _ = media.shutdown().await;
            }
        }

        session.control.shutdown().await;
        Ok(())
    }

    /// Best-effort TEARDOWN after a failure; errors here are only logged
    async fn abort(&self, session: &mut Negotiated<C::Stream>) {
        let headers = [("Session", session.session.as_str())];

        let sent = timeout(
            self.options.request_timeout,
            session
                .control
                .write_request("TEARDOWN", &session.url, &headers),
        )
        .await;
        match sent {
            Ok(Ok(_)) => debug!("TEARDOWN sent for session {}", session.session),
            Ok(Err(e)) => debug!("TEARDOWN not sent: {}", e),
            Err(_) => debug!("TEARDOWN not sent: timed out"),
        }

        if let Some(mut media) = session.media.take() {
            let _ = media.shutdown().await;
        }
        session.control.shutdown().await;
    }
}

/// Outcome of one poll of the read loop
enum ReadEvent {
    Data(usize),
    Response(RtspResponse),
    Closed,
    Idle,
}

/// Match a control response against the outstanding keep-alive
fn check_keepalive(response: &RtspResponse, pending: &mut Option<u32>) -> Result<()> {
    let cseq = response.header("CSeq").and_then(|v| v.parse::<u32>().ok());

    if cseq.is_some() && cseq == *pending {
        *pending = None;
        return require_status(response, 200, RtspState::Playing);
    }

    debug!("Ignoring unsolicited RTSP response {}", response.status);
    Ok(())
}

fn require_status(response: &RtspResponse, expected: u16, state: RtspState) -> Result<()> {
    if response.status == expected {
        return Ok(());
    }
    Err(SimError::ProtocolState {
        state,
        detail: format!("status {} {}", response.status, response.reason),
    })
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
        && a.port().unwrap_or(DEFAULT_RTSP_PORT) == b.port().unwrap_or(DEFAULT_RTSP_PORT)
}

/// SETUP URL for CICP servers: SDP connection host plus the first path segment
fn cicp_setup_url(describe_url: &Url, sdp: &str) -> Result<Url> {
    let host = sdp_connection_host(sdp).ok_or_else(|| SimError::ProtocolState {
        state: RtspState::Describing,
        detail: "no connection address in SDP".to_string(),
    })?;
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host
    };
    let segment = describe_url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or_default();

    let raw = format!("rtsp://{host}:{DEFAULT_RTSP_PORT}/{segment}");
    Url::parse(&raw).map_err(|e| SimError::MalformedReference(format!("{raw}: {e}")))
}

async fn register<S>(media: &mut S, session: u32) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = [0u8; 12];
    frame[0..4].copy_from_slice(&CICP_REGISTER.to_be_bytes());
    frame[4..8].copy_from_slice(&4u32.to_be_bytes());
    frame[8..12].copy_from_slice(&session.to_be_bytes());

    media.write_all(&frame).await?;
    media.flush().await?;

    let mut ack = [0u8; 4];
    media.read_exact(&mut ack).await?;
    Ok(())
}

async fn drain_to_eof<S>(control: &mut RtspConnection<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = [0u8; 10 * 1024];
    while let Ok(n) = control.read_raw(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}
