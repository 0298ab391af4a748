use crate::error::{Result, SimError};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default bitrate class requested when a session record carries none
pub const DEFAULT_BITRATE_CLASS: &str = "H";

/// Streaming protocol driven by a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP adaptive streaming (HLS manifests and segments)
    Hls,
    /// RTSP control session with a drained media stream
    Rtsp,
}

impl Protocol {
    /// Value sent as `protocolType` in the redirect lookup request
    pub fn lookup_tag(&self) -> &'static str {
        match self {
            Protocol::Hls => "http",
            Protocol::Rtsp => "rtsp",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hls" | "http" => Ok(Protocol::Hls),
            "rtsp" => Ok(Protocol::Rtsp),
            other => Err(format!("unknown protocol '{other}', expected hls or rtsp")),
        }
    }
}

/// Streaming type tag forwarded to the lookup service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingType {
    Static,
    Adaptive,
}

impl StreamingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingType::Static => "static",
            StreamingType::Adaptive => "adaptive",
        }
    }
}

impl FromStr for StreamingType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(StreamingType::Static),
            "adaptive" => Ok(StreamingType::Adaptive),
            other => Err(format!(
                "unknown streaming type '{other}', expected static or adaptive"
            )),
        }
    }
}

/// Server-specific RTSP session layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RtspFlavor {
    /// Media interleaved on the control connection
    #[default]
    Interleaved,
    /// Media on a separate TCP connection announced in the SETUP `Transport` header
    DataChannel,
    /// Setup host taken from the SDP connection line, media on a registered side channel
    Cicp,
}

impl FromStr for RtspFlavor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interleaved" => Ok(RtspFlavor::Interleaved),
            "data-channel" | "datachannel" | "sdk" => Ok(RtspFlavor::DataChannel),
            "cicp" => Ok(RtspFlavor::Cicp),
            other => Err(format!(
                "unknown RTSP flavor '{other}', expected interleaved, data-channel or cicp"
            )),
        }
    }
}

/// A named header carrying the simulated client's identity token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub header: String,
    pub value: String,
}

impl ClientIdentity {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }
}

/// One line of the session list file
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    /// Content path, optionally with leading directories (`movies/a.mp4`)
    pub content: String,
    /// Local address the session's sockets bind to
    pub source_addr: IpAddr,
    pub service_code: String,
    pub content_type: String,
    pub bitrate_class: Option<String>,
    /// Network interface name for RTSP sockets
    pub interface: Option<String>,
}

impl SessionRecord {
    /// Parse a single whitespace-separated record.
    ///
    /// Layout: `content source_addr [service_code content_type bitrate_class [interface]]`
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [content, source, rest @ ..] = fields.as_slice() else {
            return Err(SimError::Config(format!(
                "expected at least content and source address: '{line}'"
            )));
        };

        let source_addr = source
            .parse()
            .map_err(|_| SimError::Config(format!("invalid source address '{source}'")))?;

        let field = |idx: usize| rest.get(idx).map(|s| s.to_string());

        Ok(SessionRecord {
            content: content.to_string(),
            source_addr,
            service_code: field(0).unwrap_or_default(),
            content_type: field(1).unwrap_or_default(),
            bitrate_class: field(2),
            interface: field(3),
        })
    }
}

/// Parse session records, skipping blanks, comments and malformed lines
pub fn parse_session_records(text: &str) -> Result<Vec<SessionRecord>> {
    let records: Vec<SessionRecord> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match SessionRecord::parse(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping session record: {}", e);
                None
            }
        })
        .collect();

    if records.is_empty() {
        return Err(SimError::Config("session list is empty".to_string()));
    }

    Ok(records)
}

/// Read and parse a session list file
pub fn load_session_records(path: &Path) -> Result<Vec<SessionRecord>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SimError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_session_records(&text)
}

/// Run-level settings shared (read-only) by every session
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Redirect / lookup server address (`host:port`)
    pub server_addr: String,
    pub protocol: Protocol,
    pub rtsp_flavor: RtspFlavor,
    /// Number of sessions to launch; defaults to the record count
    pub session_count: Option<usize>,
    /// Pause between two session launches
    pub launch_interval: Duration,
    /// Simulated playback time per session
    pub play_duration: Duration,
    /// Wait between RTSP SETUP and PLAY
    pub pre_play_delay: Duration,
    pub lookup_enabled: bool,
    pub follow_redirect: bool,
    pub streaming_type: StreamingType,
    pub keep_alive: bool,
    /// Identity sent on the resolution-chain requests
    pub resolve_identity: ClientIdentity,
    /// Identity sent on manifest, segment and RTSP requests
    pub content_identity: ClientIdentity,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:18085".to_string(),
            protocol: Protocol::Hls,
            rtsp_flavor: RtspFlavor::Interleaved,
            session_count: None,
            launch_interval: Duration::from_millis(1000),
            play_duration: Duration::from_secs(900),
            pre_play_delay: Duration::ZERO,
            lookup_enabled: true,
            follow_redirect: true,
            streaming_type: StreamingType::Static,
            keep_alive: true,
            resolve_identity: ClientIdentity::new("X-Client-User-Agent", "playgen"),
            content_identity: ClientIdentity::new("User-Agent", "playgen"),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RunConfig {
    /// Effective number of sessions for a list of `available` records
    pub fn effective_session_count(&self, available: usize) -> usize {
        match self.session_count {
            Some(n) if n > 0 => n,
            _ => available,
        }
    }

    /// Build the immutable per-session configuration for one record
    pub fn session_config(&self, ordinal: usize, record: &SessionRecord) -> SessionConfig {
        SessionConfig {
            ordinal,
            content: record.content.clone(),
            source_addr: record.source_addr,
            interface: record.interface.clone(),
            service_code: record.service_code.clone(),
            content_type: record.content_type.clone(),
            bitrate_class: record
                .bitrate_class
                .clone()
                .unwrap_or_else(|| DEFAULT_BITRATE_CLASS.to_string()),
            play_duration: self.play_duration,
            protocol: self.protocol,
            lookup_enabled: self.lookup_enabled,
        }
    }
}

/// Everything one session needs to know about itself
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub ordinal: usize,
    pub content: String,
    pub source_addr: IpAddr,
    pub interface: Option<String>,
    pub service_code: String,
    pub content_type: String,
    pub bitrate_class: String,
    pub play_duration: Duration,
    pub protocol: Protocol,
    pub lookup_enabled: bool,
}

impl SessionConfig {
    /// Split the content path into `(directory, file)` at the last `/`
    pub fn content_parts(&self) -> (&str, &str) {
        match self.content.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", self.content.as_str()),
        }
    }
}
