//! RTSP/1.0 request writer and response reader over any byte stream.

use crate::error::{Result, SimError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;
use url::Url;

/// Upper bound on a response body we are willing to buffer
const MAX_BODY_LEN: usize = 1024 * 1024;

/// A parsed RTSP response
#[derive(Debug, Clone, PartialEq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One item read from a control connection carrying interleaved media
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `$`-framed binary packet, payload discarded
    Data { channel: u8, len: usize },
    /// RTSP response, e.g. to a keep-alive
    Response(RtspResponse),
    Closed,
}

/// One RTSP control connection with its CSeq counter
pub struct RtspConnection<S> {
    stream: BufReader<S>,
    cseq: u32,
    user_agent: String,
}

impl<S> RtspConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, user_agent: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            cseq: 0,
            user_agent: user_agent.into(),
        }
    }

    /// Send a request and read its response
    pub async fn request(
        &mut self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        self.write_request(method, url, headers).await?;
        let response = self.read_response().await?;
        debug!("{} {} -> {} {}", method, url, response.status, response.reason);
        Ok(response)
    }

    /// Send a request without waiting for the response. Returns its CSeq.
    pub async fn write_request(
        &mut self,
        method: &str,
        url: &Url,
        headers: &[(&str, &str)],
    ) -> Result<u32> {
        self.cseq += 1;

        let mut request = format!(
            "{method} {url} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: {}\r\n",
            self.cseq, self.user_agent
        );
        for (name, value) in headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        self.stream.write_all(request.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(self.cseq)
    }

    /// Read one response: status line, headers, `Content-Length` body
    pub async fn read_response(&mut self) -> Result<RtspResponse> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(SimError::Transport(
                "connection closed before RTSP response".to_string(),
            ));
        }
        let (status, reason) = parse_status_line(line.trim_end())?;

        let mut headers = Vec::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(SimError::Transport(
                    "connection closed inside RTSP headers".to_string(),
                ));
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);
        if length > MAX_BODY_LEN {
            return Err(SimError::Transport(format!(
                "RTSP body of {length} bytes exceeds limit"
            )));
        }

        let mut body = vec![0u8; length];
        self.stream.read_exact(&mut body).await?;

        Ok(RtspResponse {
            status,
            reason,
            headers,
            body,
        })
    }

    /// Wait until bytes are buffered. Returns `false` at end of stream.
    ///
    /// Nothing is consumed, so this is safe to race against a timer.
    pub async fn readable(&mut self) -> std::io::Result<bool> {
        Ok(!self.stream.fill_buf().await?.is_empty())
    }

    /// Read the next interleaved frame or RTSP response
    pub async fn read_inbound(&mut self) -> Result<Inbound> {
        let first = self.stream.fill_buf().await?.first().copied();

        match first {
            None => Ok(Inbound::Closed),
            Some(b'$') => {
                let mut header = [0u8; 4];
                self.stream.read_exact(&mut header).await?;
                let len = usize::from(u16::from_be_bytes([header[2], header[3]]));

                let mut payload = (&mut self.stream).take(len as u64);
                let copied = tokio::io::copy(&mut payload, &mut tokio::io::sink()).await?;
                if copied < len as u64 {
                    return Err(SimError::Transport(format!(
                        "interleaved frame truncated at {copied} of {len} bytes"
                    )));
                }

                Ok(Inbound::Data {
                    channel: header[1],
                    len,
                })
            }
            Some(_) => Ok(Inbound::Response(self.read_response().await?)),
        }
    }

    /// Raw read from the connection, buffered bytes first
    pub async fn read_raw(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let malformed = || SimError::Transport(format!("malformed RTSP status line '{line}'"));

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    if !version.starts_with("RTSP/") {
        return Err(malformed());
    }
    let status = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(malformed)?;
    let reason = parts.next().unwrap_or_default().to_string();

    Ok((status, reason))
}
