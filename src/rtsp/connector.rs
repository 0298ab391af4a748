use crate::error::{Result, SimError};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

/// Opens the byte streams an RTSP session talks over.
///
/// Production code connects TCP sockets bound to the session's source
/// address; tests hand out in-memory streams.
#[async_trait]
pub trait RtspConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream>;
}

/// Connects TCP sockets bound to a fixed source address (and optionally a device)
#[derive(Debug, Clone)]
pub struct TcpConnector {
    source_addr: IpAddr,
    interface: Option<String>,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(source_addr: IpAddr, interface: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            source_addr,
            interface,
            connect_timeout,
        }
    }

    async fn target(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let mut candidates = lookup_host((host, port)).await?;

        candidates
            .find(|addr| addr.is_ipv4() == self.source_addr.is_ipv4())
            .ok_or_else(|| {
                SimError::Transport(format!(
                    "no address for {host}:{port} matching source {}",
                    self.source_addr
                ))
            })
    }

    fn socket(&self) -> Result<TcpSocket> {
        let socket = match self.source_addr {
            IpAddr::V4(_) => TcpSocket::new_v4()?,
            IpAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_keepalive(true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let Some(name) = &self.interface {
            socket.bind_device(Some(name.as_bytes()))?;
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        if let Some(name) = &self.interface {
            tracing::warn!("Binding to interface {} is not supported here, ignoring", name);
        }

        socket.bind(SocketAddr::new(self.source_addr, 0))?;
        Ok(socket)
    }
}

#[async_trait]
impl RtspConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let target = self.target(host, port).await?;
        let socket = self.socket()?;

        debug!("Connecting {} -> {}", self.source_addr, target);
        let stream = timeout(self.connect_timeout, socket.connect(target)).await??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
