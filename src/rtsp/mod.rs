//! RTSP control session simulation.
//!
//! `DESCRIBING → SETTING_UP → (REDIRECTING) → PLAYING → TEARING_DOWN → DONE`

pub mod connector;
pub mod headers;
pub mod message;
pub mod player;

use crate::config::RtspFlavor;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

pub use connector::{RtspConnector, TcpConnector};
pub use message::{Inbound, RtspConnection, RtspResponse};
pub use player::{RtspOptions, RtspPlayer, SessionEnd};

/// Default RTSP control port
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Side-channel port used by the CICP flavor
pub const CICP_MEDIA_PORT: u16 = 32127;

/// Position in the control-session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspState {
    Describing,
    SettingUp,
    Redirecting,
    Playing,
    TearingDown,
    Done,
}

impl fmt::Display for RtspState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RtspState::Describing => "DESCRIBING",
            RtspState::SettingUp => "SETTING_UP",
            RtspState::Redirecting => "REDIRECTING",
            RtspState::Playing => "PLAYING",
            RtspState::TearingDown => "TEARING_DOWN",
            RtspState::Done => "DONE",
        })
    }
}

impl RtspFlavor {
    /// Keep-alive period; always below the servers' session expiry
    pub fn heartbeat_interval(&self) -> Duration {
        match self {
            RtspFlavor::Interleaved => Duration::from_secs(14),
            RtspFlavor::DataChannel | RtspFlavor::Cicp => Duration::from_secs(5),
        }
    }

    /// `Transport` header sent with SETUP
    pub fn transport(&self, source: IpAddr) -> String {
        match self {
            RtspFlavor::Interleaved => "RTP/AVP/TCP;unicast;interleaved=0-1".to_string(),
            RtspFlavor::DataChannel => "CIP/CIP/TCP;unicast".to_string(),
            RtspFlavor::Cicp => format!("CIP/TCP;unicast;destination={source}"),
        }
    }

    /// Whether media arrives on its own connection rather than the control one
    pub fn separate_media(&self) -> bool {
        !matches!(self, RtspFlavor::Interleaved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_stays_below_expiry() {
        for flavor in [RtspFlavor::Interleaved, RtspFlavor::DataChannel, RtspFlavor::Cicp] {
            let interval = flavor.heartbeat_interval();
            assert!(interval >= Duration::from_secs(5) && interval <= Duration::from_secs(14));
        }
    }

    #[test]
    fn cicp_transport_names_destination() {
        let t = RtspFlavor::Cicp.transport("10.0.0.9".parse().unwrap());
        assert_eq!(t, "CIP/TCP;unicast;destination=10.0.0.9");
    }

    #[test]
    fn state_display_matches_wire_names() {
        assert_eq!(RtspState::Redirecting.to_string(), "REDIRECTING");
        assert_eq!(RtspState::TearingDown.to_string(), "TEARING_DOWN");
    }
}
