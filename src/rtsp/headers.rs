//! Field extraction from RTSP headers and SDP bodies.

use super::RtspState;
use crate::error::{Result, SimError};

/// Session identifier from a `Session` header, without `;timeout=...`
pub fn session_id(header: &str) -> Result<String> {
    header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SimError::ProtocolState {
            state: RtspState::SettingUp,
            detail: format!("empty Session header '{header}'"),
        })
}

/// First `server_port` announced in a `Transport` header
pub fn server_port(transport: &str) -> Option<u16> {
    transport
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("server_port="))
        .and_then(|ports| ports.split('-').next())
        .and_then(|port| port.trim().parse().ok())
}

/// Address from the SDP connection line (`c=IN IP4 10.0.0.1/127`)
pub fn sdp_connection_host(sdp: &str) -> Option<String> {
    sdp.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("c="))
        .and_then(|conn| conn.split_whitespace().nth(2))
        .and_then(|addr| addr.split('/').next())
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
}
