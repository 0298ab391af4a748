//! playgen: concurrent HLS and RTSP playback sessions for load-testing
//! video delivery servers.

pub mod absolutize;
pub mod config;
pub mod error;
pub mod hls;
pub mod http_client;
pub mod orchestrator;
pub mod pacing;
pub mod resolve;
pub mod rtsp;
pub mod session;
