//! One simulated client: resolve the endpoint, then play it.

use crate::config::{Protocol, RunConfig, SessionConfig};
use crate::error::Result;
use crate::hls::{HlsPlayer, PlaybackSummary};
use crate::http_client::{ClientConfig, build_session_client};
use crate::pacing::{Clock, PlayBudget};
use crate::resolve::ResolutionChain;
use crate::rtsp::{RtspOptions, RtspPlayer, SessionEnd, TcpConnector};
use std::fmt;
use tracing::debug;

/// What a session did before it ended normally
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Hls(PlaybackSummary),
    Rtsp(SessionEnd),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Hls(summary) => write!(
                f,
                "{} segments ({} ancillary), {} manifests, {} bytes",
                summary.segments, summary.ancillary_segments, summary.manifest_fetches, summary.bytes
            ),
            SessionOutcome::Rtsp(SessionEnd::TornDown) => write!(f, "torn down"),
            SessionOutcome::Rtsp(SessionEnd::StreamEnded) => write!(f, "stream ended"),
        }
    }
}

/// Run one session to completion.
///
/// Every failure aborts this session only; nothing is retried.
pub async fn run_session(
    run: &RunConfig,
    session: &SessionConfig,
    clock: &dyn Clock,
) -> Result<SessionOutcome> {
    let client = build_session_client(&ClientConfig {
        source_addr: Some(session.source_addr),
        connect_timeout: run.connect_timeout,
        request_timeout: run.request_timeout,
        keep_alive: run.keep_alive,
    })?;

    let endpoint = ResolutionChain::new(&client, run).resolve(session).await?;
    debug!("Resolved {} to {}", session.content, endpoint.url);

    match session.protocol {
        Protocol::Hls => {
            let mut budget = PlayBudget::new(session.play_duration);
            let summary = HlsPlayer::new(&client, &run.content_identity, clock)
                .play(&endpoint, &mut budget)
                .await?;
            Ok(SessionOutcome::Hls(summary))
        }
        Protocol::Rtsp => {
            let connector = TcpConnector::new(
                session.source_addr,
                session.interface.clone(),
                run.connect_timeout,
            );
            let options = rtsp_options(run, session);
            let end = RtspPlayer::new(&connector, &options, &client)
                .run(&endpoint.url)
                .await?;
            Ok(SessionOutcome::Rtsp(end))
        }
    }
}

fn rtsp_options(run: &RunConfig, session: &SessionConfig) -> RtspOptions {
    RtspOptions {
        pre_play_delay: run.pre_play_delay,
        request_timeout: run.request_timeout,
        ..RtspOptions::new(
            run.rtsp_flavor,
            session.play_duration,
            session.source_addr,
            run.content_identity.clone(),
        )
    }
}
