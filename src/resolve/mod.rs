//! Address resolution chain: lookup → redirect follow → endpoint setup.
//!
//! Each step is a single request with no retry; the first failure aborts the
//! session.

pub mod lookup;

use crate::config::{ClientIdentity, Protocol, RunConfig, SessionConfig};
use crate::error::{Result, SimError};
use crate::http_client::get_expecting;
use lookup::{LookupRequest, demand_one_time_url};
use reqwest::{Client, StatusCode, header};
use std::time::Instant;
use tracing::info;
use url::Url;

/// Where a session plays from, as produced by the resolution chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoint {
    /// Playback base URL (HLS) or control URL (RTSP)
    pub url: Url,
    /// Intermediate URLs visited on the way, in order
    pub redirects: Vec<Url>,
    /// Initial manifest body returned by endpoint setup (HLS only)
    pub payload: Option<String>,
}

/// Runs the resolution steps for one session over that session's client.
pub struct ResolutionChain<'a> {
    client: &'a Client,
    run: &'a RunConfig,
}

impl<'a> ResolutionChain<'a> {
    pub fn new(client: &'a Client, run: &'a RunConfig) -> Self {
        Self { client, run }
    }

    fn identity(&self) -> &ClientIdentity {
        &self.run.resolve_identity
    }

    /// Resolve `session` into a playable endpoint.
    pub async fn resolve(&self, session: &SessionConfig) -> Result<ResolvedEndpoint> {
        let entry = self.entry_url(session).await?;

        if session.protocol == Protocol::Rtsp {
            return Ok(ResolvedEndpoint {
                url: entry,
                redirects: Vec::new(),
                payload: None,
            });
        }

        let mut redirects = Vec::new();
        let setup_url = if self.run.follow_redirect {
            let start = Instant::now();
            let next = self.follow_redirect(&entry).await?;
            info!("redirect response time: {} ms", start.elapsed().as_millis());
            redirects.push(entry);
            next
        } else {
            entry
        };

        let start = Instant::now();
        let (url, payload) = self.setup_endpoint(&setup_url).await?;
        info!("endpoint response time: {} ms", start.elapsed().as_millis());

        if url != setup_url {
            redirects.push(setup_url);
        }

        Ok(ResolvedEndpoint {
            url,
            redirects,
            payload: Some(payload),
        })
    }

    /// First URL of the chain: lookup result, or the static URL when lookup is off.
    pub async fn entry_url(&self, session: &SessionConfig) -> Result<Url> {
        let raw = if session.lookup_enabled {
            let request = LookupRequest::for_session(session, self.run.streaming_type);
            let start = Instant::now();
            let url = demand_one_time_url(self.client, &self.run.server_addr, &request).await?;
            info!("lookup response time: {} ms", start.elapsed().as_millis());
            url
        } else {
            static_url(&self.run.server_addr, session)
        };

        Url::parse(&raw).map_err(|e| SimError::MalformedReference(format!("{raw}: {e}")))
    }

    /// Request `url` and expect exactly a 301; returns the resolved `Location`.
    pub async fn follow_redirect(&self, url: &Url) -> Result<Url> {
        let response =
            get_expecting(self.client, url, self.identity(), StatusCode::MOVED_PERMANENTLY)
                .await?;

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                SimError::MalformedReference(format!("301 without Location from {url}"))
            })?;

        url.join(location)
            .map_err(|e| SimError::MalformedReference(format!("{location}: {e}")))
    }

    /// Request `url`, expect 200, and return the final URL with the body.
    pub async fn setup_endpoint(&self, url: &Url) -> Result<(Url, String)> {
        let response = get_expecting(self.client, url, self.identity(), StatusCode::OK).await?;
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok((final_url, body))
    }
}

/// URL used when redirect lookup is disabled
pub fn static_url(server_addr: &str, session: &SessionConfig) -> String {
    match session.protocol {
        Protocol::Hls => format!(
            "http://{}/{}/{}?AdaptiveType=HLS",
            server_addr, session.service_code, session.content
        ),
        Protocol::Rtsp => format!("rtsp://{}/{}", server_addr, session.content),
    }
}
