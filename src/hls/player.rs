//! HLS playback walk: rendition selection, paced segment fetches, live polling.
//!
//! Budget accounting differs between the two walks and is kept that way:
//! a closed (VOD) walk charges the wall-clock time of each iteration, a live
//! walk charges each segment's nominal duration.

use super::parser::{Manifest, MediaManifest, Rendition, SegmentRef, parse_manifest, parse_media_manifest};
use crate::absolutize::absolutize;
use crate::config::ClientIdentity;
use crate::error::{Result, SimError};
use crate::http_client::{download, get_expecting};
use crate::pacing::{Clock, PlayBudget, pace, seconds};
use crate::resolve::ResolvedEndpoint;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// What one playback walk fetched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSummary {
    /// Primary segments fetched
    pub segments: usize,
    /// Subtitle and audio segments fetched alongside
    pub ancillary_segments: usize,
    /// Manifest fetches after endpoint setup
    pub manifest_fetches: usize,
    pub bytes: u64,
}

/// Media manifest of an alternate track together with its own URL
struct AlternateTrack {
    url: Url,
    manifest: MediaManifest,
}

/// Simulated HLS client for one session
pub struct HlsPlayer<'a> {
    client: &'a Client,
    identity: &'a ClientIdentity,
    clock: &'a dyn Clock,
}

impl<'a> HlsPlayer<'a> {
    pub fn new(client: &'a Client, identity: &'a ClientIdentity, clock: &'a dyn Clock) -> Self {
        Self {
            client,
            identity,
            clock,
        }
    }

    /// Play the resolved endpoint until the manifest or the budget runs out.
    pub async fn play(
        &self,
        endpoint: &ResolvedEndpoint,
        budget: &mut PlayBudget,
    ) -> Result<PlaybackSummary> {
        let payload = endpoint.payload.as_deref().ok_or_else(|| {
            SimError::InvalidPlaylist("endpoint setup returned no manifest".to_string())
        })?;

        let mut summary = PlaybackSummary::default();

        match parse_manifest(payload)? {
            Manifest::Master(master) => {
                let rendition = master.renditions.into_iter().next().ok_or_else(|| {
                    SimError::InvalidPlaylist("master manifest lists no renditions".to_string())
                })?;
                info!("Adaptive session, rendition {}", rendition.uri);

                let media_url = absolutize(&rendition.uri, &endpoint.url)?;
                let media = self.fetch_media(&media_url, &mut summary).await?;

                if media.closed {
                    let tracks = self
                        .fetch_alternates(&rendition, &endpoint.url, &mut summary)
                        .await?;
                    self.walk_closed(&media, &media_url, &tracks, budget, &mut summary)
                        .await?;
                } else {
                    self.walk_live(media, &media_url, budget, &mut summary)
                        .await?;
                }
            }
            Manifest::Media(media) => {
                info!(
                    "Static {} session",
                    if media.closed { "VOD" } else { "channel" }
                );
                if media.closed {
                    self.walk_closed(&media, &endpoint.url, &[], budget, &mut summary)
                        .await?;
                } else {
                    self.walk_live(media, &endpoint.url, budget, &mut summary)
                        .await?;
                }
            }
        }

        Ok(summary)
    }

    /// Walk a finite segment list in order.
    ///
    /// Stops at the end of the list or once the budget is spent; the budget is
    /// charged with the elapsed wall-clock time of each iteration.
    async fn walk_closed(
        &self,
        media: &MediaManifest,
        media_url: &Url,
        tracks: &[AlternateTrack],
        budget: &mut PlayBudget,
        summary: &mut PlaybackSummary,
    ) -> Result<()> {
        for (idx, segment) in media.segments.iter().enumerate() {
            let started = self.clock.now();

            for track in tracks {
                if let Some(ancillary) = track.manifest.segments.get(idx) {
                    summary.bytes += self
                        .fetch_segment(&ancillary.uri, &track.url, Duration::ZERO)
                        .await?;
                    summary.ancillary_segments += 1;
                }
            }

            summary.bytes += self
                .fetch_segment(&segment.uri, media_url, seconds(segment.duration))
                .await?;
            summary.segments += 1;

            budget.consume(self.clock.now().saturating_sub(started));
            if budget.is_exhausted() {
                debug!("Play budget spent after {} segments", summary.segments);
                break;
            }
        }

        Ok(())
    }

    /// Poll an open manifest, fetching its first segment each round.
    ///
    /// The budget is charged with each segment's nominal duration. A
    /// zero-length segment is charged its wall-clock time instead so the
    /// loop always progresses.
    async fn walk_live(
        &self,
        initial: MediaManifest,
        media_url: &Url,
        budget: &mut PlayBudget,
        summary: &mut PlaybackSummary,
    ) -> Result<()> {
        let mut snapshot = Some(initial);

        while !budget.is_exhausted() {
            let current = match snapshot.take() {
                Some(manifest) => manifest,
                None => self.fetch_media(media_url, summary).await?,
            };

            let SegmentRef { uri, duration } = current.segments.first().ok_or_else(|| {
                SimError::InvalidPlaylist(format!("no segment in live manifest {media_url}"))
            })?;

            let started = self.clock.now();
            let nominal = seconds(*duration);
            summary.bytes += self.fetch_segment(uri, media_url, nominal).await?;
            summary.segments += 1;

            if nominal.is_zero() {
                budget.consume(self.clock.now().saturating_sub(started));
            } else {
                budget.consume(nominal);
            }
        }

        Ok(())
    }

    /// Fetch the subtitle and audio manifests the rendition references
    async fn fetch_alternates(
        &self,
        rendition: &Rendition,
        master_url: &Url,
        summary: &mut PlaybackSummary,
    ) -> Result<Vec<AlternateTrack>> {
        let mut tracks = Vec::new();

        for uri in [&rendition.subtitle_uri, &rendition.audio_uri]
            .into_iter()
            .flatten()
        {
            let url = absolutize(uri, master_url)?;
            let manifest = self.fetch_media(&url, summary).await?;
            tracks.push(AlternateTrack { url, manifest });
        }

        Ok(tracks)
    }

    async fn fetch_media(&self, url: &Url, summary: &mut PlaybackSummary) -> Result<MediaManifest> {
        let response = get_expecting(self.client, url, self.identity, StatusCode::OK).await?;
        let body = response.text().await?;
        summary.manifest_fetches += 1;
        parse_media_manifest(&body)
    }

    /// Download one segment and pace to `target`
    async fn fetch_segment(&self, raw_uri: &str, base: &Url, target: Duration) -> Result<u64> {
        let url = absolutize(raw_uri, base)?;
        let started = self.clock.now();
        let bytes = download(self.client, &url, self.identity).await?;
        pace(self.clock, target, self.clock.now().saturating_sub(started)).await;
        Ok(bytes)
    }
}
