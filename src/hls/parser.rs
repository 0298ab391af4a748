use crate::error::{Result, SimError};
use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use tracing::debug;

/// A decoded HLS manifest
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Master(MasterManifest),
    Media(MediaManifest),
}

/// Alternate renditions listed by a master manifest
#[derive(Debug, Clone, PartialEq)]
pub struct MasterManifest {
    pub renditions: Vec<Rendition>,
}

/// One selectable variant stream with the alternate tracks it references
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub uri: String,
    pub bandwidth: u64,
    /// First audio alternative with a URI in the variant's audio group
    pub audio_uri: Option<String>,
    /// First subtitle alternative with a URI in the variant's subtitle group
    pub subtitle_uri: Option<String>,
}

/// Ordered segment list plus the closed (VOD) / open (live) flag
#[derive(Debug, Clone, PartialEq)]
pub struct MediaManifest {
    pub segments: Vec<SegmentRef>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    pub uri: String,
    /// Nominal playback duration in seconds
    pub duration: f64,
}

/// Parse HLS manifest text into a [`Manifest`]
pub fn parse_manifest(content: &str) -> Result<Manifest> {
    match parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => {
            debug!("Parsed master manifest ({} variants)", master.variants.len());
            Ok(Manifest::Master(master_manifest(master)))
        }
        Ok(Playlist::MediaPlaylist(media)) => {
            debug!("Parsed media manifest ({} segments)", media.segments.len());
            Ok(Manifest::Media(media_manifest(media)))
        }
        Err(e) => Err(SimError::InvalidPlaylistType(format!(
            "not a master or media manifest: {:?}",
            e
        ))),
    }
}

/// Parse text that must be a media manifest
pub fn parse_media_manifest(content: &str) -> Result<MediaManifest> {
    match parse_manifest(content)? {
        Manifest::Media(media) => Ok(media),
        Manifest::Master(_) => Err(SimError::InvalidPlaylistType(
            "expected a media manifest, got a master manifest".to_string(),
        )),
    }
}

fn master_manifest(master: MasterPlaylist) -> MasterManifest {
    let alternative_uri = |kind: AlternativeMediaType, group: Option<&String>| {
        let group = group?;
        master
            .alternatives
            .iter()
            .filter(|alt| alt.media_type == kind && &alt.group_id == group)
            .find_map(|alt| alt.uri.clone())
    };

    let renditions = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| Rendition {
            uri: v.uri.clone(),
            bandwidth: v.bandwidth,
            audio_uri: alternative_uri(AlternativeMediaType::Audio, v.audio.as_ref()),
            subtitle_uri: alternative_uri(AlternativeMediaType::Subtitles, v.subtitles.as_ref()),
        })
        .collect();

    MasterManifest { renditions }
}

fn media_manifest(media: MediaPlaylist) -> MediaManifest {
    MediaManifest {
        segments: media
            .segments
            .into_iter()
            .map(|s| SegmentRef {
                uri: s.uri,
                duration: f64::from(s.duration),
            })
            .collect(),
        closed: media.end_list,
    }
}
