pub mod parser;
pub mod player;

pub use parser::{Manifest, MasterManifest, MediaManifest, Rendition, SegmentRef, parse_manifest};
pub use player::{HlsPlayer, PlaybackSummary};
