use std::sync::Arc;

use crate::foundation::core::{Affine, MediaKind, Size};
use crate::foundation::error::ExportResult;
use crate::foundation::time::MediaTime;
use crate::media::pipeline::MediaSource;

/// Static description of one track of an [`Asset`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssetTrack {
    /// Track identifier, unique within the asset.
    pub track_id: u32,
    pub kind: MediaKind,
    /// Coded frame size before the preferred transform is applied. Zero for audio.
    pub natural_size: Size,
    /// Orientation transform mapping coded frames to display space.
    pub preferred_transform: Affine,
    /// Nominal frame rate; zero when unknown or not applicable.
    pub nominal_frame_rate: f32,
}

impl AssetTrack {
    pub fn video(track_id: u32, natural_size: Size, nominal_frame_rate: f32) -> Self {
        Self {
            track_id,
            kind: MediaKind::Video,
            natural_size,
            preferred_transform: Affine::IDENTITY,
            nominal_frame_rate,
        }
    }

    pub fn audio(track_id: u32) -> Self {
        Self {
            track_id,
            kind: MediaKind::Audio,
            natural_size: Size::ZERO,
            preferred_transform: Affine::IDENTITY,
            nominal_frame_rate: 0.0,
        }
    }

    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.preferred_transform = transform;
        self
    }
}

/// Immutable handle to a decodable media source.
///
/// Owned by the caller; export sessions only read from it. Opening a source is the equivalent of
/// constructing an asset reader and may fail (unreadable or invalid asset).
pub trait Asset: Send + Sync + std::fmt::Debug {
    /// Total duration of the asset.
    fn duration(&self) -> MediaTime;

    /// All tracks in the asset.
    fn tracks(&self) -> &[AssetTrack];

    /// Construct a new demux+decode pipeline over this asset.
    fn open_source(&self) -> ExportResult<Arc<dyn MediaSource>>;

    /// Tracks of one media kind, in asset order.
    fn tracks_with_kind(&self, kind: MediaKind) -> Vec<AssetTrack> {
        self.tracks()
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect()
    }
}
