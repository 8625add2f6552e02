pub use kurbo::{Affine, Point, Rect, Size, Vec2};

/// Media type carried by an asset track, a track output or a track input.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Picture track.
    Video,
    /// Sound track.
    Audio,
}

impl MediaKind {
    /// Stable lowercase name, used in logs and sample logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round a floating-point size to whole pixels.
///
/// Negative or non-finite extents collapse to zero.
pub fn pixel_dims(size: Size) -> (u32, u32) {
    fn px(v: f64) -> u32 {
        if v.is_finite() && v > 0.0 {
            v.round().min(f64::from(u32::MAX)) as u32
        } else {
            0
        }
    }
    (px(size.width), px(size.height))
}
