//! Output encode settings and session-level export options.
//!
//! All types are serde-friendly so callers can keep presets as JSON.

/// Output container type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// MPEG-4 (`.mp4`).
    #[default]
    Mp4,
    /// QuickTime movie (`.mov`).
    QuickTime,
    /// iTunes video (`.m4v`).
    M4v,
    /// Audio-only MPEG-4 (`.m4a`).
    M4a,
}

impl FileType {
    /// Conventional file extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::QuickTime => "mov",
            Self::M4v => "m4v",
            Self::M4a => "m4a",
        }
    }

    /// Return `true` when the container can carry a video track.
    pub fn supports_video(self) -> bool {
        !matches!(self, Self::M4a)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    #[default]
    Aac,
}

/// Encode settings for the output video track.
///
/// `width`/`height` are the target frame size. When both are present and no composition is
/// supplied, the session synthesizes an aspect-fit composition for them.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Average bit rate in bits per second.
    pub average_bit_rate: Option<u32>,
    /// Encoder profile/level, e.g. `"high@4.0"`.
    pub profile_level: Option<String>,
    /// Target frame rate. Zero is treated as absent.
    pub frame_rate: Option<f32>,
}

impl VideoSettings {
    /// H.264 settings targeting `width x height`.
    pub fn h264(width: u32, height: u32) -> Self {
        Self {
            codec: VideoCodec::H264,
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    /// Target dimensions, when both are configured.
    pub fn target_dims(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    /// Configured frame rate when present and nonzero.
    pub fn effective_frame_rate(&self) -> Option<f32> {
        self.frame_rate.filter(|r| r.is_finite() && *r > 0.0)
    }
}

/// Encode settings for the output audio track.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub codec: AudioCodec,
    pub channels: u16,
    pub sample_rate: u32,
    /// Encoder bit rate in bits per second.
    pub bit_rate: Option<u32>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Aac,
            channels: 2,
            sample_rate: 44_100,
            bit_rate: None,
        }
    }
}

/// One metadata item embedded into the output container.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Per-track volume used when the source mixes its audio tracks down.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioMix {
    pub params: Vec<AudioMixParams>,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioMixParams {
    pub track_id: u32,
    /// Linear gain, `1.0` leaves the track unchanged.
    pub volume: f32,
}

impl AudioMix {
    /// Volume for `track_id`, defaulting to unity gain.
    pub fn volume_for(&self, track_id: u32) -> f32 {
        self.params
            .iter()
            .find(|p| p.track_id == track_id)
            .map(|p| p.volume)
            .unwrap_or(1.0)
    }
}

/// Video settings used by the compression preset.
pub fn compress_video_settings(width: u32, height: u32) -> VideoSettings {
    VideoSettings {
        average_bit_rate: Some(2_400_000),
        profile_level: Some("high@4.0".to_string()),
        ..VideoSettings::h264(width, height)
    }
}

/// Audio settings used by the compression preset.
pub fn compress_audio_settings() -> AudioSettings {
    AudioSettings {
        codec: AudioCodec::Aac,
        channels: 2,
        sample_rate: 44_100,
        bit_rate: Some(128_000),
    }
}
