//! mediaexport transcodes one media asset into one output file.
//!
//! An [`ExportSession`] drives a decode-side [`MediaSource`] and an encode-side [`MediaSink`]:
//!
//! - Configure the session with an [`ExportConfig`] (output location, time range, encoder
//!   settings, optional [`VideoComposition`], audio mix, metadata)
//! - Optionally install a [`FrameInterceptor`] to replace decoded video frames
//! - [`ExportSession::start`] and wait for the completion callback; poll
//!   [`ExportSession::progress`] meanwhile
//!
//! Sinks are built from [`SampleWriter`]s run on a dedicated writer thread by
//! [`ThreadedSink`]. The `media-ffmpeg` feature adds ffprobe/ffmpeg backed assets and writers.
#![forbid(unsafe_code)]

mod foundation;

/// Concrete assets.
pub mod assets;
/// Video compositions and default composition synthesis.
pub mod composition;
/// Sink side: frame pools, threaded sink, sample writers.
pub mod encode;
/// Collaborator traits between the orchestrator and decode/encode machinery.
pub mod media;
/// Export sessions.
pub mod session;
/// Encoder settings and presets.
pub mod settings;

pub use crate::foundation::core::{Affine, MediaKind, Point, Rect, Size, Vec2, pixel_dims};
pub use crate::foundation::error::{ExportError, ExportResult};
pub use crate::foundation::time::{DEFAULT_TIMESCALE, MediaTime, TimeRange};

pub use crate::assets::synthetic::SyntheticAsset;
pub use crate::composition::builder::build_default_composition;
pub use crate::composition::{CompositionInstruction, LayerInstruction, VideoComposition};
pub use crate::encode::pool::{FrameBufferPool, FramePoolOpts, PixelBufferAdaptor, PooledFrame};
pub use crate::encode::threaded::{ThreadedSink, ThreadedSinkFactory, ThreadedSinkOpts};
pub use crate::encode::writer::{
    SampleLog, SampleLogOpts, SampleLogWriter, SampleLogWriterFactory, SampleWriter,
    SampleWriterFactory, WriterConfig,
};
pub use crate::media::asset::{Asset, AssetTrack};
pub use crate::media::pipeline::{
    MediaSink, MediaSource, ReaderStatus, SinkFactory, TrackInput, TrackOutput, WriterStatus,
};
pub use crate::media::sample::{AudioBuffer, FrameBuffer, Sample, SamplePayload};
pub use crate::session::export::{ExportConfig, ExportSession, ExportStatus};
pub use crate::session::pump::FrameInterceptor;
pub use crate::settings::{
    AudioMix, AudioMixParams, AudioSettings, FileType, MetadataItem, VideoSettings,
};

#[cfg(feature = "media-ffmpeg")]
pub use crate::assets::ffmpeg::FfmpegAsset;
#[cfg(feature = "media-ffmpeg")]
pub use crate::encode::ffmpeg::{FfmpegWriter, FfmpegWriterFactory, is_ffmpeg_on_path};
