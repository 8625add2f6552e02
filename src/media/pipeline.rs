use std::path::Path;
use std::sync::Arc;

use crate::composition::VideoComposition;
use crate::encode::pool::PooledFrame;
use crate::foundation::core::{MediaKind, Size};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::{MediaTime, TimeRange};
use crate::media::asset::AssetTrack;
use crate::media::sample::Sample;
use crate::settings::{AudioMix, AudioSettings, FileType, MetadataItem, VideoSettings};

/// Status of a [`MediaSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderStatus {
    /// Created, not reading yet.
    Unknown,
    Reading,
    Completed,
    Failed,
    Cancelled,
}

/// Status of a [`MediaSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterStatus {
    /// Created, not writing yet.
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

impl WriterStatus {
    /// Return `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Readiness notification registered on a [`TrackInput`].
///
/// Called whenever the input can accept more data. It must not block; sessions use it to post a
/// pump step onto their work queue.
pub type ReadyNotify = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked once by [`MediaSink::finish_writing`], possibly on another thread.
pub type FinishCallback = Box<dyn FnOnce() + Send>;

/// Description of a track output to attach to a [`MediaSource`].
#[derive(Clone, Debug)]
pub enum OutputDesc {
    /// Composited video: frames are rendered at `composition.render_size` every
    /// `composition.frame_duration`.
    Video {
        tracks: Vec<AssetTrack>,
        composition: VideoComposition,
    },
    /// Audio mixed down from all `tracks`.
    Audio {
        tracks: Vec<AssetTrack>,
        mix: Option<AudioMix>,
    },
}

impl OutputDesc {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// Description of a track input to attach to a [`MediaSink`].
#[derive(Clone, Debug)]
pub enum InputDesc {
    Video {
        settings: Option<VideoSettings>,
        /// Size of the frames that will be appended.
        render_size: Size,
        frame_duration: MediaTime,
    },
    Audio {
        settings: Option<AudioSettings>,
    },
}

impl InputDesc {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// Demux+decode pipeline over one asset.
///
/// Methods take `&self`; implementations are shared between the session and its work queue.
pub trait MediaSource: Send + Sync {
    fn status(&self) -> ReaderStatus;

    /// Last recorded error, if any.
    fn error(&self) -> Option<Arc<ExportError>>;

    /// Restrict reading to `range`. Must be called before [`MediaSource::start_reading`].
    fn set_time_range(&self, range: TimeRange);

    fn can_add_output(&self, desc: &OutputDesc) -> bool;

    fn add_output(&self, desc: OutputDesc) -> ExportResult<Box<dyn TrackOutput>>;

    /// Begin decoding. Returns `false` (and records an error) on failure.
    fn start_reading(&self) -> bool;

    fn cancel_reading(&self);
}

/// Source-side per-track handle.
pub trait TrackOutput: Send {
    fn kind(&self) -> MediaKind;

    /// Next decoded sample in presentation order, or `None` at end of stream (or after a source
    /// failure/cancellation).
    fn copy_next_sample(&mut self) -> Option<Sample>;
}

/// Encode+mux pipeline writing one output file.
pub trait MediaSink: Send + Sync {
    fn status(&self) -> WriterStatus;

    /// Last recorded error, if any.
    fn error(&self) -> Option<Arc<ExportError>>;

    fn set_metadata(&self, items: Vec<MetadataItem>);

    /// Request a layout suited to progressive download (moov atom first).
    fn set_optimize_for_network_use(&self, optimize: bool);

    fn can_add_input(&self, desc: &InputDesc) -> bool;

    fn add_input(&self, desc: InputDesc) -> ExportResult<Box<dyn TrackInput>>;

    /// Begin writing. Returns `false` (and records an error) on failure.
    fn start_writing(&self) -> bool;

    /// Samples are timed relative to `at`.
    fn start_session(&self, at: MediaTime);

    /// Flush buffered samples and close the container, then call `done`.
    fn finish_writing(&self, done: FinishCallback);

    /// Abort writing. Once this returns the sink no longer touches the output file.
    fn cancel_writing(&self);
}

/// Sink-side per-track handle.
pub trait TrackInput: Send {
    fn kind(&self) -> MediaKind;

    /// Capacity check; the pump appends only while this is `true`.
    fn is_ready_for_more_media_data(&self) -> bool;

    /// Register the readiness notification. Implementations call it when capacity returns, and
    /// may call it immediately when capacity is already available.
    fn request_media_data_when_ready(&mut self, notify: ReadyNotify);

    fn append_sample(&mut self, sample: Sample) -> bool;

    /// Append a pool frame in place of a decoded sample.
    fn append_frame(&mut self, frame: PooledFrame, pts: MediaTime) -> bool;

    /// No more data will be appended.
    fn mark_as_finished(&mut self);
}

/// Opens sinks for output locations.
pub trait SinkFactory: Send + Sync {
    fn open_sink(&self, url: &Path, file_type: FileType) -> ExportResult<Arc<dyn MediaSink>>;
}
