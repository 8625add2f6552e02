use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::composition::VideoComposition;
use crate::composition::builder::build_default_composition;
use crate::encode::pool::{FramePoolOpts, PixelBufferAdaptor};
use crate::foundation::core::{MediaKind, Size, pixel_dims};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::{MediaTime, TimeRange};
use crate::media::asset::Asset;
use crate::media::pipeline::{
    InputDesc, MediaSink, MediaSource, OutputDesc, ReaderStatus, SinkFactory, TrackInput,
    TrackOutput, WriterStatus,
};
use crate::session::pump::{FrameInterceptor, PumpContext, encode_ready_samples};
use crate::session::queue::SerialQueue;
use crate::settings::{
    AudioMix, AudioSettings, FileType, MetadataItem, VideoSettings, compress_audio_settings,
    compress_video_settings,
};

/// Lifecycle of an [`ExportSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportStatus {
    Idle,
    /// Pipeline built, sink not writing yet.
    Preparing,
    Exporting,
    Completed,
    Failed,
    Cancelled,
}

impl From<WriterStatus> for ExportStatus {
    fn from(s: WriterStatus) -> Self {
        match s {
            WriterStatus::Unknown => Self::Preparing,
            WriterStatus::Writing => Self::Exporting,
            WriterStatus::Completed => Self::Completed,
            WriterStatus::Failed => Self::Failed,
            WriterStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Export parameters. Only `output_url` is required.
#[derive(Clone, Debug, Default)]
pub struct ExportConfig {
    pub output_url: Option<PathBuf>,
    pub output_file_type: FileType,
    /// Portion of the asset to export; unbounded by default.
    pub time_range: TimeRange,
    pub video_settings: Option<VideoSettings>,
    pub audio_settings: Option<AudioSettings>,
    /// Caller composition; derived from the first video track when absent.
    pub video_composition: Option<VideoComposition>,
    pub audio_mix: Option<AudioMix>,
    pub metadata: Vec<MetadataItem>,
    pub should_optimize_for_network_use: bool,
}

/// Completion callback passed to [`ExportSession::start`].
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Transcodes one asset into one output file.
///
/// Cloning yields another handle to the same session. All methods may be called from any thread;
/// the completion callback runs on the session's callback thread.
#[derive(Clone)]
pub struct ExportSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    asset: Arc<dyn Asset>,
    sinks: Arc<dyn SinkFactory>,
    callbacks: SerialQueue,
    next_run_id: AtomicU64,
    state: Mutex<SessionState>,
}

struct SessionState {
    config: ExportConfig,
    interceptor: Option<Arc<dyn FrameInterceptor>>,
    status: ExportStatus,
    progress: f32,
    error: Option<Arc<ExportError>>,
    last_video_time: Option<MediaTime>,
    run: Option<Arc<ExportRun>>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Some(run) = self.state.get_mut().run.take() {
            run.abandon();
        }
    }
}

impl ExportSession {
    /// Create an idle session exporting `asset` through sinks from `sinks`.
    pub fn new(asset: Arc<dyn Asset>, sinks: Arc<dyn SinkFactory>) -> ExportResult<Self> {
        let callbacks = SerialQueue::new("mediaexport-callbacks")
            .context("failed to spawn callback thread")?;
        Ok(Self {
            shared: Arc::new(SessionShared {
                asset,
                sinks,
                callbacks,
                next_run_id: AtomicU64::new(1),
                state: Mutex::new(SessionState {
                    config: ExportConfig::default(),
                    interceptor: None,
                    status: ExportStatus::Idle,
                    progress: 0.0,
                    error: None,
                    last_video_time: None,
                    run: None,
                }),
            }),
        })
    }

    /// Session preset: H.264 at 2.4 Mbit/s (High@4.0) scaled into `output_size`, AAC stereo
    /// 44.1 kHz at 128 kbit/s.
    pub fn compress(
        asset: Arc<dyn Asset>,
        sinks: Arc<dyn SinkFactory>,
        time_range: Option<TimeRange>,
        output_size: Size,
        output_url: impl Into<PathBuf>,
    ) -> ExportResult<Self> {
        let session = Self::new(asset, sinks)?;
        let url = output_url.into();
        let (w, h) = pixel_dims(output_size);
        session.configure(|c| {
            c.output_url = Some(url);
            if let Some(range) = time_range {
                c.time_range = range;
            }
            c.video_settings = Some(compress_video_settings(w, h));
            c.audio_settings = Some(compress_audio_settings());
        });
        Ok(session)
    }

    /// Edit the configuration used by the next [`ExportSession::start`].
    pub fn configure(&self, edit: impl FnOnce(&mut ExportConfig)) {
        edit(&mut self.shared.state.lock().config);
    }

    pub fn config(&self) -> ExportConfig {
        self.shared.state.lock().config.clone()
    }

    pub fn set_frame_interceptor(&self, interceptor: Option<Arc<dyn FrameInterceptor>>) {
        self.shared.state.lock().interceptor = interceptor;
    }

    pub fn asset(&self) -> &Arc<dyn Asset> {
        &self.shared.asset
    }

    pub fn status(&self) -> ExportStatus {
        let st = self.shared.state.lock();
        match &st.run {
            Some(run) => run.sink.status().into(),
            None => st.status,
        }
    }

    /// Fraction of the export range written so far, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.shared.state.lock().progress
    }

    /// Sink error, else source error, else the error recorded by the session itself.
    pub fn error(&self) -> Option<Arc<ExportError>> {
        let st = self.shared.state.lock();
        let local = st.error.clone();
        match &st.run {
            Some(run) => run.sink.error().or_else(|| run.source.error()).or(local),
            None => local,
        }
    }

    /// Presentation time of the last video frame handed to the sink, relative to the range start.
    pub fn last_video_presentation_time(&self) -> Option<MediaTime> {
        self.shared.state.lock().last_video_time
    }

    /// Start exporting; `on_done` runs exactly once when the export ends.
    ///
    /// Any export in flight is cancelled first. Configuration and pipeline construction errors
    /// are reported by calling `on_done` before this returns; the session stays idle.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn start(&self, on_done: impl FnOnce() + Send + 'static) {
        let on_done: CompletionHandler = Box::new(on_done);
        let (config, interceptor, previous) = {
            let mut st = self.shared.state.lock();
            st.progress = 0.0;
            st.error = None;
            st.last_video_time = None;
            st.status = ExportStatus::Idle;
            (st.config.clone(), st.interceptor.clone(), st.run.take())
        };
        if let Some(previous) = previous {
            tracing::debug!(run = previous.id, "cancelling previous export");
            previous.cancel();
        }

        let Some(url) = config.output_url.clone() else {
            self.fail_early(ExportError::OutputUrlNotSet, on_done);
            return;
        };
        let parts = match self.build(&url, &config) {
            Ok(parts) => parts,
            Err(err) => {
                self.fail_early(err, on_done);
                return;
            }
        };

        let id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);
        let queue = match SerialQueue::new(&format!("mediaexport-run-{id}")) {
            Ok(q) => q,
            Err(e) => {
                let err = anyhow::Error::new(e).context("failed to spawn export queue");
                self.fail_early(err.into(), on_done);
                return;
            }
        };

        let Parts {
            source,
            sink,
            video,
            audio,
            duration,
        } = parts;
        let progress_kind = if video.is_some() {
            Some(MediaKind::Video)
        } else if audio.is_some() {
            Some(MediaKind::Audio)
        } else {
            None
        };

        sink.start_writing();
        source.start_reading();
        sink.start_session(config.time_range.start);

        let run = Arc::new(ExportRun {
            id,
            session: Arc::downgrade(&self.shared),
            video_done: AtomicBool::new(video.is_none()),
            audio_done: AtomicBool::new(audio.is_none()),
            video: Mutex::new(video),
            audio: Mutex::new(audio),
            source,
            sink,
            queue,
            callbacks: self.shared.callbacks.clone(),
            on_done: Mutex::new(Some(on_done)),
            ended: Mutex::new(false),
            cancelled: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            range_start: config.time_range.start,
            duration,
            output_url: url,
            interceptor,
            progress_kind,
        });
        self.shared.state.lock().run = Some(run.clone());
        tracing::info!(
            run = id,
            url = %run.output_url.display(),
            video = progress_kind == Some(MediaKind::Video),
            "export started"
        );

        if progress_kind.is_none() {
            let r = run.clone();
            run.queue.post(move || r.finish_once());
            return;
        }
        for kind in [MediaKind::Video, MediaKind::Audio] {
            run.register_readiness(kind);
        }
    }

    /// Cancel the export in flight, if any. The completion callback still runs.
    pub fn cancel_export(&self) {
        let Some(run) = self.shared.state.lock().run.clone() else {
            return;
        };
        tracing::debug!(run = run.id, "cancel requested");
        run.cancelled.store(true, Ordering::SeqCst);
        let r = run.clone();
        run.queue.post(move || {
            r.sink.cancel_writing();
            r.source.cancel_reading();
            r.complete();
            r.release();
        });
    }

    /// Return to idle, dropping the pending completion callback without calling it.
    pub fn reset(&self) {
        let run = {
            let mut st = self.shared.state.lock();
            st.status = ExportStatus::Idle;
            st.error = None;
            st.progress = 0.0;
            st.last_video_time = None;
            st.run.take()
        };
        if let Some(run) = run {
            run.abandon();
        }
    }

    fn fail_early(&self, err: ExportError, on_done: CompletionHandler) {
        tracing::warn!(error = %err, "export not started");
        {
            let mut st = self.shared.state.lock();
            st.status = ExportStatus::Idle;
            st.error = Some(Arc::new(err));
        }
        on_done();
    }

    fn build(&self, url: &Path, config: &ExportConfig) -> ExportResult<Parts> {
        let asset = &self.shared.asset;
        let source = asset.open_source()?;
        let sink = self.shared.sinks.open_sink(url, config.output_file_type)?;

        source.set_time_range(config.time_range);
        sink.set_metadata(config.metadata.clone());
        sink.set_optimize_for_network_use(config.should_optimize_for_network_use);

        let asset_duration = asset.duration();
        let duration = config.time_range.export_duration(asset_duration);

        let video_tracks = asset.tracks_with_kind(MediaKind::Video);
        let video = match video_tracks.first() {
            Some(first) => {
                let composition = config.video_composition.clone().unwrap_or_else(|| {
                    build_default_composition(first, config.video_settings.as_ref(), asset_duration)
                });
                let render_size = composition.render_size;
                let input = InputDesc::Video {
                    settings: config.video_settings.clone(),
                    render_size,
                    frame_duration: composition.frame_duration,
                };
                let output = OutputDesc::Video {
                    tracks: video_tracks,
                    composition,
                };
                attach(source.as_ref(), sink.as_ref(), output, input)?.map(|(o, i)| TrackPipe {
                    output: o,
                    input: i,
                    adaptor: Some(PixelBufferAdaptor::new(
                        render_size,
                        FramePoolOpts::default(),
                    )),
                    finished: false,
                })
            }
            None => None,
        };

        let audio_tracks = asset.tracks_with_kind(MediaKind::Audio);
        let audio = if audio_tracks.is_empty() {
            None
        } else {
            let output = OutputDesc::Audio {
                tracks: audio_tracks,
                mix: config.audio_mix.clone(),
            };
            let input = InputDesc::Audio {
                settings: config.audio_settings.clone(),
            };
            attach(source.as_ref(), sink.as_ref(), output, input)?.map(|(o, i)| TrackPipe {
                output: o,
                input: i,
                adaptor: None,
                finished: false,
            })
        };

        Ok(Parts {
            source,
            sink,
            video,
            audio,
            duration,
        })
    }
}

/// Add an output/input pair when both sides accept it.
fn attach(
    source: &dyn MediaSource,
    sink: &dyn MediaSink,
    output: OutputDesc,
    input: InputDesc,
) -> ExportResult<Option<(Box<dyn TrackOutput>, Box<dyn TrackInput>)>> {
    let kind = output.kind();
    if !source.can_add_output(&output) || !sink.can_add_input(&input) {
        tracing::debug!(kind = %kind, "track skipped: pipeline rejected it");
        return Ok(None);
    }
    let output = source.add_output(output)?;
    let input = sink.add_input(input)?;
    Ok(Some((output, input)))
}

struct Parts {
    source: Arc<dyn MediaSource>,
    sink: Arc<dyn MediaSink>,
    video: Option<TrackPipe>,
    audio: Option<TrackPipe>,
    duration: MediaTime,
}

struct TrackPipe {
    output: Box<dyn TrackOutput>,
    input: Box<dyn TrackInput>,
    adaptor: Option<PixelBufferAdaptor>,
    finished: bool,
}

/// One `start` worth of pipeline state. Pumps and completion bookkeeping run on `queue`.
struct ExportRun {
    id: u64,
    session: Weak<SessionShared>,
    source: Arc<dyn MediaSource>,
    sink: Arc<dyn MediaSink>,
    video: Mutex<Option<TrackPipe>>,
    audio: Mutex<Option<TrackPipe>>,
    video_done: AtomicBool,
    audio_done: AtomicBool,
    queue: SerialQueue,
    callbacks: SerialQueue,
    on_done: Mutex<Option<CompletionHandler>>,
    /// Set by the first `complete`/`abandon`; later calls must not touch the output path.
    ended: Mutex<bool>,
    cancelled: AtomicBool,
    finishing: AtomicBool,
    range_start: MediaTime,
    duration: MediaTime,
    output_url: PathBuf,
    interceptor: Option<Arc<dyn FrameInterceptor>>,
    progress_kind: Option<MediaKind>,
}

impl ExportRun {
    fn pipe(&self, kind: MediaKind) -> &Mutex<Option<TrackPipe>> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    fn done_flag(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Video => &self.video_done,
            MediaKind::Audio => &self.audio_done,
        }
    }

    fn register_readiness(self: &Arc<Self>, kind: MediaKind) {
        let weak = Arc::downgrade(self);
        let queue = self.queue.clone();
        let notify = Arc::new(move || {
            let weak = weak.clone();
            queue.post(move || {
                if let Some(run) = weak.upgrade() {
                    run.pump(kind);
                }
            });
        });
        if let Some(pipe) = self.pipe(kind).lock().as_mut() {
            pipe.input.request_media_data_when_ready(notify);
        }
    }

    fn pump(self: &Arc<Self>, kind: MediaKind) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.pipe(kind).lock();
        let Some(pipe) = slot.as_mut() else {
            return;
        };
        if pipe.finished {
            return;
        }
        let report = |k: MediaKind, t: MediaTime, p: f32| self.report_progress(k, t, p);
        let ctx = PumpContext {
            source: self.source.as_ref(),
            sink: self.sink.as_ref(),
            range_start: self.range_start,
            duration: self.duration,
            interceptor: self.interceptor.as_deref(),
            drives_progress: self.progress_kind == Some(kind),
            report: &report,
        };
        let step = catch_unwind(AssertUnwindSafe(|| {
            encode_ready_samples(
                &ctx,
                pipe.output.as_mut(),
                pipe.input.as_mut(),
                pipe.adaptor.as_ref(),
            )
        }));
        let more = match step {
            Ok(more) => more,
            Err(payload) => {
                pipe.finished = true;
                drop(slot);
                let msg = panic_message(payload.as_ref());
                tracing::error!(run = self.id, kind = %kind, panic = msg, "pump panicked");
                self.abort(ExportError::Other(anyhow::anyhow!(
                    "{kind} pump panicked: {msg}"
                )));
                return;
            }
        };
        if more {
            return;
        }
        pipe.finished = true;
        drop(slot);
        tracing::debug!(run = self.id, kind = %kind, "track done");
        let r = self.clone();
        self.queue.post(move || r.mark_done(kind));
    }

    fn mark_done(self: &Arc<Self>, kind: MediaKind) {
        self.done_flag(kind).store(true, Ordering::SeqCst);
        if self.video_done.load(Ordering::SeqCst) && self.audio_done.load(Ordering::SeqCst) {
            self.finish_once();
        }
    }

    fn finish_once(self: &Arc<Self>) {
        if !self.finishing.swap(true, Ordering::SeqCst) {
            self.finish();
        }
    }

    fn finish(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::SeqCst)
            || self.source.status() == ReaderStatus::Cancelled
            || self.sink.status() == WriterStatus::Cancelled
        {
            return;
        }
        if self.sink.status() == WriterStatus::Failed {
            self.source.cancel_reading();
            self.complete();
            return;
        }
        if self.source.status() == ReaderStatus::Failed {
            self.sink.cancel_writing();
            self.complete();
            return;
        }
        let r = self.clone();
        let queue = self.queue.clone();
        self.sink.finish_writing(Box::new(move || {
            queue.post(move || r.complete());
        }));
    }

    fn complete(&self) {
        let status = {
            let mut ended = self.ended.lock();
            if std::mem::replace(&mut *ended, true) {
                return;
            }
            let status = self.sink.status();
            if matches!(status, WriterStatus::Failed | WriterStatus::Cancelled) {
                self.remove_output();
            }
            status
        };
        if status == WriterStatus::Completed
            && let Some(session) = self.session.upgrade()
        {
            let mut st = session.state.lock();
            if st.run.as_ref().is_some_and(|r| r.id == self.id) {
                st.progress = 1.0;
            }
        }
        tracing::info!(run = self.id, status = ?status, "export ended");
        if let Some(handler) = self.on_done.lock().take() {
            self.callbacks.post(handler);
        }
    }

    fn remove_output(&self) {
        match std::fs::remove_file(&self.output_url) {
            Ok(()) => tracing::debug!(url = %self.output_url.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                url = %self.output_url.display(),
                error = %e,
                "failed to remove partial output"
            ),
        }
    }

    /// Detach from the session, latching the sink's final status.
    fn release(&self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let mut st = session.state.lock();
        if st.run.as_ref().is_some_and(|r| r.id == self.id) {
            st.status = self.sink.status().into();
            st.error = None;
            st.run = None;
        }
    }

    fn report_progress(&self, kind: MediaKind, t: MediaTime, progress: f32) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let mut st = session.state.lock();
        if !st.run.as_ref().is_some_and(|r| r.id == self.id) {
            return;
        }
        st.progress = st.progress.max(progress);
        if kind == MediaKind::Video {
            st.last_video_time = Some(t);
        }
    }

    /// Stop the run after a pump step panicked, recording `err` as the session error.
    fn abort(&self, err: ExportError) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.upgrade() {
            let mut st = session.state.lock();
            if st.run.as_ref().is_some_and(|r| r.id == self.id) {
                st.error = Some(Arc::new(err));
            }
        }
        self.sink.cancel_writing();
        self.source.cancel_reading();
        self.complete();
    }

    /// Stop a run replaced by a newer `start`. Its callback still runs once.
    ///
    /// Runs on the calling thread so the output location is released before the next run opens it.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sink.cancel_writing();
        self.source.cancel_reading();
        self.complete();
    }

    /// Tear down a run the session no longer tracks. The callback is dropped without being called.
    fn abandon(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut ended = self.ended.lock();
        drop(self.on_done.lock().take());
        if std::mem::replace(&mut *ended, true) {
            return;
        }
        if self.sink.status() != WriterStatus::Completed {
            self.sink.cancel_writing();
            self.source.cancel_reading();
            self.remove_output();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
#[path = "../../tests/unit/session/export.rs"]
mod tests;
