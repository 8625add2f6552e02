use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak, mpsc};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::encode::pool::PooledFrame;
use crate::encode::writer::{
    AudioTrackConfig, SampleWriter, SampleWriterFactory, VideoTrackConfig, WriterConfig,
};
use crate::foundation::core::MediaKind;
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::MediaTime;
use crate::media::pipeline::{
    FinishCallback, InputDesc, MediaSink, ReadyNotify, SinkFactory, TrackInput, WriterStatus,
};
use crate::media::sample::{Sample, SamplePayload};
use crate::settings::{FileType, MetadataItem};

#[derive(Clone, Copy, Debug)]
pub struct ThreadedSinkOpts {
    /// Samples each input may have queued before it stops reporting readiness.
    pub queue_depth: usize,
}

impl Default for ThreadedSinkOpts {
    fn default() -> Self {
        Self { queue_depth: 8 }
    }
}

/// [`SinkFactory`] producing [`ThreadedSink`]s over writers from `writers`.
#[derive(Clone)]
pub struct ThreadedSinkFactory {
    writers: Arc<dyn SampleWriterFactory>,
    opts: ThreadedSinkOpts,
}

impl ThreadedSinkFactory {
    pub fn new(writers: impl SampleWriterFactory + 'static) -> Self {
        Self {
            writers: Arc::new(writers),
            opts: ThreadedSinkOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: ThreadedSinkOpts) -> Self {
        self.opts = opts;
        self
    }
}

impl SinkFactory for ThreadedSinkFactory {
    fn open_sink(&self, url: &Path, file_type: FileType) -> ExportResult<Arc<dyn MediaSink>> {
        let writer = self.writers.create_writer(url, file_type)?;
        Ok(Arc::new(ThreadedSink::new(url, file_type, writer, self.opts)))
    }
}

enum Msg {
    StartSession(MediaTime),
    Sample {
        gate: Arc<InputGate>,
        sample: Sample,
    },
    Frame {
        gate: Arc<InputGate>,
        frame: PooledFrame,
        pts: MediaTime,
    },
    EndOfTrack(MediaKind),
    Finish(FinishCallback),
    Stop,
}

/// Per-input flow control shared between the producer handle and the writer thread.
struct InputGate {
    kind: MediaKind,
    in_flight: AtomicUsize,
    capacity: usize,
    finished: AtomicBool,
    notify: Mutex<Option<ReadyNotify>>,
}

impl InputGate {
    fn fire(&self) {
        let notify = self.notify.lock().clone();
        if let Some(notify) = notify {
            notify();
        }
    }

    fn release(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if prev == self.capacity {
            self.fire();
        }
    }

    fn has_capacity(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) < self.capacity
    }
}

struct SinkState {
    status: WriterStatus,
    error: Option<Arc<ExportError>>,
    metadata: Vec<MetadataItem>,
    optimize_for_network_use: bool,
    video: Option<VideoTrackConfig>,
    audio: Option<AudioTrackConfig>,
    writer: Option<Box<dyn SampleWriter>>,
    tx: Option<mpsc::Sender<Msg>>,
    gates: Vec<Arc<InputGate>>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    url: PathBuf,
    file_type: FileType,
    opts: ThreadedSinkOpts,
    state: Mutex<SinkState>,
}

impl Shared {
    fn status(&self) -> WriterStatus {
        self.state.lock().status
    }

    fn is_writing(&self) -> bool {
        self.status() == WriterStatus::Writing
    }

    fn send(&self, msg: Msg) -> bool {
        let st = self.state.lock();
        match &st.tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Record a failure and wake every input so producers observe it.
    fn fail(&self, err: ExportError) {
        let gates = {
            let mut st = self.state.lock();
            if st.status.is_terminal() {
                return;
            }
            tracing::warn!(url = %self.url.display(), error = %err, "sink failed");
            st.status = WriterStatus::Failed;
            st.error = Some(Arc::new(err));
            st.tx = None;
            st.gates.clone()
        };
        for gate in gates {
            gate.fire();
        }
    }
}

/// [`MediaSink`] that runs a [`SampleWriter`] on a dedicated writer thread.
///
/// Each input has a bounded in-flight budget; appends are queued to the writer thread and the
/// input's readiness notification fires when the budget frees up again.
pub struct ThreadedSink {
    shared: Arc<Shared>,
}

impl ThreadedSink {
    pub fn new(
        url: &Path,
        file_type: FileType,
        writer: Box<dyn SampleWriter>,
        opts: ThreadedSinkOpts,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.to_path_buf(),
                file_type,
                opts,
                state: Mutex::new(SinkState {
                    status: WriterStatus::Unknown,
                    error: None,
                    metadata: Vec::new(),
                    optimize_for_network_use: false,
                    video: None,
                    audio: None,
                    writer: Some(writer),
                    tx: None,
                    gates: Vec::new(),
                    worker: None,
                }),
            }),
        }
    }

    pub fn url(&self) -> &Path {
        &self.shared.url
    }
}

impl MediaSink for ThreadedSink {
    fn status(&self) -> WriterStatus {
        self.shared.status()
    }

    fn error(&self) -> Option<Arc<ExportError>> {
        self.shared.state.lock().error.clone()
    }

    fn set_metadata(&self, items: Vec<MetadataItem>) {
        self.shared.state.lock().metadata = items;
    }

    fn set_optimize_for_network_use(&self, optimize: bool) {
        self.shared.state.lock().optimize_for_network_use = optimize;
    }

    fn can_add_input(&self, desc: &InputDesc) -> bool {
        let st = self.shared.state.lock();
        if st.status != WriterStatus::Unknown {
            return false;
        }
        match desc {
            InputDesc::Video { .. } => st.video.is_none() && self.shared.file_type.supports_video(),
            InputDesc::Audio { .. } => st.audio.is_none(),
        }
    }

    fn add_input(&self, desc: InputDesc) -> ExportResult<Box<dyn TrackInput>> {
        if !self.can_add_input(&desc) {
            return Err(ExportError::sink(format!(
                "cannot add {} input to {:?} sink",
                desc.kind(),
                self.shared.file_type
            )));
        }
        let kind = desc.kind();
        let mut st = self.shared.state.lock();
        match desc {
            InputDesc::Video {
                settings,
                render_size,
                frame_duration,
            } => {
                st.video = Some(VideoTrackConfig {
                    settings,
                    render_size,
                    frame_duration,
                });
            }
            InputDesc::Audio { settings } => {
                st.audio = Some(AudioTrackConfig { settings });
            }
        }
        let gate = Arc::new(InputGate {
            kind,
            in_flight: AtomicUsize::new(0),
            capacity: self.shared.opts.queue_depth.max(1),
            finished: AtomicBool::new(false),
            notify: Mutex::new(None),
        });
        st.gates.push(gate.clone());
        Ok(Box::new(ThreadedTrackInput {
            shared: self.shared.clone(),
            gate,
        }))
    }

    fn start_writing(&self) -> bool {
        let (mut writer, cfg) = {
            let mut st = self.shared.state.lock();
            if st.status != WriterStatus::Unknown {
                return false;
            }
            let Some(writer) = st.writer.take() else {
                return false;
            };
            let cfg = WriterConfig {
                url: self.shared.url.clone(),
                file_type: self.shared.file_type,
                video: st.video.clone(),
                audio: st.audio.clone(),
                metadata: st.metadata.clone(),
                optimize_for_network_use: st.optimize_for_network_use,
            };
            (writer, cfg)
        };

        if let Err(err) = writer.begin(cfg) {
            writer.abort();
            self.shared.fail(err);
            return false;
        }

        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("mediaexport-writer".to_owned())
            .spawn(move || writer_loop(writer, rx, weak));
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.shared
                    .fail(ExportError::sink(format!("failed to spawn writer thread: {e}")));
                return false;
            }
        };

        let mut st = self.shared.state.lock();
        st.status = WriterStatus::Writing;
        st.tx = Some(tx);
        st.worker = Some(handle);
        tracing::debug!(url = %self.shared.url.display(), "sink writing");
        true
    }

    fn start_session(&self, at: MediaTime) {
        self.shared.send(Msg::StartSession(at));
    }

    fn finish_writing(&self, done: FinishCallback) {
        let tx = {
            let mut st = self.shared.state.lock();
            if st.status != WriterStatus::Writing {
                None
            } else {
                st.tx.take()
            }
        };
        match tx {
            Some(tx) => {
                if let Err(mpsc::SendError(Msg::Finish(done))) = tx.send(Msg::Finish(done)) {
                    done();
                }
            }
            None => done(),
        }
    }

    fn cancel_writing(&self) {
        let (worker, gates) = {
            let mut st = self.shared.state.lock();
            if matches!(st.status, WriterStatus::Unknown | WriterStatus::Writing) {
                st.status = WriterStatus::Cancelled;
            }
            if let Some(tx) = st.tx.take() {
                let _ = tx.send(Msg::Stop);
            }
            st.writer = None;
            (st.worker.take(), st.gates.clone())
        };
        if let Some(worker) = worker
            && worker.thread().id() != std::thread::current().id()
        {
            let _ = worker.join();
        }
        for gate in gates {
            gate.fire();
        }
    }
}

fn writer_loop(mut writer: Box<dyn SampleWriter>, rx: mpsc::Receiver<Msg>, shared: Weak<Shared>) {
    let mut session_start = MediaTime::ZERO;
    let writing = || {
        shared
            .upgrade()
            .is_some_and(|s| s.status() == WriterStatus::Writing)
    };
    let fail = |err: ExportError| {
        if let Some(s) = shared.upgrade() {
            s.fail(err);
        }
    };

    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::StartSession(at) => session_start = at,
            Msg::Sample { gate, sample } => {
                let res = if writing() {
                    let pts = sample.pts - session_start;
                    match &sample.payload {
                        SamplePayload::Video(frame) => writer.push_video(pts, frame),
                        SamplePayload::Audio(audio) => writer.push_audio(pts, audio),
                    }
                } else {
                    Ok(())
                };
                gate.release();
                if let Err(err) = res {
                    writer.abort();
                    fail(err);
                }
            }
            Msg::Frame { gate, frame, pts } => {
                let res = if writing() {
                    writer.push_video(pts - session_start, &frame)
                } else {
                    Ok(())
                };
                drop(frame);
                gate.release();
                if let Err(err) = res {
                    writer.abort();
                    fail(err);
                }
            }
            Msg::EndOfTrack(kind) => {
                tracing::trace!(kind = %kind, "input finished");
            }
            Msg::Finish(done) => {
                if writing() {
                    match writer.end() {
                        Ok(()) => {
                            if let Some(s) = shared.upgrade() {
                                let mut st = s.state.lock();
                                if st.status == WriterStatus::Writing {
                                    st.status = WriterStatus::Completed;
                                    tracing::info!(url = %s.url.display(), "sink finished");
                                }
                            }
                        }
                        Err(err) => {
                            writer.abort();
                            fail(err);
                        }
                    }
                } else {
                    writer.abort();
                }
                done();
                return;
            }
            Msg::Stop => break,
        }
    }
    writer.abort();
}

/// Producer handle for one [`ThreadedSink`] input.
pub struct ThreadedTrackInput {
    shared: Arc<Shared>,
    gate: Arc<InputGate>,
}

impl ThreadedTrackInput {
    fn accepting(&self) -> bool {
        !self.gate.finished.load(Ordering::Acquire) && self.shared.is_writing()
    }

    fn enqueue(&self, make: impl FnOnce(Arc<InputGate>) -> Msg) -> bool {
        if !self.accepting() {
            return false;
        }
        self.gate.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.shared.send(make(self.gate.clone())) {
            true
        } else {
            self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }
}

impl TrackInput for ThreadedTrackInput {
    fn kind(&self) -> MediaKind {
        self.gate.kind
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        if self.gate.finished.load(Ordering::Acquire) {
            return false;
        }
        !self.shared.is_writing() || self.gate.has_capacity()
    }

    fn request_media_data_when_ready(&mut self, notify: ReadyNotify) {
        *self.gate.notify.lock() = Some(notify);
        if self.is_ready_for_more_media_data() {
            self.gate.fire();
        }
    }

    fn append_sample(&mut self, sample: Sample) -> bool {
        if sample.kind() != self.gate.kind {
            return false;
        }
        self.enqueue(|gate| Msg::Sample { gate, sample })
    }

    fn append_frame(&mut self, frame: PooledFrame, pts: MediaTime) -> bool {
        if self.gate.kind != MediaKind::Video {
            return false;
        }
        self.enqueue(|gate| Msg::Frame { gate, frame, pts })
    }

    fn mark_as_finished(&mut self) {
        if self.gate.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.gate.notify.lock() = None;
        self.shared.send(Msg::EndOfTrack(self.gate.kind));
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/threaded.rs"]
mod tests;
