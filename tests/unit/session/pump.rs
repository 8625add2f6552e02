use super::*;
use crate::encode::pool::FramePoolOpts;
use crate::foundation::core::Size;
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::TimeRange;
use crate::media::pipeline::{InputDesc, OutputDesc, ReadyNotify};
use crate::media::sample::Sample;
use crate::settings::MetadataItem;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FixedSource(Mutex<ReaderStatus>);

impl MediaSource for FixedSource {
    fn status(&self) -> ReaderStatus {
        *self.0.lock()
    }
    fn error(&self) -> Option<Arc<ExportError>> {
        None
    }
    fn set_time_range(&self, _range: TimeRange) {}
    fn can_add_output(&self, _desc: &OutputDesc) -> bool {
        false
    }
    fn add_output(&self, _desc: OutputDesc) -> ExportResult<Box<dyn TrackOutput>> {
        Err(ExportError::source("unsupported"))
    }
    fn start_reading(&self) -> bool {
        true
    }
    fn cancel_reading(&self) {}
}

struct FixedSink(WriterStatus);

impl MediaSink for FixedSink {
    fn status(&self) -> WriterStatus {
        self.0
    }
    fn error(&self) -> Option<Arc<ExportError>> {
        None
    }
    fn set_metadata(&self, _items: Vec<MetadataItem>) {}
    fn set_optimize_for_network_use(&self, _optimize: bool) {}
    fn can_add_input(&self, _desc: &InputDesc) -> bool {
        false
    }
    fn add_input(&self, _desc: InputDesc) -> ExportResult<Box<dyn TrackInput>> {
        Err(ExportError::sink("unsupported"))
    }
    fn start_writing(&self) -> bool {
        true
    }
    fn start_session(&self, _at: MediaTime) {}
    fn finish_writing(&self, done: crate::media::pipeline::FinishCallback) {
        done();
    }
    fn cancel_writing(&self) {}
}

struct QueueOutput(VecDeque<Sample>);

impl TrackOutput for QueueOutput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }
    fn copy_next_sample(&mut self) -> Option<Sample> {
        self.0.pop_front()
    }
}

#[derive(Debug, PartialEq)]
enum Appended {
    Sample(MediaTime, u8),
    Frame(MediaTime, u8),
}

#[derive(Default)]
struct RecordingInput {
    capacity: usize,
    reject: bool,
    appended: Vec<Appended>,
    finished: bool,
}

impl TrackInput for RecordingInput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }
    fn is_ready_for_more_media_data(&self) -> bool {
        !self.finished && self.appended.len() < self.capacity
    }
    fn request_media_data_when_ready(&mut self, _notify: ReadyNotify) {}
    fn append_sample(&mut self, sample: Sample) -> bool {
        let first = sample.payload_bytes().first().copied().unwrap_or(0);
        self.appended.push(Appended::Sample(sample.pts, first));
        !self.reject
    }
    fn append_frame(&mut self, frame: PooledFrame, pts: MediaTime) -> bool {
        self.appended.push(Appended::Frame(pts, frame.data[0]));
        !self.reject
    }
    fn mark_as_finished(&mut self) {
        self.finished = true;
    }
}

fn frames(start_secs: f64, count: u8) -> QueueOutput {
    QueueOutput(
        (0..count)
            .map(|i| {
                Sample::video(
                    MediaTime::from_seconds(start_secs + f64::from(i), 90_000),
                    MediaTime::new(1, 1),
                    FrameBuffer::filled(2, 2, [i, i, i, 255]),
                )
            })
            .collect(),
    )
}

fn input(capacity: usize) -> RecordingInput {
    RecordingInput {
        capacity,
        ..RecordingInput::default()
    }
}

struct Harness {
    source: FixedSource,
    sink: FixedSink,
    reports: Mutex<Vec<(MediaTime, f32)>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: FixedSource(Mutex::new(ReaderStatus::Reading)),
            sink: FixedSink(WriterStatus::Writing),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn run(
        &self,
        interceptor: Option<&dyn FrameInterceptor>,
        output: &mut QueueOutput,
        input: &mut RecordingInput,
        adaptor: Option<&PixelBufferAdaptor>,
    ) -> bool {
        let report = |_kind: MediaKind, t: MediaTime, p: f32| self.reports.lock().push((t, p));
        let ctx = PumpContext {
            source: &self.source,
            sink: &self.sink,
            range_start: MediaTime::new(1, 1),
            duration: MediaTime::new(4, 1),
            interceptor,
            drives_progress: true,
            report: &report,
        };
        encode_ready_samples(&ctx, output, input, adaptor)
    }
}

#[test]
fn drains_to_end_of_stream() {
    let h = Harness::new();
    let mut out = frames(1.0, 3);
    let mut inp = input(10);
    assert!(!h.run(None, &mut out, &mut inp, None));
    assert!(inp.finished);
    assert_eq!(inp.appended.len(), 3);
}

#[test]
fn stops_when_capacity_is_exhausted() {
    let h = Harness::new();
    let mut out = frames(1.0, 5);
    let mut inp = input(2);
    assert!(h.run(None, &mut out, &mut inp, None));
    assert!(!inp.finished);
    assert_eq!(inp.appended.len(), 2);
    assert_eq!(out.0.len(), 3);
}

#[test]
fn reports_relative_time_and_progress() {
    let h = Harness::new();
    let mut out = frames(1.0, 3);
    let mut inp = input(10);
    h.run(None, &mut out, &mut inp, None);
    let reports = h.reports.lock().clone();
    assert_eq!(
        reports,
        vec![
            (MediaTime::ZERO, 0.0),
            (MediaTime::new(1, 1), 0.25),
            (MediaTime::new(2, 1), 0.5),
        ]
    );
}

#[test]
fn progress_is_clamped() {
    assert_eq!(progress_for(MediaTime::new(5, 1), MediaTime::ZERO), 1.0);
    assert_eq!(progress_for(MediaTime::new(5, 1), MediaTime::new(2, 1)), 1.0);
    assert_eq!(progress_for(MediaTime::new(-1, 1), MediaTime::new(2, 1)), 0.0);
}

#[test]
fn interceptor_replaces_selected_frames() {
    let h = Harness::new();
    let mut out = frames(1.0, 4);
    let mut inp = input(10);
    let adaptor = PixelBufferAdaptor::new(Size::new(2.0, 2.0), FramePoolOpts::default());
    let seen = Mutex::new(Vec::new());
    let interceptor = |frame: &FrameBuffer, t: MediaTime, mut buf: PooledFrame| {
        seen.lock().push(t);
        if frame.data[0] % 2 == 0 {
            buf.fill([200, 0, 0, 255]);
            Some(buf)
        } else {
            None
        }
    };
    assert!(!h.run(Some(&interceptor), &mut out, &mut inp, Some(&adaptor)));

    assert_eq!(seen.lock().len(), 4);
    assert_eq!(seen.lock()[1], MediaTime::new(1, 1));
    assert_eq!(
        inp.appended,
        vec![
            Appended::Frame(MediaTime::new(1, 1), 200),
            Appended::Sample(MediaTime::new(2, 1), 1),
            Appended::Frame(MediaTime::new(3, 1), 200),
            Appended::Sample(MediaTime::new(4, 1), 3),
        ]
    );
}

#[test]
fn missing_pool_forwards_originals() {
    let h = Harness::new();
    let mut out = frames(1.0, 2);
    let mut inp = input(10);
    let calls = AtomicUsize::new(0);
    let interceptor = |_f: &FrameBuffer, _t: MediaTime, buf: PooledFrame| {
        calls.fetch_add(1, Ordering::SeqCst);
        Some(buf)
    };
    let adaptor = PixelBufferAdaptor::without_pool();
    h.run(Some(&interceptor), &mut out, &mut inp, Some(&adaptor));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(inp.appended[0], Appended::Sample(..)));
}

#[test]
fn stops_when_pipeline_leaves_running_state() {
    let h = Harness::new();
    *h.source.0.lock() = ReaderStatus::Failed;
    let mut out = frames(1.0, 3);
    let mut inp = input(10);
    assert!(!h.run(None, &mut out, &mut inp, None));
    assert!(inp.appended.is_empty());
    assert!(!inp.finished);

    let h = Harness {
        sink: FixedSink(WriterStatus::Failed),
        ..Harness::new()
    };
    let mut out = frames(1.0, 3);
    assert!(!h.run(None, &mut out, &mut inp, None));
    assert!(inp.appended.is_empty());
}

#[test]
fn rejected_append_stops_pump() {
    let h = Harness::new();
    let mut out = frames(1.0, 3);
    let mut inp = RecordingInput {
        reject: true,
        ..input(10)
    };
    assert!(!h.run(None, &mut out, &mut inp, None));
    assert_eq!(inp.appended.len(), 1);
}
