use super::*;
use crate::encode::writer::{SampleLog, SampleLogOpts, SampleLogWriterFactory};
use crate::foundation::core::Size;
use crate::media::sample::FrameBuffer;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

fn video_desc() -> InputDesc {
    InputDesc::Video {
        settings: None,
        render_size: Size::new(2.0, 2.0),
        frame_duration: MediaTime::new(3000, 90_000),
    }
}

fn frame_at(secs: f64) -> Sample {
    Sample::video(
        MediaTime::from_seconds(secs, 90_000),
        MediaTime::new(3000, 90_000),
        FrameBuffer::new(2, 2),
    )
}

fn counter() -> (Arc<AtomicU32>, ReadyNotify) {
    let hits = Arc::new(AtomicU32::new(0));
    let h = hits.clone();
    (
        hits,
        Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

fn finish(sink: &dyn MediaSink) {
    let (tx, rx) = mpsc::channel();
    sink.finish_writing(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn writes_samples_relative_to_session_start() {
    let dir = tempfile::tempdir().unwrap();
    let log = SampleLog::new();
    let factory = ThreadedSinkFactory::new(SampleLogWriterFactory {
        opts: SampleLogOpts::default(),
        log: Some(log.clone()),
    });
    let sink = factory
        .open_sink(&dir.path().join("out.jsonl"), FileType::Mp4)
        .unwrap();
    let mut input = sink.add_input(video_desc()).unwrap();
    assert!(sink.start_writing());
    sink.start_session(MediaTime::from_seconds(1.0, 90_000));

    let (hits, notify) = counter();
    input.request_media_data_when_ready(notify);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    for i in 0..3 {
        assert!(input.append_sample(frame_at(1.0 + f64::from(i) / 30.0)));
    }
    input.mark_as_finished();
    assert!(!input.is_ready_for_more_media_data());
    finish(sink.as_ref());

    assert_eq!(sink.status(), WriterStatus::Completed);
    let records = log.records();
    assert_eq!(records.len(), 3);
    assert!(records[0].pts.abs() < 1e-9);
    assert!((records[2].pts - 2.0 / 30.0).abs() < 1e-6);
}

struct GatedWriter {
    release: mpsc::Receiver<()>,
}

impl SampleWriter for GatedWriter {
    fn begin(&mut self, _cfg: WriterConfig) -> ExportResult<()> {
        Ok(())
    }
    fn push_video(&mut self, _pts: MediaTime, _frame: &crate::media::sample::FrameBuffer) -> ExportResult<()> {
        self.release
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| ExportError::sink("gate timed out"))
    }
    fn push_audio(
        &mut self,
        _pts: MediaTime,
        _audio: &crate::media::sample::AudioBuffer,
    ) -> ExportResult<()> {
        Ok(())
    }
    fn end(&mut self) -> ExportResult<()> {
        Ok(())
    }
}

#[test]
fn readiness_returns_when_queue_drains() {
    let (release, gate_rx) = mpsc::channel();
    let sink = ThreadedSink::new(
        Path::new("unused"),
        FileType::Mp4,
        Box::new(GatedWriter { release: gate_rx }),
        ThreadedSinkOpts { queue_depth: 1 },
    );
    let mut input = sink.add_input(video_desc()).unwrap();
    assert!(sink.start_writing());

    let (tx, rx) = mpsc::channel();
    input.request_media_data_when_ready(Arc::new(move || {
        let _ = tx.send(());
    }));
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(input.append_sample(frame_at(0.0)));
    assert!(!input.is_ready_for_more_media_data());

    release.send(()).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(input.is_ready_for_more_media_data());

    input.mark_as_finished();
    finish(&sink);
    assert_eq!(sink.status(), WriterStatus::Completed);
}

#[test]
fn writer_failure_marks_sink_failed() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ThreadedSinkFactory::new(SampleLogWriterFactory {
        opts: SampleLogOpts {
            fail_after_samples: Some(0),
        },
        log: None,
    });
    let sink = factory
        .open_sink(&dir.path().join("out.jsonl"), FileType::Mp4)
        .unwrap();
    let mut input = sink.add_input(video_desc()).unwrap();
    assert!(sink.start_writing());

    let (tx, rx) = mpsc::channel();
    input.request_media_data_when_ready(Arc::new(move || {
        let _ = tx.send(());
    }));
    assert!(input.append_sample(frame_at(0.0)));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sink.status() != WriterStatus::Failed {
        assert!(std::time::Instant::now() < deadline, "sink never failed");
        let _ = rx.recv_timeout(Duration::from_millis(50));
    }
    assert!(matches!(sink.error().as_deref(), Some(ExportError::Sink(_))));
    assert!(input.is_ready_for_more_media_data());
    assert!(!input.append_sample(frame_at(0.1)));
}

#[test]
fn cancel_stops_writing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ThreadedSinkFactory::new(SampleLogWriterFactory::default());
    let sink = factory
        .open_sink(&dir.path().join("out.jsonl"), FileType::Mp4)
        .unwrap();
    let mut input = sink.add_input(video_desc()).unwrap();
    assert!(sink.start_writing());
    sink.cancel_writing();

    assert_eq!(sink.status(), WriterStatus::Cancelled);
    assert!(!input.append_sample(frame_at(0.0)));

    // Finishing a cancelled sink calls back inline.
    let called = Arc::new(AtomicBool::new(false));
    let c = called.clone();
    sink.finish_writing(Box::new(move || c.store(true, Ordering::SeqCst)));
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn input_compatibility() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ThreadedSinkFactory::new(SampleLogWriterFactory::default());
    let audio_only = factory
        .open_sink(&dir.path().join("a.jsonl"), FileType::M4a)
        .unwrap();
    assert!(!audio_only.can_add_input(&video_desc()));
    assert!(audio_only.add_input(video_desc()).is_err());
    assert!(audio_only.add_input(InputDesc::Audio { settings: None }).is_ok());
    assert!(!audio_only.can_add_input(&InputDesc::Audio { settings: None }));

    let sink = factory
        .open_sink(&dir.path().join("v.jsonl"), FileType::Mp4)
        .unwrap();
    assert!(sink.start_writing());
    assert!(!sink.can_add_input(&video_desc()));
    sink.cancel_writing();
}
