use super::*;
use crate::assets::synthetic::SyntheticAsset;
use crate::encode::threaded::ThreadedSinkFactory;
use crate::encode::writer::{SampleLog, SampleLogOpts, SampleLogWriterFactory};
use crate::foundation::core::Affine;
use std::sync::mpsc;
use std::time::Duration;

fn log_sinks(log: &SampleLog) -> Arc<dyn SinkFactory> {
    Arc::new(ThreadedSinkFactory::new(SampleLogWriterFactory {
        log: Some(log.clone()),
        ..SampleLogWriterFactory::default()
    }))
}

fn wait(session: &ExportSession) {
    let (tx, rx) = mpsc::channel();
    session.start(move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(20)).unwrap();
}

#[test]
fn writer_status_projection() {
    assert_eq!(
        ExportStatus::from(WriterStatus::Unknown),
        ExportStatus::Preparing
    );
    assert_eq!(
        ExportStatus::from(WriterStatus::Writing),
        ExportStatus::Exporting
    );
    assert_eq!(
        ExportStatus::from(WriterStatus::Cancelled),
        ExportStatus::Cancelled
    );
}

#[test]
fn default_config_exports_whole_asset_as_mp4() {
    let c = ExportConfig::default();
    assert!(c.output_url.is_none());
    assert_eq!(c.output_file_type, FileType::Mp4);
    assert!(c.time_range.is_unbounded());
    assert!(!c.should_optimize_for_network_use);
}

#[test]
fn compress_preset_configures_encoders() {
    let asset = Arc::new(SyntheticAsset::new(MediaTime::new(1, 1)));
    let session = ExportSession::compress(
        asset,
        log_sinks(&SampleLog::new()),
        Some(TimeRange::new(MediaTime::ZERO, MediaTime::new(1, 2))),
        Size::new(1280.0, 720.0),
        "out.mp4",
    )
    .unwrap();
    let c = session.config();
    assert_eq!(c.output_url.as_deref(), Some(Path::new("out.mp4")));
    assert_eq!(c.time_range.duration, Some(MediaTime::new(1, 2)));
    let v = c.video_settings.unwrap();
    assert_eq!(v.target_dims(), Some((1280, 720)));
    assert_eq!(v.average_bit_rate, Some(2_400_000));
    assert_eq!(c.audio_settings.unwrap().bit_rate, Some(128_000));
}

#[test]
fn tracks_rejected_by_the_sink_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let log = SampleLog::new();
    let asset = SyntheticAsset::new(MediaTime::new(1, 2))
        .with_video(Size::new(4.0, 4.0), Affine::IDENTITY, 10.0)
        .with_audio(800, 1)
        .with_audio_buffer_frames(100);
    let session = ExportSession::new(Arc::new(asset), log_sinks(&log)).unwrap();
    session.configure(|c| {
        c.output_url = Some(dir.path().join("audio.jsonl"));
        c.output_file_type = FileType::M4a;
    });
    wait(&session);

    assert_eq!(session.status(), ExportStatus::Completed);
    assert_eq!(log.count(MediaKind::Video), 0);
    assert_eq!(log.count(MediaKind::Audio), 4);
    assert_eq!(session.progress(), 1.0);
    assert!(session.last_video_presentation_time().is_none());
}

#[test]
fn asset_without_tracks_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let session = ExportSession::new(
        Arc::new(SyntheticAsset::new(MediaTime::new(1, 1))),
        log_sinks(&SampleLog::new()),
    )
    .unwrap();
    session.configure(|c| c.output_url = Some(dir.path().join("empty.jsonl")));
    wait(&session);
    assert_eq!(session.status(), ExportStatus::Completed);
    assert!(session.error().is_none());
}

#[test]
fn sink_failure_stops_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let sinks = Arc::new(ThreadedSinkFactory::new(SampleLogWriterFactory {
        opts: SampleLogOpts {
            fail_after_samples: Some(2),
        },
        log: None,
    }));
    let asset = SyntheticAsset::new(MediaTime::new(2, 1)).with_video(
        Size::new(4.0, 4.0),
        Affine::IDENTITY,
        30.0,
    );
    let session = ExportSession::new(Arc::new(asset), sinks).unwrap();
    session.configure(|c| c.output_url = Some(dir.path().join("fail.jsonl")));
    wait(&session);

    assert_eq!(session.status(), ExportStatus::Failed);
    let st = session.shared.state.lock();
    let run = st.run.as_ref().expect("failed run stays attached");
    assert_eq!(run.source.status(), ReaderStatus::Cancelled);
}

#[test]
fn complete_runs_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("once.jsonl");
    let asset = SyntheticAsset::new(MediaTime::new(1, 1)).with_video(
        Size::new(4.0, 4.0),
        Affine::IDENTITY,
        10.0,
    );
    let session = ExportSession::new(Arc::new(asset), log_sinks(&SampleLog::new())).unwrap();
    session.configure(|c| c.output_url = Some(url.clone()));
    let (tx, rx) = mpsc::channel();
    session.start(move || {
        let _ = tx.send(());
    });
    let run = session
        .shared
        .state
        .lock()
        .run
        .clone()
        .expect("run installed");
    run.cancel();
    rx.recv_timeout(Duration::from_secs(20)).unwrap();
    assert!(!url.exists());

    // A later file at the same location belongs to someone else.
    std::fs::write(&url, b"newer").unwrap();
    run.complete();
    run.abandon();
    assert_eq!(std::fs::read(&url).unwrap(), b"newer");
}
