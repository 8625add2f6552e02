use super::*;
use crate::composition::builder::build_default_composition;
use crate::settings::AudioMixParams;

fn sample_asset() -> SyntheticAsset {
    SyntheticAsset::new(MediaTime::new(1, 1))
        .with_video(Size::new(8.0, 4.0), Affine::IDENTITY, 10.0)
        .with_audio(1000, 2)
        .with_audio_buffer_frames(256)
}

fn video_output(asset: &SyntheticAsset, source: &dyn MediaSource) -> Box<dyn TrackOutput> {
    let tracks = asset.tracks_with_kind(MediaKind::Video);
    let composition = build_default_composition(&tracks[0], None, asset.duration());
    source
        .add_output(OutputDesc::Video {
            tracks,
            composition,
        })
        .unwrap()
}

#[test]
fn video_frames_follow_frame_duration() {
    let asset = sample_asset();
    let source = asset.open_source().unwrap();
    let mut out = video_output(&asset, source.as_ref());
    assert!(source.start_reading());

    let mut pts = Vec::new();
    while let Some(s) = out.copy_next_sample() {
        let frame = s.image_buffer().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data[0], SyntheticAsset::frame_pattern(pts.len() as u64));
        pts.push(s.pts.seconds());
    }
    assert_eq!(pts.len(), 10);
    assert!((pts[9] - 0.9).abs() < 1e-9);
    assert_eq!(source.status(), ReaderStatus::Completed);
}

#[test]
fn time_range_limits_both_tracks() {
    let asset = sample_asset();
    let source = asset.open_source().unwrap();
    source.set_time_range(TimeRange::new(
        MediaTime::new(1, 2),
        MediaTime::new(1, 5),
    ));
    let mut video = video_output(&asset, source.as_ref());
    let mut audio = source
        .add_output(OutputDesc::Audio {
            tracks: asset.tracks_with_kind(MediaKind::Audio),
            mix: None,
        })
        .unwrap();
    assert!(source.start_reading());

    let first = video.copy_next_sample().unwrap();
    assert_eq!(first.pts, MediaTime::new(1, 2));
    assert_eq!(std::iter::from_fn(|| video.copy_next_sample()).count(), 1);

    let mut frames = 0;
    while let Some(s) = audio.copy_next_sample() {
        assert!(s.pts >= MediaTime::new(1, 2));
        if let crate::media::sample::SamplePayload::Audio(buf) = &s.payload {
            frames += buf.frames();
        }
    }
    assert_eq!(frames, 200);
    assert_eq!(source.status(), ReaderStatus::Completed);
}

#[test]
fn mix_volume_scales_audio() {
    let asset = sample_asset();
    let audio_id = asset.tracks_with_kind(MediaKind::Audio)[0].track_id;
    let source = asset.open_source().unwrap();
    let mut out = source
        .add_output(OutputDesc::Audio {
            tracks: asset.tracks_with_kind(MediaKind::Audio),
            mix: Some(AudioMix {
                params: vec![AudioMixParams {
                    track_id: audio_id,
                    volume: 0.0,
                }],
            }),
        })
        .unwrap();
    assert!(source.start_reading());
    let s = out.copy_next_sample().unwrap();
    let crate::media::sample::SamplePayload::Audio(buf) = &s.payload else {
        panic!("expected audio");
    };
    assert!(buf.interleaved.iter().all(|v| *v == 0.0));
}

#[test]
fn failures_and_cancellation() {
    let failing = SyntheticAsset::new(MediaTime::new(1, 1)).failing_open("unreadable");
    assert!(matches!(
        failing.open_source().err(),
        Some(ExportError::Source(_))
    ));

    let asset = sample_asset().fail_after_samples(2);
    let source = asset.open_source().unwrap();
    let mut out = video_output(&asset, source.as_ref());
    assert!(source.start_reading());
    assert!(out.copy_next_sample().is_some());
    assert!(out.copy_next_sample().is_some());
    assert!(out.copy_next_sample().is_none());
    assert_eq!(source.status(), ReaderStatus::Failed);
    assert!(source.error().is_some());

    let asset = sample_asset();
    let source = asset.open_source().unwrap();
    let mut out = video_output(&asset, source.as_ref());
    assert!(source.start_reading());
    source.cancel_reading();
    assert!(out.copy_next_sample().is_none());
    assert_eq!(source.status(), ReaderStatus::Cancelled);
}

#[test]
fn outputs_added_once_before_reading() {
    let asset = sample_asset();
    let source = asset.open_source().unwrap();
    let _video = video_output(&asset, source.as_ref());
    let tracks = asset.tracks_with_kind(MediaKind::Video);
    let again = OutputDesc::Video {
        composition: build_default_composition(&tracks[0], None, asset.duration()),
        tracks,
    };
    assert!(!source.can_add_output(&again));

    let audio_only = SyntheticAsset::new(MediaTime::new(1, 1));
    let source = audio_only.open_source().unwrap();
    assert!(!source.can_add_output(&OutputDesc::Audio {
        tracks: vec![],
        mix: None,
    }));
}
