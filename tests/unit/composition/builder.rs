use super::*;
use crate::foundation::core::{Point, Rect};

const EPS: f64 = 1e-6;

fn portrait_transform(coded_height: f64) -> Affine {
    // 90 degree rotation of a landscape-coded frame into portrait display space.
    Affine::new([0.0, 1.0, -1.0, 0.0, coded_height, 0.0])
}

/// Bounds of the coded frame after the layer transform and the encoder's render->target stretch.
fn content_in_target(coded: Size, comp: &VideoComposition, target: Size) -> Rect {
    let layer = comp.instructions[0].layers[0].transform;
    let stretch = Affine::scale_non_uniform(
        target.width / comp.render_size.width,
        target.height / comp.render_size.height,
    );
    let m = stretch * layer;
    let corners = [
        Point::new(0.0, 0.0),
        Point::new(coded.width, 0.0),
        Point::new(0.0, coded.height),
        Point::new(coded.width, coded.height),
    ]
    .map(|p| m * p);
    let mut r = Rect::from_points(corners[0], corners[1]);
    for p in &corners[2..] {
        r = r.union_pt(*p);
    }
    r
}

fn assert_fits_centered(content: Rect, target: Size) {
    assert!(content.x0 >= -EPS && content.y0 >= -EPS, "{content:?}");
    assert!(content.x1 <= target.width + EPS, "{content:?}");
    assert!(content.y1 <= target.height + EPS, "{content:?}");
    assert!((content.x0 - (target.width - content.x1)).abs() < EPS);
    assert!((content.y0 - (target.height - content.y1)).abs() < EPS);
    // Aspect fit touches both edges of at least one axis.
    let fills_w = (content.width() - target.width).abs() < EPS;
    let fills_h = (content.height() - target.height).abs() < EPS;
    assert!(fills_w || fills_h, "{content:?}");
}

#[test]
fn frame_rate_prefers_settings_then_track_then_default() {
    let track = AssetTrack::video(1, Size::new(640.0, 480.0), 25.0);
    let mut settings = VideoSettings::h264(320, 240);
    assert_eq!(resolve_frame_rate(&track, Some(&settings)), 25.0);
    settings.frame_rate = Some(24.0);
    assert_eq!(resolve_frame_rate(&track, Some(&settings)), 24.0);

    let unknown = AssetTrack::video(1, Size::new(640.0, 480.0), 0.0);
    assert_eq!(resolve_frame_rate(&unknown, None), DEFAULT_FRAME_RATE);
    assert_eq!(frame_duration_for(30.0), MediaTime::new(1, 30));
}

#[test]
fn pass_through_without_target_dimensions() {
    let t = Affine::translate((3.0, 4.0));
    let track = AssetTrack::video(7, Size::new(640.0, 480.0), 30.0).with_transform(t);
    let comp = build_default_composition(&track, None, MediaTime::new(5, 1));
    assert_eq!(comp.render_size, Size::new(640.0, 480.0));
    assert_eq!(comp.instructions.len(), 1);
    assert_eq!(
        comp.instructions[0].time_range,
        TimeRange::new(MediaTime::ZERO, MediaTime::new(5, 1))
    );
    assert_eq!(comp.instructions[0].layers[0].track_id, 7);
    assert_eq!(comp.instructions[0].layers[0].transform, t);
}

#[test]
fn landscape_into_smaller_same_aspect_fills_target() {
    let natural = Size::new(1920.0, 1080.0);
    let target = Size::new(1280.0, 720.0);
    let track = AssetTrack::video(1, natural, 30.0);
    let comp = build_default_composition(
        &track,
        Some(&VideoSettings::h264(1280, 720)),
        MediaTime::new(10, 1),
    );
    assert_eq!(comp.render_size, natural);
    let content = content_in_target(natural, &comp, target);
    assert_fits_centered(content, target);
    assert!((content.width() - 1280.0).abs() < EPS);
}

#[test]
fn wide_source_into_square_target_letterboxes() {
    let natural = Size::new(1920.0, 1080.0);
    let target = Size::new(720.0, 720.0);
    let track = AssetTrack::video(1, natural, 30.0);
    let comp =
        build_default_composition(&track, Some(&VideoSettings::h264(720, 720)), MediaTime::ZERO);
    let content = content_in_target(natural, &comp, target);
    assert_fits_centered(content, target);
    assert!((content.height() - 405.0).abs() < EPS);
    assert!((content.y0 - 157.5).abs() < EPS);
}

#[test]
fn rotated_source_swaps_render_size_and_pillarboxes() {
    let coded = Size::new(1920.0, 1080.0);
    let target = Size::new(1280.0, 720.0);
    let track = AssetTrack::video(1, coded, 30.0).with_transform(portrait_transform(1080.0));
    let comp =
        build_default_composition(&track, Some(&VideoSettings::h264(1280, 720)), MediaTime::ZERO);
    assert_eq!(comp.render_size, Size::new(1080.0, 1920.0));

    let content = content_in_target(coded, &comp, target);
    assert_fits_centered(content, target);
    assert!((content.width() - 405.0).abs() < EPS);
    assert!((content.x0 - 437.5).abs() < EPS);

    let ccw = AssetTrack::video(1, coded, 30.0)
        .with_transform(Affine::new([0.0, -1.0, 1.0, 0.0, 0.0, 1920.0]));
    let comp =
        build_default_composition(&ccw, Some(&VideoSettings::h264(1280, 720)), MediaTime::ZERO);
    assert_eq!(comp.render_size, Size::new(1080.0, 1920.0));
    assert_fits_centered(content_in_target(coded, &comp, target), target);
}

#[test]
fn sentinel_translation_is_ignored() {
    let natural = Size::new(640.0, 480.0);
    let target = Size::new(640.0, 480.0);
    let broken = Affine::new([1.0, 0.0, 0.0, 1.0, MALFORMED_TRANSLATION_SENTINEL, 0.0]);
    let (render, transform) = aspect_fit(natural, broken, target);
    assert_eq!(render, natural);
    let [.., e, f] = transform.as_coeffs();
    assert!(e.abs() < EPS && f.abs() < EPS);

    // Other offsets are kept as-is.
    let shifted = Affine::translate((-10.0, 0.0));
    let (_, transform) = aspect_fit(natural, shifted, target);
    assert!((transform.as_coeffs()[4] + 10.0).abs() < EPS);
}

#[test]
fn rotation_degrees_matches_quarter_turns() {
    assert!((rotation_degrees(portrait_transform(10.0)) - 90.0).abs() < EPS);
    assert!(rotation_degrees(Affine::IDENTITY).abs() < EPS);
    assert_eq!(
        oriented_size(Size::new(4.0, 2.0), Affine::rotate(std::f64::consts::PI)),
        Size::new(4.0, 2.0)
    );
}
