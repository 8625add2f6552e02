use crate::composition::{CompositionInstruction, LayerInstruction, VideoComposition};
use crate::foundation::core::{Affine, Size};
use crate::foundation::time::{DEFAULT_TIMESCALE, MediaTime, TimeRange};
use crate::media::asset::AssetTrack;
use crate::settings::VideoSettings;

/// Frame rate used when neither the settings nor the track provide one.
pub const DEFAULT_FRAME_RATE: f32 = 30.0;

/// Translation value some encoders write into rotated-track transforms by mistake.
///
/// Any translation component equal to this value is zeroed before fitting. This is a workaround
/// for one family of malformed files, not a geometric rule; review before extending it.
pub const MALFORMED_TRANSLATION_SENTINEL: f64 = -560.0;

const RIGHT_ANGLE_TOLERANCE_DEG: f64 = 1e-6;

/// Frame rate for the output: settings, then the track's nominal rate, then 30.
pub fn resolve_frame_rate(track: &AssetTrack, settings: Option<&VideoSettings>) -> f32 {
    settings
        .and_then(VideoSettings::effective_frame_rate)
        .or_else(|| {
            let r = track.nominal_frame_rate;
            (r.is_finite() && r > 0.0).then_some(r)
        })
        .unwrap_or(DEFAULT_FRAME_RATE)
}

/// `1 / frame_rate` on the 90 kHz timescale.
pub fn frame_duration_for(frame_rate: f32) -> MediaTime {
    MediaTime::from_seconds(1.0 / f64::from(frame_rate), DEFAULT_TIMESCALE)
}

/// Rotation encoded by `transform`, in degrees (`atan2(b, a)`).
pub fn rotation_degrees(transform: Affine) -> f64 {
    let [a, b, ..] = transform.as_coeffs();
    b.atan2(a).to_degrees()
}

fn is_quarter_turn(degrees: f64) -> bool {
    (degrees.abs() - 90.0).abs() < RIGHT_ANGLE_TOLERANCE_DEG
}

fn sanitize_translation(transform: Affine) -> Affine {
    let [a, b, c, d, mut e, mut f] = transform.as_coeffs();
    if e == MALFORMED_TRANSLATION_SENTINEL {
        e = 0.0;
    }
    if f == MALFORMED_TRANSLATION_SENTINEL {
        f = 0.0;
    }
    Affine::new([a, b, c, d, e, f])
}

/// Display-space size of a track: the natural size, swapped for quarter-turn rotations.
pub fn oriented_size(natural: Size, transform: Affine) -> Size {
    if is_quarter_turn(rotation_degrees(transform)) {
        Size::new(natural.height, natural.width)
    } else {
        natural
    }
}

/// Render size and layer transform fitting a track into `target` without cropping.
///
/// Frames are rendered at the oriented natural size and the encoder stretches them to `target`,
/// so the fit is pre-compensated per axis: after that stretch the content is uniformly scaled by
/// `min(tw / nw, th / nh)` and centered (letterbox or pillarbox).
pub fn aspect_fit(natural: Size, preferred: Affine, target: Size) -> (Size, Affine) {
    let transform = sanitize_translation(preferred);
    let natural = oriented_size(natural, transform);

    let x_ratio = target.width / natural.width;
    let y_ratio = target.height / natural.height;
    let ratio = x_ratio.min(y_ratio);

    let post_width = natural.width * ratio;
    let post_height = natural.height * ratio;
    let trans_x = (target.width - post_width) / 2.0;
    let trans_y = (target.height - post_height) / 2.0;

    let fit = Affine::translate((trans_x / x_ratio, trans_y / y_ratio))
        * Affine::scale_non_uniform(ratio / x_ratio, ratio / y_ratio);
    (natural, fit * transform)
}

/// Synthesize the composition used when the caller supplies none.
///
/// Without target dimensions this is a pass-through of the track at its natural size.
#[tracing::instrument(level = "debug", skip(track, settings), fields(track_id = track.track_id))]
pub fn build_default_composition(
    track: &AssetTrack,
    settings: Option<&VideoSettings>,
    asset_duration: MediaTime,
) -> VideoComposition {
    let frame_rate = resolve_frame_rate(track, settings);
    let frame_duration = frame_duration_for(frame_rate);

    let (render_size, transform) = match settings.and_then(VideoSettings::target_dims) {
        Some((w, h)) => aspect_fit(
            track.natural_size,
            track.preferred_transform,
            Size::new(f64::from(w), f64::from(h)),
        ),
        None => (track.natural_size, track.preferred_transform),
    };
    tracing::debug!(
        frame_rate,
        render_w = render_size.width,
        render_h = render_size.height,
        "built default video composition"
    );

    VideoComposition {
        render_size,
        frame_duration,
        instructions: vec![CompositionInstruction {
            time_range: TimeRange::new(MediaTime::ZERO, asset_duration),
            layers: vec![LayerInstruction {
                track_id: track.track_id,
                transform,
            }],
        }],
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composition/builder.rs"]
mod tests;
