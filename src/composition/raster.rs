use crate::composition::VideoComposition;
use crate::foundation::core::{Affine, Point, pixel_dims};
use crate::foundation::time::MediaTime;
use crate::media::sample::FrameBuffer;

/// Opaque black, used for letterbox/pillarbox bars.
pub const BACKGROUND_RGBA: [u8; 4] = [0, 0, 0, 255];

/// Render `src` through `transform` into a `width x height` frame (nearest-neighbor).
///
/// Pixels that map outside `src` keep [`BACKGROUND_RGBA`]. A non-invertible transform yields a
/// background-only frame.
pub fn render_layer(src: &FrameBuffer, transform: Affine, width: u32, height: u32) -> FrameBuffer {
    let mut dst = FrameBuffer::filled(width, height, BACKGROUND_RGBA);
    render_layer_into(&mut dst, src, transform);
    dst
}

/// Like [`render_layer`], drawing over an existing frame.
pub fn render_layer_into(dst: &mut FrameBuffer, src: &FrameBuffer, transform: Affine) {
    if transform.determinant().abs() < f64::EPSILON || src.width == 0 || src.height == 0 {
        return;
    }
    let inv = transform.inverse();
    let [ia, ib, ..] = inv.as_coeffs();
    let src_w = src.width as f64;
    let src_h = src.height as f64;
    let src_stride = src.width as usize * 4;
    let dst_stride = dst.width as usize * 4;

    for y in 0..dst.height {
        // Sample at pixel centers; step along the row with the inverse's linear part.
        let mut p = inv * Point::new(0.5, f64::from(y) + 0.5);
        let row = &mut dst.data[y as usize * dst_stride..(y as usize + 1) * dst_stride];
        for px in row.chunks_exact_mut(4) {
            if p.x >= 0.0 && p.y >= 0.0 && p.x < src_w && p.y < src_h {
                let off = p.y as usize * src_stride + p.x as usize * 4;
                px.copy_from_slice(&src.data[off..off + 4]);
            }
            p.x += ia;
            p.y += ib;
        }
    }
}

/// Render the output frame for `track_id` at `t` according to `composition`.
pub fn compose_frame(
    composition: &VideoComposition,
    track_id: u32,
    t: MediaTime,
    src: &FrameBuffer,
) -> FrameBuffer {
    let (w, h) = pixel_dims(composition.render_size);
    render_layer(src, composition.layer_transform(track_id, t), w, h)
}

#[cfg(test)]
#[path = "../../tests/unit/composition/raster.rs"]
mod tests;
