use crate::encode::pool::{PixelBufferAdaptor, PooledFrame};
use crate::foundation::core::MediaKind;
use crate::foundation::time::MediaTime;
use crate::media::pipeline::{MediaSink, MediaSource, ReaderStatus, TrackInput, TrackOutput, WriterStatus};
use crate::media::sample::FrameBuffer;

/// Caller hook receiving every decoded video frame.
///
/// `presentation_time` is relative to the export range start. `render_buffer` is a pool buffer at
/// the composition render size; return it (or any pool frame) filled with the replacement, or
/// `None` to keep the original frame.
///
/// A replacement is appended at the decoded sample's absolute presentation time, the same
/// timebase as the original frames; the sink session starts at the range start, so both land at
/// the same output position.
pub trait FrameInterceptor: Send + Sync {
    fn intercept_frame(
        &self,
        frame: &FrameBuffer,
        presentation_time: MediaTime,
        render_buffer: PooledFrame,
    ) -> Option<PooledFrame>;
}

impl<F> FrameInterceptor for F
where
    F: Fn(&FrameBuffer, MediaTime, PooledFrame) -> Option<PooledFrame> + Send + Sync,
{
    fn intercept_frame(
        &self,
        frame: &FrameBuffer,
        presentation_time: MediaTime,
        render_buffer: PooledFrame,
    ) -> Option<PooledFrame> {
        self(frame, presentation_time, render_buffer)
    }
}

/// Everything one pump step reads besides the track pair itself.
pub struct PumpContext<'a> {
    pub source: &'a dyn MediaSource,
    pub sink: &'a dyn MediaSink,
    pub range_start: MediaTime,
    /// Length of the exported range; progress is measured against it.
    pub duration: MediaTime,
    pub interceptor: Option<&'a dyn FrameInterceptor>,
    /// This track's timestamps drive progress.
    pub drives_progress: bool,
    /// Receives `(kind, relative time, progress)` for progress-driving samples.
    pub report: &'a dyn Fn(MediaKind, MediaTime, f32),
}

/// Fraction of `duration` covered at `elapsed`, clamped to `[0, 1]`. A zero duration is complete.
pub fn progress_for(elapsed: MediaTime, duration: MediaTime) -> f32 {
    let total = duration.seconds();
    if total <= 0.0 {
        return 1.0;
    }
    (elapsed.seconds() / total).clamp(0.0, 1.0) as f32
}

/// Move samples from `output` to `input` while the input has capacity.
///
/// Returns `true` when the input ran out of capacity (pump again on the next readiness
/// notification) and `false` when this track is done: end of stream, a pipeline that left the
/// reading/writing state, or a rejected append.
pub fn encode_ready_samples(
    ctx: &PumpContext<'_>,
    output: &mut dyn TrackOutput,
    input: &mut dyn TrackInput,
    adaptor: Option<&PixelBufferAdaptor>,
) -> bool {
    while input.is_ready_for_more_media_data() {
        let Some(sample) = output.copy_next_sample() else {
            input.mark_as_finished();
            return false;
        };
        if ctx.source.status() != ReaderStatus::Reading
            || ctx.sink.status() != WriterStatus::Writing
        {
            return false;
        }

        let kind = sample.kind();
        let relative = sample.pts - ctx.range_start;
        if ctx.drives_progress {
            (ctx.report)(kind, relative, progress_for(relative, ctx.duration));
        }

        let replaced = if kind == MediaKind::Video
            && let Some(interceptor) = ctx.interceptor
            && let Some(adaptor) = adaptor
            && let Some(frame) = sample.image_buffer()
            && let Some(buffer) = adaptor.allocate_render_buffer()
        {
            interceptor
                .intercept_frame(frame, relative, buffer)
                .map(|replacement| adaptor.append(input, replacement, sample.pts))
        } else {
            None
        };

        let appended = match replaced {
            Some(ok) => ok,
            None => input.append_sample(sample),
        };
        if !appended {
            tracing::debug!(kind = %kind, "append rejected");
            return false;
        }
    }
    true
}

#[cfg(test)]
#[path = "../../tests/unit/session/pump.rs"]
mod tests;
