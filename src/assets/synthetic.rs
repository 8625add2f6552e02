use std::sync::Arc;

use parking_lot::Mutex;

use crate::composition::VideoComposition;
use crate::foundation::core::{Affine, MediaKind, Size, pixel_dims};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::{MediaTime, TimeRange};
use crate::media::asset::{Asset, AssetTrack};
use crate::media::pipeline::{MediaSource, OutputDesc, ReaderStatus, TrackOutput};
use crate::media::sample::{AudioBuffer, FrameBuffer, Sample};
use crate::settings::AudioMix;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq)]
struct AudioFormat {
    sample_rate: u32,
    channels: u16,
    frames_per_buffer: u32,
}

/// Deterministic in-memory asset.
///
/// Video frame `i` (counted from the reading range start) is uniform: every byte equals
/// [`SyntheticAsset::frame_pattern`]`(i)`. Audio is a 440 Hz tone scaled by the mix volume.
#[derive(Clone, Debug)]
pub struct SyntheticAsset {
    duration: MediaTime,
    tracks: Vec<AssetTrack>,
    audio: Option<AudioFormat>,
    open_error: Option<String>,
    fail_after_samples: Option<u64>,
}

impl SyntheticAsset {
    pub fn new(duration: MediaTime) -> Self {
        Self {
            duration,
            tracks: Vec::new(),
            audio: None,
            open_error: None,
            fail_after_samples: None,
        }
    }

    fn next_track_id(&self) -> u32 {
        self.tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1
    }

    /// Add a video track.
    pub fn with_video(mut self, natural_size: Size, transform: Affine, frame_rate: f32) -> Self {
        let id = self.next_track_id();
        self.tracks
            .push(AssetTrack::video(id, natural_size, frame_rate).with_transform(transform));
        self
    }

    /// Add an audio track producing 1024-frame buffers.
    pub fn with_audio(mut self, sample_rate: u32, channels: u16) -> Self {
        let id = self.next_track_id();
        self.tracks.push(AssetTrack::audio(id));
        self.audio = Some(AudioFormat {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            frames_per_buffer: 1024,
        });
        self
    }

    pub fn with_audio_buffer_frames(mut self, frames: u32) -> Self {
        if let Some(fmt) = self.audio.as_mut() {
            fmt.frames_per_buffer = frames.max(1);
        }
        self
    }

    /// Make [`Asset::open_source`] fail with `msg`.
    pub fn failing_open(mut self, msg: impl Into<String>) -> Self {
        self.open_error = Some(msg.into());
        self
    }

    /// Make the source fail once `n` samples have been read across all outputs.
    pub fn fail_after_samples(mut self, n: u64) -> Self {
        self.fail_after_samples = Some(n);
        self
    }

    /// Byte value filling video frame `index`.
    pub fn frame_pattern(index: u64) -> u8 {
        (index % 251) as u8
    }
}

impl Asset for SyntheticAsset {
    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn tracks(&self) -> &[AssetTrack] {
        &self.tracks
    }

    fn open_source(&self) -> ExportResult<Arc<dyn MediaSource>> {
        if let Some(msg) = &self.open_error {
            return Err(ExportError::source(msg.clone()));
        }
        Ok(Arc::new(SyntheticSource {
            shared: Arc::new(SourceShared {
                asset: self.clone(),
                state: Mutex::new(SourceState {
                    status: ReaderStatus::Unknown,
                    error: None,
                    range: TimeRange::FULL,
                    kinds: Vec::new(),
                    open_outputs: 0,
                    read: 0,
                }),
            }),
        }))
    }
}

struct SourceState {
    status: ReaderStatus,
    error: Option<Arc<ExportError>>,
    range: TimeRange,
    kinds: Vec<MediaKind>,
    open_outputs: usize,
    read: u64,
}

struct SourceShared {
    asset: SyntheticAsset,
    state: Mutex<SourceState>,
}

impl SourceShared {
    /// Account for one sample about to be produced. Returns `false` when reading must stop.
    fn admit(&self) -> bool {
        let mut st = self.state.lock();
        if st.status != ReaderStatus::Reading {
            return false;
        }
        if let Some(limit) = self.asset.fail_after_samples
            && st.read >= limit
        {
            tracing::debug!(limit, "synthetic source failing");
            st.status = ReaderStatus::Failed;
            st.error = Some(Arc::new(ExportError::source(format!(
                "synthetic source failed after {limit} samples"
            ))));
            return false;
        }
        st.read += 1;
        true
    }

    fn output_exhausted(&self) {
        let mut st = self.state.lock();
        st.open_outputs = st.open_outputs.saturating_sub(1);
        if st.open_outputs == 0 && st.status == ReaderStatus::Reading {
            st.status = ReaderStatus::Completed;
        }
    }
}

/// [`MediaSource`] over a [`SyntheticAsset`].
pub struct SyntheticSource {
    shared: Arc<SourceShared>,
}

impl MediaSource for SyntheticSource {
    fn status(&self) -> ReaderStatus {
        self.shared.state.lock().status
    }

    fn error(&self) -> Option<Arc<ExportError>> {
        self.shared.state.lock().error.clone()
    }

    fn set_time_range(&self, range: TimeRange) {
        self.shared.state.lock().range = range;
    }

    fn can_add_output(&self, desc: &OutputDesc) -> bool {
        let st = self.shared.state.lock();
        if st.status != ReaderStatus::Unknown || st.kinds.contains(&desc.kind()) {
            return false;
        }
        match desc {
            OutputDesc::Video {
                tracks,
                composition,
            } => !tracks.is_empty() && composition.validate().is_ok(),
            OutputDesc::Audio { tracks, .. } => {
                !tracks.is_empty() && self.shared.asset.audio.is_some()
            }
        }
    }

    fn add_output(&self, desc: OutputDesc) -> ExportResult<Box<dyn TrackOutput>> {
        if !self.can_add_output(&desc) {
            return Err(ExportError::source(format!(
                "cannot add {} output",
                desc.kind()
            )));
        }
        let mut st = self.shared.state.lock();
        st.kinds.push(desc.kind());
        st.open_outputs += 1;
        let shared = self.shared.clone();
        Ok(match desc {
            OutputDesc::Video { composition, .. } => Box::new(SyntheticVideoOutput {
                shared,
                composition,
                next: 0,
                done: false,
            }),
            OutputDesc::Audio { tracks, mix } => {
                let volume = audio_volume(&tracks, mix.as_ref());
                Box::new(SyntheticAudioOutput {
                    shared,
                    volume,
                    next_frame: 0,
                    done: false,
                })
            }
        })
    }

    fn start_reading(&self) -> bool {
        let mut st = self.shared.state.lock();
        if st.status != ReaderStatus::Unknown {
            return false;
        }
        st.status = if st.open_outputs == 0 {
            ReaderStatus::Completed
        } else {
            ReaderStatus::Reading
        };
        true
    }

    fn cancel_reading(&self) {
        let mut st = self.shared.state.lock();
        if matches!(st.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            st.status = ReaderStatus::Cancelled;
        }
    }
}

fn audio_volume(tracks: &[AssetTrack], mix: Option<&AudioMix>) -> f32 {
    let Some(mix) = mix else {
        return 1.0;
    };
    tracks
        .iter()
        .map(|t| mix.volume_for(t.track_id))
        .fold(0.0, f32::max)
}

struct SyntheticVideoOutput {
    shared: Arc<SourceShared>,
    composition: VideoComposition,
    next: u64,
    done: bool,
}

impl TrackOutput for SyntheticVideoOutput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn copy_next_sample(&mut self) -> Option<Sample> {
        if self.done {
            return None;
        }
        let range = self.shared.state.lock().range;
        let end = range.end_within(self.shared.asset.duration);
        let fd = self.composition.frame_duration;
        let offset = i64::try_from(self.next)
            .ok()
            .and_then(|n| n.checked_mul(fd.value))
            .map(|v| MediaTime::new(v, fd.timescale));
        let pts = match offset {
            Some(offset) if range.start + offset < end => range.start + offset,
            _ => {
                self.done = true;
                self.shared.output_exhausted();
                return None;
            }
        };
        if !self.shared.admit() {
            return None;
        }
        let (w, h) = pixel_dims(self.composition.render_size);
        let frame = FrameBuffer {
            width: w,
            height: h,
            data: vec![SyntheticAsset::frame_pattern(self.next); FrameBuffer::byte_len(w, h)],
        };
        self.next += 1;
        Some(Sample::video(pts, fd, frame))
    }
}

struct SyntheticAudioOutput {
    shared: Arc<SourceShared>,
    volume: f32,
    next_frame: u64,
    done: bool,
}

impl TrackOutput for SyntheticAudioOutput {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn copy_next_sample(&mut self) -> Option<Sample> {
        if self.done {
            return None;
        }
        let fmt = self.shared.asset.audio?;
        let range = self.shared.state.lock().range;
        let end = range.end_within(self.shared.asset.duration);
        let total = ((end - range.start).seconds() * f64::from(fmt.sample_rate))
            .round()
            .max(0.0) as u64;
        if self.next_frame >= total {
            self.done = true;
            self.shared.output_exhausted();
            return None;
        }
        if !self.shared.admit() {
            return None;
        }

        let frames = (total - self.next_frame).min(u64::from(fmt.frames_per_buffer));
        let channels = usize::from(fmt.channels);
        let rate = f64::from(fmt.sample_rate);
        let mut interleaved = Vec::with_capacity(frames as usize * channels);
        for i in 0..frames {
            let t = (self.next_frame + i) as f64 / rate;
            let v = (TONE_AMPLITUDE * (std::f64::consts::TAU * TONE_HZ * t).sin()) as f32
                * self.volume;
            interleaved.extend(std::iter::repeat_n(v, channels));
        }

        let pts = range.start
            + MediaTime::new(
                i64::try_from(self.next_frame).unwrap_or(i64::MAX),
                fmt.sample_rate,
            );
        self.next_frame += frames;
        Some(Sample::audio(
            pts,
            AudioBuffer {
                sample_rate: fmt.sample_rate,
                channels: fmt.channels,
                interleaved,
            },
        ))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/synthetic.rs"]
mod tests;
