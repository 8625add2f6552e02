use crate::foundation::core::MediaKind;
use crate::foundation::time::MediaTime;

/// A decoded picture as RGBA8 pixels (straight alpha, tightly packed, row-major).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a transparent black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::byte_len(width, height)],
        }
    }

    /// Allocate a frame filled with one RGBA color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut frame = Self::new(width, height);
        frame.fill(rgba);
        frame
    }

    /// Byte length of a `width x height` RGBA8 frame.
    pub fn byte_len(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4)
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// RGBA of the pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let off = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(off..off + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Copy into an [`image::RgbaImage`], e.g. for PNG snapshots.
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Interleaved `f32` PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Interleaved samples, `frames * channels` long.
    pub interleaved: Vec<f32>,
}

impl AudioBuffer {
    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.interleaved.len() / self.channels as usize
        }
    }

    /// Playback length of the buffer.
    pub fn duration(&self) -> MediaTime {
        MediaTime::new(self.frames() as i64, self.sample_rate.max(1))
    }

    /// Little-endian byte view used by writers that spool raw PCM.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.interleaved.len() * 4);
        for s in &self.interleaved {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SamplePayload {
    Video(FrameBuffer),
    Audio(AudioBuffer),
}

/// One decoded sample as handed from a [`TrackOutput`](crate::media::pipeline::TrackOutput) to a
/// [`TrackInput`](crate::media::pipeline::TrackInput).
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Presentation timestamp on the asset timeline.
    pub pts: MediaTime,
    /// Sample duration.
    pub duration: MediaTime,
    pub payload: SamplePayload,
}

impl Sample {
    pub fn video(pts: MediaTime, duration: MediaTime, frame: FrameBuffer) -> Self {
        Self {
            pts,
            duration,
            payload: SamplePayload::Video(frame),
        }
    }

    pub fn audio(pts: MediaTime, buffer: AudioBuffer) -> Self {
        Self {
            pts,
            duration: buffer.duration(),
            payload: SamplePayload::Audio(buffer),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            SamplePayload::Video(_) => MediaKind::Video,
            SamplePayload::Audio(_) => MediaKind::Audio,
        }
    }

    /// The decoded picture, for video samples.
    pub fn image_buffer(&self) -> Option<&FrameBuffer> {
        match &self.payload {
            SamplePayload::Video(frame) => Some(frame),
            SamplePayload::Audio(_) => None,
        }
    }

    /// Raw payload bytes (RGBA8 or `f32le` PCM).
    pub fn payload_bytes(&self) -> std::borrow::Cow<'_, [u8]> {
        match &self.payload {
            SamplePayload::Video(frame) => std::borrow::Cow::Borrowed(&frame.data),
            SamplePayload::Audio(buffer) => std::borrow::Cow::Owned(buffer.to_le_bytes()),
        }
    }
}
