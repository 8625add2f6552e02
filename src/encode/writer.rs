use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::foundation::core::{MediaKind, Size, pixel_dims};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::payload_digest;
use crate::foundation::time::MediaTime;
use crate::media::sample::{AudioBuffer, FrameBuffer};
use crate::settings::{AudioSettings, FileType, MetadataItem, VideoSettings};

/// Configuration handed to a [`SampleWriter`] when writing starts.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Output file.
    pub url: PathBuf,
    pub file_type: FileType,
    pub video: Option<VideoTrackConfig>,
    pub audio: Option<AudioTrackConfig>,
    pub metadata: Vec<MetadataItem>,
    pub optimize_for_network_use: bool,
}

#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub settings: Option<VideoSettings>,
    /// Size of appended frames.
    pub render_size: Size,
    pub frame_duration: MediaTime,
}

impl VideoTrackConfig {
    /// Encoded frame size: the target size from the settings, else the render size.
    pub fn output_dims(&self) -> (u32, u32) {
        self.settings
            .as_ref()
            .and_then(VideoSettings::target_dims)
            .unwrap_or_else(|| pixel_dims(self.render_size))
    }
}

#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    pub settings: Option<AudioSettings>,
}

/// Encoder/muxer contract driven by a [`ThreadedSink`](crate::encode::threaded::ThreadedSink).
///
/// Ordering contract: calls happen on one thread; per track, samples arrive in presentation order
/// with timestamps relative to the sink session start.
pub trait SampleWriter: Send {
    /// Called once before any sample is pushed.
    fn begin(&mut self, cfg: WriterConfig) -> ExportResult<()>;
    fn push_video(&mut self, pts: MediaTime, frame: &FrameBuffer) -> ExportResult<()>;
    fn push_audio(&mut self, pts: MediaTime, audio: &AudioBuffer) -> ExportResult<()>;
    /// Flush and close the output. Called at most once, after the last sample.
    fn end(&mut self) -> ExportResult<()>;
    /// Stop without finalizing; the output file may be left partial.
    fn abort(&mut self) {}
}

/// Creates one [`SampleWriter`] per output location.
pub trait SampleWriterFactory: Send + Sync {
    fn create_writer(&self, url: &Path, file_type: FileType)
    -> ExportResult<Box<dyn SampleWriter>>;
}

/// One line of a sample log.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogLine {
    Header {
        file_type: FileType,
        video: Option<[u32; 2]>,
        audio: bool,
        metadata: Vec<MetadataItem>,
        optimize_for_network_use: bool,
    },
    Sample(SampleRecord),
    Footer {
        samples: u64,
    },
}

/// Digest of one written sample.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SampleRecord {
    pub kind: MediaKind,
    /// Seconds since the sink session start.
    pub pts: f64,
    pub bytes: usize,
    pub digest: u64,
}

/// Shared view of the records written by a [`SampleLogWriter`].
#[derive(Debug, Clone, Default)]
pub struct SampleLog(Arc<Mutex<Vec<SampleRecord>>>);

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SampleRecord> {
        self.0.lock().clone()
    }

    pub fn count(&self, kind: MediaKind) -> usize {
        self.0.lock().iter().filter(|r| r.kind == kind).count()
    }

    fn push(&self, record: SampleRecord) {
        self.0.lock().push(record);
    }

    fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleLogOpts {
    /// Fail the push after this many samples, simulating an encoder failure.
    pub fail_after_samples: Option<u64>,
}

/// Diagnostics writer: records a JSON-lines digest of every sample instead of encoding.
pub struct SampleLogWriter {
    opts: SampleLogOpts,
    log: Option<SampleLog>,
    out: Option<BufWriter<File>>,
    written: u64,
}

impl SampleLogWriter {
    pub fn new(opts: SampleLogOpts) -> Self {
        Self {
            opts,
            log: None,
            out: None,
            written: 0,
        }
    }

    /// Mirror every record into `log`.
    pub fn with_log(mut self, log: SampleLog) -> Self {
        self.log = Some(log);
        self
    }

    fn write_line(&mut self, line: &LogLine) -> ExportResult<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| ExportError::sink("sample log writer not started"))?;
        serde_json::to_writer(&mut *out, line)
            .map_err(|e| ExportError::sink(format!("sample log encode failed: {e}")))?;
        out.write_all(b"\n")
            .context("failed to write sample log line")?;
        Ok(())
    }

    fn record(&mut self, kind: MediaKind, pts: MediaTime, bytes: &[u8]) -> ExportResult<()> {
        if let Some(limit) = self.opts.fail_after_samples
            && self.written >= limit
        {
            return Err(ExportError::sink(format!(
                "sample log writer failed after {limit} samples"
            )));
        }
        let record = SampleRecord {
            kind,
            pts: pts.seconds(),
            bytes: bytes.len(),
            digest: payload_digest(bytes),
        };
        self.write_line(&LogLine::Sample(record.clone()))?;
        if let Some(log) = &self.log {
            log.push(record);
        }
        self.written += 1;
        Ok(())
    }
}

impl SampleWriter for SampleLogWriter {
    fn begin(&mut self, cfg: WriterConfig) -> ExportResult<()> {
        ensure_parent_dir(&cfg.url)?;
        let file = File::create(&cfg.url)
            .with_context(|| format!("failed to create sample log '{}'", cfg.url.display()))?;
        self.out = Some(BufWriter::new(file));
        self.written = 0;
        if let Some(log) = &self.log {
            log.clear();
        }
        self.write_line(&LogLine::Header {
            file_type: cfg.file_type,
            video: cfg.video.as_ref().map(|v| {
                let (w, h) = v.output_dims();
                [w, h]
            }),
            audio: cfg.audio.is_some(),
            metadata: cfg.metadata,
            optimize_for_network_use: cfg.optimize_for_network_use,
        })
    }

    fn push_video(&mut self, pts: MediaTime, frame: &FrameBuffer) -> ExportResult<()> {
        self.record(MediaKind::Video, pts, &frame.data)
    }

    fn push_audio(&mut self, pts: MediaTime, audio: &AudioBuffer) -> ExportResult<()> {
        self.record(MediaKind::Audio, pts, &audio.to_le_bytes())
    }

    fn end(&mut self) -> ExportResult<()> {
        let samples = self.written;
        self.write_line(&LogLine::Footer { samples })?;
        let mut out = self
            .out
            .take()
            .ok_or_else(|| ExportError::sink("sample log writer not started"))?;
        out.flush().context("failed to flush sample log")?;
        Ok(())
    }

    fn abort(&mut self) {
        self.out = None;
    }
}

/// Factory for [`SampleLogWriter`]s.
#[derive(Debug, Clone, Default)]
pub struct SampleLogWriterFactory {
    pub opts: SampleLogOpts,
    /// Shared log mirrored by every writer this factory creates.
    pub log: Option<SampleLog>,
}

impl SampleWriterFactory for SampleLogWriterFactory {
    fn create_writer(
        &self,
        url: &Path,
        _file_type: FileType,
    ) -> ExportResult<Box<dyn SampleWriter>> {
        if url.is_dir() {
            return Err(ExportError::sink(format!(
                "output location '{}' is a directory",
                url.display()
            )));
        }
        let mut writer = SampleLogWriter::new(self.opts);
        if let Some(log) = &self.log {
            writer = writer.with_log(log.clone());
        }
        Ok(Box::new(writer))
    }
}

/// Parse a sample log file back into lines.
pub fn read_sample_log(path: &Path) -> ExportResult<Vec<LogLine>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sample log '{}'", path.display()))?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| ExportError::validation(format!("bad sample log line: {e}")))
        })
        .collect()
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> ExportResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/encode/writer.rs"]
mod tests;
