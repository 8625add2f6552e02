use std::fs::File;
use std::io::{BufWriter, Read, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use crate::encode::writer::{SampleWriter, SampleWriterFactory, WriterConfig, ensure_parent_dir};
use crate::foundation::core::pixel_dims;
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::MediaTime;
use crate::media::sample::{AudioBuffer, FrameBuffer};
use crate::settings::{AudioSettings, FileType, VideoCodec, VideoSettings};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Removes the wrapped path on drop.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Collect everything `pipe` yields on a background thread so the child never blocks on it.
fn drain_to_string(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn temp_sibling(url: &Path, suffix: &str) -> PathBuf {
    let mut name = url.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    url.with_file_name(name)
}

fn muxer_name(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Mp4 | FileType::M4v => "mp4",
        FileType::QuickTime => "mov",
        FileType::M4a => "ipod",
    }
}

fn video_codec_args(settings: Option<&VideoSettings>) -> Vec<String> {
    let mut args = Vec::new();
    let codec = settings.map(|s| s.codec).unwrap_or_default();
    args.push("-c:v".to_owned());
    args.push(
        match codec {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
        }
        .to_owned(),
    );
    let Some(settings) = settings else {
        return args;
    };
    if let Some(rate) = settings.average_bit_rate {
        args.push("-b:v".to_owned());
        args.push(rate.to_string());
    }
    if codec == VideoCodec::H264
        && let Some(pl) = settings.profile_level.as_deref()
    {
        let (profile, level) = pl.split_once('@').unwrap_or((pl, ""));
        if !profile.is_empty() {
            args.push("-profile:v".to_owned());
            args.push(profile.to_owned());
        }
        if !level.is_empty() {
            args.push("-level".to_owned());
            args.push(level.to_owned());
        }
    }
    args
}

struct VideoEncode {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    tmp: TempFileGuard,
    frame_dims: (u32, u32),
}

impl VideoEncode {
    fn spawn(cfg: &WriterConfig) -> ExportResult<Option<Self>> {
        let Some(video) = cfg.video.as_ref() else {
            return Ok(None);
        };
        let frame_dims = pixel_dims(video.render_size);
        let (out_w, out_h) = video.output_dims();
        if frame_dims.0 == 0 || frame_dims.1 == 0 || out_w == 0 || out_h == 0 {
            return Err(ExportError::validation("video size must be non-zero"));
        }
        if !out_w.is_multiple_of(2) || !out_h.is_multiple_of(2) {
            return Err(ExportError::validation(
                "video width/height must be even (required for yuv420p output)",
            ));
        }
        let fd = video.frame_duration.seconds();
        if !(fd.is_finite() && fd > 0.0) {
            return Err(ExportError::validation("frame duration must be positive"));
        }

        let tmp = TempFileGuard(temp_sibling(&cfg.url, ".video.tmp.mp4"));
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .args(["-s", &format!("{}x{}", frame_dims.0, frame_dims.1)])
            .args(["-r", &format!("{:.6}", 1.0 / fd)])
            .args(["-i", "pipe:0", "-an"])
            .args(["-vf", &format!("scale={out_w}:{out_h}")])
            .args(video_codec_args(video.settings.as_ref()))
            .args(["-pix_fmt", "yuv420p"])
            .arg(&tmp.0);

        let mut child = cmd.spawn().map_err(|e| {
            ExportError::sink(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExportError::sink("failed to open ffmpeg stdin"))?;
        let stderr = child.stderr.take().map(drain_to_string);
        Ok(Some(Self {
            child,
            stdin: Some(stdin),
            stderr,
            tmp,
            frame_dims,
        }))
    }

    fn push(&mut self, frame: &FrameBuffer) -> ExportResult<()> {
        if (frame.width, frame.height) != self.frame_dims {
            return Err(ExportError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.frame_dims.0, self.frame_dims.1
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExportError::sink("ffmpeg video encoder is already finalized"))?;
        stdin
            .write_all(&frame.data)
            .map_err(|e| ExportError::sink(format!("failed to write frame to ffmpeg stdin: {e}")))
    }

    fn finish(mut self) -> ExportResult<TempFileGuard> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| ExportError::sink(format!("failed to wait for ffmpeg to finish: {e}")))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(ExportError::sink(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        Ok(self.tmp)
    }

    fn kill(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct AudioSpool {
    out: BufWriter<File>,
    tmp: TempFileGuard,
    format: Option<(u32, u16)>,
    settings: Option<AudioSettings>,
}

/// [`SampleWriter`] encoding through the system `ffmpeg` binary.
///
/// Video is encoded live over stdin into a temporary file; audio is spooled as raw `f32le` and
/// both are muxed into the output with metadata when writing ends.
pub struct FfmpegWriter {
    cfg: Option<WriterConfig>,
    video: Option<VideoEncode>,
    audio: Option<AudioSpool>,
}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self {
            cfg: None,
            video: None,
            audio: None,
        }
    }

    fn mux(&self, cfg: &WriterConfig, video: Option<&Path>) -> ExportResult<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args(["-y", "-loglevel", "error"]);
        if let Some(video) = video {
            cmd.arg("-i").arg(video);
        }
        let audio = self.audio.as_ref().and_then(|a| a.format.map(|f| (a, f)));
        if let Some((spool, (rate, channels))) = audio {
            cmd.args(["-f", "f32le", "-ar", &rate.to_string()])
                .args(["-ac", &channels.to_string()])
                .arg("-i")
                .arg(&spool.tmp.0);
        }
        if video.is_none() && audio.is_none() {
            return Err(ExportError::sink("nothing to write: no samples were appended"));
        }
        if video.is_some() {
            cmd.args(["-c:v", "copy"]);
        }
        if let Some((spool, _)) = audio {
            let settings = spool.settings.clone().unwrap_or_default();
            cmd.args(["-c:a", "aac"]);
            if let Some(rate) = settings.bit_rate {
                cmd.args(["-b:a", &rate.to_string()]);
            }
            cmd.args(["-ac", &settings.channels.to_string()])
                .args(["-ar", &settings.sample_rate.to_string()]);
        }
        for item in &cfg.metadata {
            cmd.arg("-metadata").arg(format!("{}={}", item.key, item.value));
        }
        if cfg.optimize_for_network_use {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.args(["-f", muxer_name(cfg.file_type)]).arg(&cfg.url);

        let out = cmd
            .output()
            .map_err(|e| ExportError::sink(format!("failed to run ffmpeg mux: {e}")))?;
        if !out.status.success() {
            return Err(ExportError::sink(format!(
                "ffmpeg mux failed for '{}': {}",
                cfg.url.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Default for FfmpegWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleWriter for FfmpegWriter {
    fn begin(&mut self, cfg: WriterConfig) -> ExportResult<()> {
        ensure_parent_dir(&cfg.url)?;
        if !is_ffmpeg_on_path() {
            return Err(ExportError::sink(
                "ffmpeg is required for encoding, but was not found on PATH",
            ));
        }
        self.video = VideoEncode::spawn(&cfg)?;
        if let Some(audio) = cfg.audio.as_ref() {
            let tmp = TempFileGuard(temp_sibling(&cfg.url, ".audio.tmp.f32"));
            let file = File::create(&tmp.0)
                .map_err(|e| ExportError::sink(format!("failed to create audio spool: {e}")))?;
            self.audio = Some(AudioSpool {
                out: BufWriter::new(file),
                tmp,
                format: None,
                settings: audio.settings.clone(),
            });
        }
        tracing::debug!(url = %cfg.url.display(), "ffmpeg writer started");
        self.cfg = Some(cfg);
        Ok(())
    }

    fn push_video(&mut self, _pts: MediaTime, frame: &FrameBuffer) -> ExportResult<()> {
        self.video
            .as_mut()
            .ok_or_else(|| ExportError::sink("no video track configured"))?
            .push(frame)
    }

    fn push_audio(&mut self, _pts: MediaTime, audio: &AudioBuffer) -> ExportResult<()> {
        let spool = self
            .audio
            .as_mut()
            .ok_or_else(|| ExportError::sink("no audio track configured"))?;
        let format = (audio.sample_rate, audio.channels);
        match spool.format {
            None => spool.format = Some(format),
            Some(f) if f != format => {
                return Err(ExportError::validation(format!(
                    "audio format changed mid-stream: {f:?} -> {format:?}"
                )));
            }
            Some(_) => {}
        }
        spool
            .out
            .write_all(&audio.to_le_bytes())
            .map_err(|e| ExportError::sink(format!("failed to spool audio: {e}")))
    }

    fn end(&mut self) -> ExportResult<()> {
        let cfg = self
            .cfg
            .take()
            .ok_or_else(|| ExportError::sink("ffmpeg writer not started"))?;
        if let Some(spool) = self.audio.as_mut() {
            spool
                .out
                .flush()
                .map_err(|e| ExportError::sink(format!("failed to flush audio spool: {e}")))?;
        }
        let video_tmp = self.video.take().map(VideoEncode::finish).transpose()?;
        self.mux(&cfg, video_tmp.as_ref().map(|t| t.0.as_path()))?;
        self.audio = None;
        tracing::info!(url = %cfg.url.display(), "ffmpeg writer finished");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.kill();
        }
        self.audio = None;
        self.cfg = None;
    }
}

/// Factory for [`FfmpegWriter`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegWriterFactory;

impl SampleWriterFactory for FfmpegWriterFactory {
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
        Ok(Box::new(FfmpegWriter::new()))
    }
}
