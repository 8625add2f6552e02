use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::composition::{VideoComposition, raster};
use crate::foundation::core::{Affine, MediaKind, Size};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::time::{DEFAULT_TIMESCALE, MediaTime, TimeRange};
use crate::media::asset::{Asset, AssetTrack};
use crate::media::pipeline::{MediaSource, OutputDesc, ReaderStatus, TrackOutput};
use crate::media::sample::{AudioBuffer, FrameBuffer, Sample};
use crate::settings::AudioMix;

/// PCM format produced by the audio decode.
pub const DECODE_SAMPLE_RATE: u32 = 44_100;
pub const DECODE_CHANNELS: u16 = 2;
const AUDIO_FRAMES_PER_BUFFER: usize = 1024;

/// Media file probed with `ffprobe` and decoded with `ffmpeg`.
#[derive(Clone, Debug)]
pub struct FfmpegAsset {
    path: PathBuf,
    duration: MediaTime,
    tracks: Vec<AssetTrack>,
}

#[derive(serde::Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(serde::Deserialize, Default)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeStream {
    index: u32,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(serde::Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeOut {
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

impl FfmpegAsset {
    /// Probe `path`. Track ids are the container stream indices.
    #[tracing::instrument(level = "debug")]
    pub fn open(path: &Path) -> ExportResult<Self> {
        let out = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .map_err(|e| ExportError::source(format!("failed to run ffprobe: {e}")))?;
        if !out.status.success() {
            return Err(ExportError::source(format!(
                "ffprobe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
            .map_err(|e| ExportError::source(format!("ffprobe json parse failed: {e}")))?;
        Ok(Self::from_probe(path, parsed))
    }

    fn from_probe(path: &Path, probe: ProbeOut) -> Self {
        let duration_sec = probe
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let tracks = probe
            .streams
            .iter()
            .filter_map(|s| match s.codec_type.as_deref() {
                Some("video") => {
                    let natural = Size::new(
                        f64::from(s.width.unwrap_or(0)),
                        f64::from(s.height.unwrap_or(0)),
                    );
                    let fps = [s.avg_frame_rate.as_deref(), s.r_frame_rate.as_deref()]
                        .into_iter()
                        .flatten()
                        .filter_map(parse_ff_rate)
                        .find(|r| *r > 0.0)
                        .unwrap_or(0.0);
                    Some(
                        AssetTrack::video(s.index, natural, fps)
                            .with_transform(orientation_transform(stream_rotation(s), natural)),
                    )
                }
                Some("audio") => Some(AssetTrack::audio(s.index)),
                _ => None,
            })
            .collect();

        Self {
            path: path.to_path_buf(),
            duration: MediaTime::from_seconds(duration_sec, DEFAULT_TIMESCALE),
            tracks,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Asset for FfmpegAsset {
    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn tracks(&self) -> &[AssetTrack] {
        &self.tracks
    }

    fn open_source(&self) -> ExportResult<Arc<dyn MediaSource>> {
        if !self.path.is_file() {
            return Err(ExportError::source(format!(
                "media file '{}' is not readable",
                self.path.display()
            )));
        }
        Ok(Arc::new(FfmpegSource {
            shared: Arc::new(SourceShared {
                asset: self.clone(),
                state: Mutex::new(SourceState {
                    status: ReaderStatus::Unknown,
                    error: None,
                    range: TimeRange::FULL,
                    kinds: Vec::new(),
                    open_outputs: 0,
                    children: Vec::new(),
                }),
            }),
        }))
    }
}

fn parse_ff_rate(s: &str) -> Option<f32> {
    let (a, b) = s.split_once('/')?;
    let a = a.parse::<f64>().ok()?;
    let b = b.parse::<f64>().ok()?;
    if b == 0.0 {
        return None;
    }
    Some((a / b) as f32)
}

/// Clockwise display rotation in degrees, normalized to `[0, 360)`.
fn stream_rotation(s: &ProbeStream) -> i32 {
    let cw = if let Some(r) = s.side_data_list.iter().find_map(|d| d.rotation) {
        -r
    } else {
        s.tags
            .rotate
            .as_deref()
            .and_then(|r| r.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    (cw.round() as i32).rem_euclid(360)
}

/// Preferred transform mapping coded frames of `natural` size to an upright display.
pub fn orientation_transform(cw_degrees: i32, natural: Size) -> Affine {
    let (w, h) = (natural.width, natural.height);
    match cw_degrees.rem_euclid(360) {
        90 => Affine::new([0.0, 1.0, -1.0, 0.0, h, 0.0]),
        180 => Affine::new([-1.0, 0.0, 0.0, -1.0, w, h]),
        270 => Affine::new([0.0, -1.0, 1.0, 0.0, 0.0, w]),
        _ => Affine::IDENTITY,
    }
}

struct SourceState {
    status: ReaderStatus,
    error: Option<Arc<ExportError>>,
    range: TimeRange,
    kinds: Vec<MediaKind>,
    open_outputs: usize,
    children: Vec<Arc<Mutex<Child>>>,
}

struct SourceShared {
    asset: FfmpegAsset,
    state: Mutex<SourceState>,
}

impl Drop for SourceShared {
    fn drop(&mut self) {
        for child in self.state.get_mut().children.drain(..) {
            let mut child = child.lock();
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl SourceShared {
    fn reading(&self) -> bool {
        self.state.lock().status == ReaderStatus::Reading
    }

    fn fail(&self, err: ExportError) {
        let mut st = self.state.lock();
        if st.status == ReaderStatus::Reading {
            tracing::warn!(path = %self.asset.path.display(), error = %err, "decode failed");
            st.status = ReaderStatus::Failed;
            st.error = Some(Arc::new(err));
        }
    }

    fn output_exhausted(&self) {
        let mut st = self.state.lock();
        st.open_outputs = st.open_outputs.saturating_sub(1);
        if st.open_outputs == 0 && st.status == ReaderStatus::Reading {
            st.status = ReaderStatus::Completed;
        }
    }

    fn range_args(&self) -> Vec<String> {
        let range = self.state.lock().range;
        let mut args = vec!["-ss".to_owned(), format!("{:.6}", range.start.seconds())];
        if let Some(d) = range.duration {
            args.push("-t".to_owned());
            args.push(format!("{:.6}", d.seconds()));
        }
        args
    }

    fn spawn(&self, cmd: &mut Command) -> ExportResult<Decoder> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::source(format!("failed to spawn ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::source("failed to open ffmpeg stdout"))?;
        let stderr = Arc::new(Mutex::new(String::new()));
        if let Some(mut pipe) = child.stderr.take() {
            let sink = stderr.clone();
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                sink.lock().push_str(&buf);
            });
        }
        let child = Arc::new(Mutex::new(child));
        self.state.lock().children.push(child.clone());
        Ok(Decoder {
            child,
            stdout,
            stderr,
        })
    }
}

struct Decoder {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    stderr: Arc<Mutex<String>>,
}

impl Decoder {
    /// Fill `buf` completely. Returns `Ok(false)` on a clean end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> ExportResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ExportError::source(format!("ffmpeg read failed: {e}"))),
            }
        }
        if filled == buf.len() {
            return Ok(true);
        }
        self.finish()?;
        Ok(false)
    }

    fn finish(&mut self) -> ExportResult<()> {
        let status = self
            .child
            .lock()
            .wait()
            .map_err(|e| ExportError::source(format!("failed to wait for ffmpeg: {e}")))?;
        if !status.success() {
            return Err(ExportError::source(format!(
                "ffmpeg decode exited with status {status}: {}",
                self.stderr.lock().trim()
            )));
        }
        Ok(())
    }
}

/// [`MediaSource`] decoding an [`FfmpegAsset`] through `ffmpeg` subprocesses.
pub struct FfmpegSource {
    shared: Arc<SourceShared>,
}

impl MediaSource for FfmpegSource {
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
            } => tracks.len() == 1 && composition.validate().is_ok(),
            OutputDesc::Audio { tracks, .. } => !tracks.is_empty(),
        }
    }

    fn add_output(&self, desc: OutputDesc) -> ExportResult<Box<dyn TrackOutput>> {
        if !self.can_add_output(&desc) {
            return Err(ExportError::source(format!(
                "cannot add {} output",
                desc.kind()
            )));
        }
        {
            let mut st = self.shared.state.lock();
            st.kinds.push(desc.kind());
            st.open_outputs += 1;
        }
        let shared = self.shared.clone();
        Ok(match desc {
            OutputDesc::Video {
                mut tracks,
                composition,
            } => Box::new(FfmpegVideoOutput {
                shared,
                track: tracks.remove(0),
                composition,
                decoder: None,
                next: 0,
                done: false,
            }),
            OutputDesc::Audio { tracks, mix } => Box::new(FfmpegAudioOutput {
                filter: audio_filter(&self.shared.asset, &tracks, mix.as_ref()),
                shared,
                decoder: None,
                next_frame: 0,
                done: false,
            }),
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
        let children = {
            let mut st = self.shared.state.lock();
            if matches!(st.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
                st.status = ReaderStatus::Cancelled;
            }
            std::mem::take(&mut st.children)
        };
        for child in children {
            let mut child = child.lock();
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// `-filter_complex` graph mixing `tracks` into one labelled `[out]` stream.
fn audio_filter(asset: &FfmpegAsset, tracks: &[AssetTrack], mix: Option<&AudioMix>) -> String {
    let audio_ids: Vec<u32> = asset
        .tracks
        .iter()
        .filter(|t| t.kind == MediaKind::Audio)
        .map(|t| t.track_id)
        .collect();
    let mut graph = String::new();
    let mut labels = String::new();
    for (i, t) in tracks.iter().enumerate() {
        let ordinal = audio_ids
            .iter()
            .position(|id| *id == t.track_id)
            .unwrap_or(i);
        let volume = mix.map_or(1.0, |m| m.volume_for(t.track_id));
        graph.push_str(&format!("[0:a:{ordinal}]volume={volume}[a{i}];"));
        labels.push_str(&format!("[a{i}]"));
    }
    if tracks.len() > 1 {
        graph.push_str(&format!(
            "{labels}amix=inputs={}:normalize=0[out]",
            tracks.len()
        ));
    } else {
        graph.push_str(&format!("{labels}anull[out]"));
    }
    graph
}

struct FfmpegVideoOutput {
    shared: Arc<SourceShared>,
    track: AssetTrack,
    composition: VideoComposition,
    decoder: Option<Decoder>,
    next: u64,
    done: bool,
}

impl FfmpegVideoOutput {
    fn start(&self) -> ExportResult<Decoder> {
        let fps = self.composition.frame_rate();
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-noautorotate"])
            .args(self.shared.range_args())
            .arg("-i")
            .arg(&self.shared.asset.path)
            .args(["-map", &format!("0:{}", self.track.track_id)])
            .args(["-an", "-r", &format!("{fps:.6}")])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]);
        self.shared.spawn(&mut cmd)
    }

    fn end(&mut self, err: Option<ExportError>) -> Option<Sample> {
        self.done = true;
        match err {
            Some(err) => self.shared.fail(err),
            None => self.shared.output_exhausted(),
        }
        None
    }
}

impl TrackOutput for FfmpegVideoOutput {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn copy_next_sample(&mut self) -> Option<Sample> {
        if self.done || !self.shared.reading() {
            return None;
        }
        if self.decoder.is_none() {
            match self.start() {
                Ok(d) => self.decoder = Some(d),
                Err(e) => return self.end(Some(e)),
            }
        }
        let w = self.track.natural_size.width.max(0.0) as u32;
        let h = self.track.natural_size.height.max(0.0) as u32;
        let mut src = FrameBuffer::new(w, h);
        let decoder = self.decoder.as_mut()?;
        match decoder.read_chunk(&mut src.data) {
            Ok(true) => {}
            Ok(false) => return self.end(None),
            Err(e) => {
                if !self.shared.reading() {
                    return None;
                }
                return self.end(Some(e));
            }
        }

        let range_start = self.shared.state.lock().range.start;
        let fd = self.composition.frame_duration;
        let offset = MediaTime::new(
            i64::try_from(self.next).unwrap_or(i64::MAX).saturating_mul(fd.value),
            fd.timescale,
        );
        let pts = range_start + offset;
        let frame = raster::compose_frame(&self.composition, self.track.track_id, pts, &src);
        self.next += 1;
        Some(Sample::video(pts, fd, frame))
    }
}

struct FfmpegAudioOutput {
    shared: Arc<SourceShared>,
    filter: String,
    decoder: Option<Decoder>,
    next_frame: u64,
    done: bool,
}

impl FfmpegAudioOutput {
    fn start(&self) -> ExportResult<Decoder> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error"])
            .args(self.shared.range_args())
            .arg("-i")
            .arg(&self.shared.asset.path)
            .args(["-vn", "-filter_complex", &self.filter, "-map", "[out]"])
            .args(["-f", "f32le", "-acodec", "pcm_f32le"])
            .args(["-ac", &DECODE_CHANNELS.to_string()])
            .args(["-ar", &DECODE_SAMPLE_RATE.to_string(), "pipe:1"]);
        self.shared.spawn(&mut cmd)
    }
}

impl TrackOutput for FfmpegAudioOutput {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn copy_next_sample(&mut self) -> Option<Sample> {
        if self.done || !self.shared.reading() {
            return None;
        }
        if self.decoder.is_none() {
            match self.start() {
                Ok(d) => self.decoder = Some(d),
                Err(e) => {
                    self.done = true;
                    self.shared.fail(e);
                    return None;
                }
            }
        }
        let decoder = self.decoder.as_mut()?;
        let frame_bytes = usize::from(DECODE_CHANNELS) * 4;
        let mut buf = vec![0u8; AUDIO_FRAMES_PER_BUFFER * frame_bytes];
        let mut filled = 0;
        let mut eof = false;
        while filled < buf.len() {
            match decoder.stdout.read(&mut buf[filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    if self.shared.reading() {
                        self.shared
                            .fail(ExportError::source(format!("ffmpeg read failed: {e}")));
                    }
                    return None;
                }
            }
        }
        let whole = filled - filled % frame_bytes;
        if whole == 0 && eof {
            self.done = true;
            match decoder.finish() {
                Ok(()) => self.shared.output_exhausted(),
                Err(e) => {
                    if self.shared.reading() {
                        self.shared.fail(e);
                    }
                }
            }
            return None;
        }

        let interleaved: Vec<f32> = buf[..whole]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let range_start = self.shared.state.lock().range.start;
        let pts = range_start
            + MediaTime::new(
                i64::try_from(self.next_frame).unwrap_or(i64::MAX),
                DECODE_SAMPLE_RATE,
            );
        let buffer = AudioBuffer {
            sample_rate: DECODE_SAMPLE_RATE,
            channels: DECODE_CHANNELS,
            interleaved,
        };
        self.next_frame += buffer.frames() as u64;
        Some(Sample::audio(pts, buffer))
    }
}
