use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use mediaexport::{
    Affine, Asset, AudioSettings, ExportSession, ExportStatus, FileType, FrameBuffer, MediaTime,
    MetadataItem, PooledFrame, SampleLogWriterFactory, SinkFactory, Size, SyntheticAsset,
    ThreadedSinkFactory, TimeRange, VideoComposition, VideoSettings,
};

#[derive(Parser, Debug)]
#[command(name = "mediaexport", version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tracks of a media file as JSON (requires `ffprobe` on PATH).
    Probe(ProbeArgs),
    /// Transcode a media file (requires `ffmpeg` on PATH).
    Export(ExportArgs),
    /// Export a synthetic asset to a JSON-lines sample log.
    Synth(SynthArgs),
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Input media file.
    input: PathBuf,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Input media file.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output file.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = FileTypeArg::Mp4)]
    file_type: FileTypeArg,

    /// Target width; letterboxes into `--width`x`--height`.
    #[arg(long, requires = "height")]
    width: Option<u32>,

    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Range start in seconds.
    #[arg(long)]
    start: Option<f64>,

    /// Range duration in seconds; defaults to the rest of the input.
    #[arg(long)]
    duration: Option<f64>,

    /// Output frame rate.
    #[arg(long)]
    fps: Option<f32>,

    /// Average video bit rate in bits per second.
    #[arg(long)]
    bitrate: Option<u32>,

    /// Encoder settings JSON: `{"video": {...}, "audio": {...}}`. Flags override it.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Video composition JSON.
    #[arg(long)]
    composition: Option<PathBuf>,

    /// Metadata item, `key=value`. Repeatable.
    #[arg(long = "metadata", value_parser = parse_metadata)]
    metadata: Vec<MetadataItem>,

    /// Lay the file out for progressive download.
    #[arg(long)]
    faststart: bool,

    /// Write a PNG of every `--snapshot-every`th decoded frame into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,
}

#[derive(Parser, Debug)]
struct SynthArgs {
    /// Output sample log.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 30.0)]
    fps: f32,

    #[arg(long, default_value_t = 2.0)]
    seconds: f64,

    /// Audio sample rate; 0 disables the audio track.
    #[arg(long, default_value_t = 44_100)]
    audio_rate: u32,

    /// Target size as `WxH`.
    #[arg(long, value_parser = parse_size)]
    target: Option<(u32, u32)>,

    /// Clockwise rotation of the synthetic track (0, 90, 180, 270).
    #[arg(long, default_value_t = 0)]
    rotate: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FileTypeArg {
    Mp4,
    Mov,
    M4v,
    M4a,
}

impl From<FileTypeArg> for FileType {
    fn from(v: FileTypeArg) -> Self {
        match v {
            FileTypeArg::Mp4 => FileType::Mp4,
            FileTypeArg::Mov => FileType::QuickTime,
            FileTypeArg::M4v => FileType::M4v,
            FileTypeArg::M4a => FileType::M4a,
        }
    }
}

#[derive(serde::Deserialize, Default)]
struct SettingsFile {
    video: Option<VideoSettings>,
    audio: Option<AudioSettings>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Probe(args) => cmd_probe(args),
        Command::Export(args) => cmd_export(args),
        Command::Synth(args) => cmd_synth(args),
    }
}

fn parse_metadata(s: &str) -> Result<MetadataItem, String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    Ok(MetadataItem::new(k, v))
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w = w.parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let f = File::open(path).with_context(|| format!("open {what} '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parse {what} JSON"))
}

/// Start `session` and block until it ends, logging progress.
fn run_session(session: &ExportSession) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel();
    session.start(move || {
        let _ = tx.send(());
    });
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::info!("progress {:.1}%", session.progress() * 100.0);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("export was abandoned");
            }
        }
    }
    match session.status() {
        ExportStatus::Completed => Ok(()),
        status => match session.error() {
            Some(err) => anyhow::bail!("export {status:?}: {err}"),
            None => anyhow::bail!("export {status:?}"),
        },
    }
}

fn snapshot_interceptor(
    dir: PathBuf,
    every: u64,
) -> anyhow::Result<Arc<dyn mediaexport::FrameInterceptor>> {
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create snapshot dir '{}'", dir.display()))?;
    let every = every.max(1);
    let counter = std::sync::atomic::AtomicU64::new(0);
    Ok(Arc::new(
        move |frame: &FrameBuffer, at: MediaTime, _buf: PooledFrame| -> Option<PooledFrame> {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            if n % every == 0 {
                let path = dir.join(format!("frame_{n:06}.png"));
                match frame.to_image() {
                    Some(img) => {
                        if let Err(e) = img.save(&path) {
                            tracing::warn!(path = %path.display(), error = %e, "snapshot failed");
                        } else {
                            tracing::debug!(path = %path.display(), t = %at, "snapshot");
                        }
                    }
                    None => tracing::warn!("frame buffer has inconsistent size"),
                }
            }
            None
        },
    ))
}

#[cfg(feature = "media-ffmpeg")]
fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let asset = mediaexport::FfmpegAsset::open(&args.input)?;
    let out = serde_json::json!({
        "path": args.input,
        "duration": asset.duration(),
        "tracks": asset.tracks(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(not(feature = "media-ffmpeg"))]
fn cmd_probe(_args: ProbeArgs) -> anyhow::Result<()> {
    anyhow::bail!("probe requires the 'media-ffmpeg' feature")
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let (asset, sinks) = ffmpeg_backend(&args.in_path)?;
    let session = ExportSession::new(asset, sinks)?;

    let file: SettingsFile = match &args.settings {
        Some(p) => read_json(p, "settings")?,
        None => SettingsFile::default(),
    };
    let composition: Option<VideoComposition> = match &args.composition {
        Some(p) => {
            let c: VideoComposition = read_json(p, "composition")?;
            c.validate()?;
            Some(c)
        }
        None => None,
    };

    let mut video = file.video.unwrap_or_default();
    if let (Some(w), Some(h)) = (args.width, args.height) {
        video.width = Some(w);
        video.height = Some(h);
    }
    if args.fps.is_some() {
        video.frame_rate = args.fps;
    }
    if args.bitrate.is_some() {
        video.average_bit_rate = args.bitrate;
    }

    let secs = |s: f64| MediaTime::from_seconds(s, mediaexport::DEFAULT_TIMESCALE);
    let start = secs(args.start.unwrap_or(0.0));
    let time_range = match args.duration {
        Some(d) => TimeRange::new(start, secs(d)),
        None => TimeRange::from_start(start),
    };

    session.configure(|c| {
        c.output_url = Some(args.out.clone());
        c.output_file_type = args.file_type.into();
        c.time_range = time_range;
        c.video_settings = Some(video);
        c.audio_settings = file.audio;
        c.video_composition = composition;
        c.metadata = args.metadata;
        c.should_optimize_for_network_use = args.faststart;
    });
    if let Some(dir) = args.snapshot_dir {
        session.set_frame_interceptor(Some(snapshot_interceptor(dir, args.snapshot_every)?));
    }

    run_session(&session)?;
    tracing::info!(out = %args.out.display(), "export complete");
    Ok(())
}

#[cfg(feature = "media-ffmpeg")]
fn ffmpeg_backend(path: &Path) -> anyhow::Result<(Arc<dyn Asset>, Arc<dyn SinkFactory>)> {
    let asset: Arc<dyn Asset> = Arc::new(mediaexport::FfmpegAsset::open(path)?);
    let sinks: Arc<dyn SinkFactory> =
        Arc::new(ThreadedSinkFactory::new(mediaexport::FfmpegWriterFactory));
    Ok((asset, sinks))
}

#[cfg(not(feature = "media-ffmpeg"))]
fn ffmpeg_backend(_path: &Path) -> anyhow::Result<(Arc<dyn Asset>, Arc<dyn SinkFactory>)> {
    anyhow::bail!("export requires the 'media-ffmpeg' feature")
}

fn cmd_synth(args: SynthArgs) -> anyhow::Result<()> {
    let natural = Size::new(f64::from(args.width), f64::from(args.height));
    let transform = match args.rotate % 360 {
        90 => Affine::new([0.0, 1.0, -1.0, 0.0, natural.height, 0.0]),
        180 => Affine::new([-1.0, 0.0, 0.0, -1.0, natural.width, natural.height]),
        270 => Affine::new([0.0, -1.0, 1.0, 0.0, 0.0, natural.width]),
        0 => Affine::IDENTITY,
        other => anyhow::bail!("unsupported rotation {other}"),
    };
    let mut asset = SyntheticAsset::new(MediaTime::from_seconds(
        args.seconds,
        mediaexport::DEFAULT_TIMESCALE,
    ))
    .with_video(natural, transform, args.fps);
    if args.audio_rate > 0 {
        asset = asset.with_audio(args.audio_rate, 2);
    }

    let log = mediaexport::SampleLog::new();
    let sinks = Arc::new(ThreadedSinkFactory::new(SampleLogWriterFactory {
        log: Some(log.clone()),
        ..SampleLogWriterFactory::default()
    }));
    let session = ExportSession::new(Arc::new(asset), sinks)?;
    session.configure(|c| {
        c.output_url = Some(args.out.clone());
        c.video_settings = args.target.map(|(w, h)| VideoSettings::h264(w, h));
    });
    run_session(&session)?;

    let summary = serde_json::json!({
        "out": args.out,
        "video_samples": log.count(mediaexport::MediaKind::Video),
        "audio_samples": log.count(mediaexport::MediaKind::Audio),
        "progress": session.progress(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
