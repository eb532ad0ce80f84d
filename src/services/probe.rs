//! Video metadata and frame capture through the ffmpeg command line tools.

use crate::core::video::MediaInfo;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Could not find {tool}")]
    ToolMissing { tool: String },

    #[error("Probe failed: {reason}")]
    Failed { reason: String },

    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error(
        "Reading properties failed. width: {width} height: {height} duration: {duration_ms}"
    )]
    MissingProperties {
        width: u32,
        height: u32,
        duration_ms: i64,
    },

    #[error("Invalid probe output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of video metadata and decoded frames.
pub trait FrameProvider: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;

    /// Decode the frame at `offset_ms`. `None` when the video has no frame there.
    fn capture_frame(&self, path: &Path, offset_ms: i64) -> Option<DynamicImage>;
}

/// [`FrameProvider`] backed by `ffprobe` and `ffmpeg` found on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegProvider {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegProvider {
    pub fn locate() -> Result<Self, ProbeError> {
        Ok(Self {
            ffmpeg: find_tool("ffmpeg")?,
            ffprobe: find_tool("ffprobe")?,
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }
}

impl FrameProvider for FfmpegProvider {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(ProbeError::Unreadable {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout)
    }

    fn capture_frame(&self, path: &Path, offset_ms: i64) -> Option<DynamicImage> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(ms_to_timestamp(offset_ms))
            .arg("-i")
            .arg(path)
            .args([
                "-an", "-frames:v", "1", "-pix_fmt", "rgb24", "-f", "image2pipe", "-vcodec",
                "bmp", "-",
            ])
            .stdin(Stdio::null())
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Failed to run ffmpeg: {}", e);
                return None;
            }
        };

        if !output.status.success() || output.stdout.is_empty() {
            log::debug!(
                "No frame at {} in {}",
                ms_to_timestamp(offset_ms),
                path.display()
            );
            return None;
        }

        image::load_from_memory_with_format(&output.stdout, ImageFormat::Bmp).ok()
    }
}

/// Locate an executable on `PATH`.
pub fn find_tool(tool: &str) -> Result<PathBuf, ProbeError> {
    which::which(tool).map_err(|_| ProbeError::ToolMissing {
        tool: tool.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: StreamTags,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<i32>,
}

impl ProbeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    fn rotation(&self) -> i32 {
        self.tags
            .rotate
            .as_deref()
            .and_then(|r| r.trim().parse().ok())
            .or_else(|| self.side_data_list.iter().find_map(|s| s.rotation))
            .unwrap_or(0)
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &[u8]) -> Result<MediaInfo, ProbeError> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.is("video"))
        .ok_or_else(|| ProbeError::Failed {
            reason: "no video stream".to_string(),
        })?;

    let duration_ms = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as i64)
        .unwrap_or(0);

    let mut width = video.width.unwrap_or(0);
    let mut height = video.height.unwrap_or(0);
    if video.rotation().rem_euclid(180) == 90 {
        std::mem::swap(&mut width, &mut height);
    }

    if width == 0 || height == 0 || duration_ms == 0 {
        return Err(ProbeError::MissingProperties {
            width,
            height,
            duration_ms,
        });
    }

    let framerate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .map(|fps| (fps * 10.0).round() / 10.0)
        .unwrap_or(0.0);

    let bitrate = probe
        .format
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .map(|bps| (bps / 1000) as u32)
        .unwrap_or(0);

    Ok(MediaInfo {
        duration_ms,
        width,
        height,
        framerate,
        codec: video.codec_name.clone().unwrap_or_default(),
        audio: probe
            .streams
            .iter()
            .find(|s| s.is("audio"))
            .map(audio_summary)
            .unwrap_or_default(),
        bitrate,
    })
}

/// `codec rate channels kb/s`, e.g. `aac 44100 Hz stereo 128 kb/s`.
fn audio_summary(stream: &ProbeStream) -> String {
    let mut parts = vec![stream.codec_name.clone().unwrap_or_default()];

    if let Some(rate) = &stream.sample_rate {
        parts.push(format!("{rate} Hz"));
    }
    match stream.channels {
        Some(1) => parts.push("mono".to_string()),
        Some(2) => parts.push("stereo".to_string()),
        Some(n) => parts.push(format!("{n} channels")),
        None => {}
    }
    let kbps = stream
        .bit_rate
        .as_deref()
        .and_then(|b| b.parse::<u64>().ok())
        .map(|bps| bps / 1000)
        .unwrap_or(0);
    if kbps > 0 {
        parts.push(format!("{kbps} kb/s"));
    }

    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Parse `30000/1001` or `29.97`. `0/0` yields `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0 && num > 0.0).then(|| num / den);
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

/// Format milliseconds as the `HH:MM:SS.mmm` seek position ffmpeg expects.
pub fn ms_to_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1000 % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
