//! FFmpeg backend for export
//!
//! Probing goes through `ffprobe` JSON output; the trim-and-transform
//! re-encode is a single `ffmpeg` run whose `-progress pipe:1` stream feeds
//! a shared [`ProgressCell`].

use super::transform::{FillTransform, Orientation};
use super::types::{AssetInfo, ExportError, VideoTrackInfo};
use crate::capture::traits::Resolution;
use crate::config::Settings;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Everything the backend needs for one re-encode
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub source: PathBuf,
    /// Where the backend writes; promoted to the real output by the engine
    pub staging: PathBuf,
    /// Trim start in seconds
    pub start: f64,
    /// Trimmed length in seconds
    pub duration: f64,
    pub target: Resolution,
    pub fill: FillTransform,
    pub frame_rate: u32,
    pub bitrate: u64,
    pub include_audio: bool,
}

/// Latest encode progress in [0, 1], shared between the encode and the
/// poller
#[derive(Debug, Clone, Default)]
pub struct ProgressCell(Arc<AtomicU64>);

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fraction: f64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.0.store(fraction.to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Probing and transcoding, so the engine can run without FFmpeg in tests
#[async_trait]
pub trait TranscodeBackend: Send + Sync {
    async fn probe(&self, source: &Path) -> Result<AssetInfo, ExportError>;

    /// Run the re-encode to completion, updating `progress` as it goes.
    /// Dropping the returned future must stop the encode.
    async fn transcode(&self, plan: &RenderPlan, progress: &ProgressCell) -> Result<(), ExportError>;
}

/// [`TranscodeBackend`] driving the `ffprobe` and `ffmpeg` executables
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    preset: String,
    audio_bitrate: String,
}

impl FfmpegBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg_path.clone(),
            ffprobe: settings.ffprobe_path.clone(),
            preset: settings.export.preset.clone(),
            audio_bitrate: settings.export.audio_bitrate.clone(),
        }
    }

    fn transcode_args(&self, plan: &RenderPlan) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", plan.start),
            "-i".into(),
            plan.source.to_string_lossy().to_string(),
            "-t".into(),
            format!("{:.3}", plan.duration),
            "-vf".into(),
            format!(
                "{},fps={},setsar=1",
                fill_filter(&plan.fill, plan.target),
                plan.frame_rate
            ),
            "-map".into(),
            "0:v:0".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.preset.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-b:v".into(),
            plan.bitrate.to_string(),
        ];

        if plan.include_audio {
            args.extend([
                "-map".into(),
                "0:a:0?".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                self.audio_bitrate.clone(),
            ]);
        } else {
            args.push("-an".into());
        }

        args.extend([
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            "-progress".into(),
            "pipe:1".into(),
            plan.staging.to_string_lossy().to_string(),
        ]);
        args
    }
}

#[async_trait]
impl TranscodeBackend for FfmpegBackend {
    async fn probe(&self, source: &Path) -> Result<AssetInfo, ExportError> {
        if !source.exists() {
            return Err(ExportError::InvalidConfig(format!(
                "Source not found: {}",
                source.display()
            )));
        }

        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(ExportError::Ffmpeg(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    async fn transcode(&self, plan: &RenderPlan, progress: &ProgressCell) -> Result<(), ExportError> {
        let args = self.transcode_args(plan);
        tracing::debug!("Running FFmpeg export: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stderr".to_string()))?;

        let duration = plan.duration;
        let read_progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_progress_line(&line) {
                    Some(ProgressEvent::OutTime(secs)) if duration > 0.0 => {
                        progress.set(secs / duration);
                    }
                    Some(ProgressEvent::End) => progress.set(1.0),
                    _ => {}
                }
            }
        };
        let read_errors = async {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        };

        let ((), errors) = tokio::join!(read_progress, read_errors);
        let status = child.wait().await?;

        if !status.success() {
            return Err(ExportError::Encoding(format!(
                "FFmpeg exited with {}: {}",
                status,
                errors.trim()
            )));
        }
        Ok(())
    }
}

/// `scale` + `crop` filter realizing a crop-to-fill transform.
///
/// FFmpeg auto-rotates its input, so the filter operates on the upright
/// picture. Scaled dimensions are rounded up to even values so the crop
/// always has enough pixels.
pub fn fill_filter(fill: &FillTransform, target: Resolution) -> String {
    let even_ceil = |v: f64| -> u32 {
        let v = (v - 1e-6).ceil().max(2.0) as u32;
        v + v % 2
    };
    let width = even_ceil(fill.scaled.width).max(target.width);
    let height = even_ceil(fill.scaled.height).max(target.height);
    let x = (width - target.width) / 2;
    let y = (height - target.height) / 2;
    format!(
        "scale={}:{},crop={}:{}:{}:{}",
        width, height, target.width, target.height, x, y
    )
}

/// One interesting line of `-progress` output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Output time reached, in seconds
    OutTime(f64),
    End,
}

pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both keys carry microseconds
        "out_time_us" | "out_time_ms" => value
            .parse::<f64>()
            .ok()
            .map(|us| ProgressEvent::OutTime(us / 1_000_000.0)),
        "progress" if value == "end" => Some(ProgressEvent::End),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Clockwise display rotation in degrees
    fn rotation(&self) -> i64 {
        if let Some(rotate) = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<f64>().ok())
        {
            return rotate.round() as i64;
        }
        // Display matrix rotation is counter-clockwise
        self.side_data_list
            .iter()
            .find_map(|s| s.rotation)
            .map(|r| -(r.round() as i64))
            .unwrap_or(0)
    }
}

/// Parse a rational ("30000/1001") or decimal frame rate
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Turn `ffprobe -show_streams -show_format` JSON into [`AssetInfo`]
pub fn parse_probe(json: &str) -> Result<AssetInfo, ExportError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to parse ffprobe output: {}", e)))?;

    let video_stream = probe.streams.iter().find(|s| {
        s.codec_type.as_deref() == Some("video")
            && s.width.unwrap_or(0) > 0
            && s.height.unwrap_or(0) > 0
    });
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = parse_seconds(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .or_else(|| video_stream.and_then(|s| parse_seconds(s.duration.as_deref())))
        .unwrap_or(0.0);

    let video = video_stream.map(|s| VideoTrackInfo {
        width: s.width.unwrap_or(0),
        height: s.height.unwrap_or(0),
        orientation: Orientation::from_degrees(s.rotation()),
        frame_rate: s
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(0.0),
        codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
    });

    Ok(AssetInfo {
        duration,
        video,
        has_audio,
    })
}
