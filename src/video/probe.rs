use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProbeError, Result};
use crate::video::types::{FrameGeometry, FrameRate, VideoDescriptor};

/// Frame rate assumed when the container does not report one
pub const DEFAULT_FRAME_RATE: FrameRate = FrameRate::whole(30);

/// Reads container metadata with ffprobe
#[derive(Debug, Clone)]
pub struct VideoProbe {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl VideoProbe {
    pub fn new<P: Into<PathBuf>>(ffprobe: P, timeout: Duration) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    /// Probe `path` and describe its first video stream
    pub async fn probe(&self, path: &Path) -> Result<VideoDescriptor> {
        let shown = path.display().to_string();
        debug!("Probing {} with {}", shown, self.ffprobe.display());

        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProbeError::ToolUnavailable {
            tool: self.ffprobe.display().to_string(),
            reason: e.to_string(),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ProbeError::Failed {
                path: shown.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => return Err(ProbeError::Timeout { path: shown }.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed {
                path: shown,
                reason: stderr.trim().to_string(),
            }
            .into());
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let descriptor = parse_probe_output(&json, path)?;

        info!(
            "Probed {}: {} @ {} fps, {:.2}s, audio: {}",
            shown, descriptor.source_geometry, descriptor.frame_rate, descriptor.duration, descriptor.has_audio
        );
        if descriptor.needs_scale() {
            info!(
                "Odd source dimensions {} will be scaled to {}",
                descriptor.source_geometry, descriptor.geometry
            );
        }

        Ok(descriptor)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    nb_frames: Option<String>,
}

/// Build a descriptor from ffprobe's JSON output
pub fn parse_probe_output(json: &str, path: &Path) -> Result<VideoDescriptor> {
    let shown = path.display().to_string();
    let output: FfprobeOutput = serde_json::from_str(json).map_err(|e| ProbeError::InvalidMetadata {
        path: shown.clone(),
        details: format!("failed to parse JSON: {}", e),
    })?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream { path: shown.clone() })?;

    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        (w, h) => {
            return Err(ProbeError::InvalidMetadata {
                path: shown,
                details: format!("bad dimensions {:?}x{:?}", w, h),
            }
            .into())
        }
    };

    let frame_rate = video
        .r_frame_rate
        .as_deref()
        .and_then(FrameRate::parse)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(FrameRate::parse))
        .unwrap_or(DEFAULT_FRAME_RATE);

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .filter(|n| *n > 0);

    let source_geometry = FrameGeometry::new(width, height);

    Ok(VideoDescriptor {
        path: path.to_path_buf(),
        geometry: source_geometry.even(),
        source_geometry,
        frame_rate,
        duration,
        has_audio,
        codec: video.codec_name.clone(),
        frame_count,
    })
}
