use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{AudioError, ReframeError, Result},
    video::process::{ChildExit, ManagedChild, ProcessLedger},
};

/// Arguments that copy the first audio stream into `destination` unchanged
pub fn extract_args(input: &Path, destination: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-sn".to_string(),
        "-dn".to_string(),
        "-map".to_string(),
        "0:a:0".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        destination.display().to_string(),
    ]
}

/// Arguments that combine an encoded video with an extracted audio track
pub fn remux_args(video: &Path, audio: &Path, destination: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-shortest".to_string(),
        destination.display().to_string(),
    ]
}

/// An extracted audio track, deleted when dropped
#[derive(Debug)]
pub struct ExtractedAudio {
    path: PathBuf,
}

impl ExtractedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExtractedAudio {
    fn drop(&mut self) {
        if self.path.exists() {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed temporary audio {}", self.path.display()),
                Err(e) => warn!("Failed to remove temporary audio {}: {}", self.path.display(), e),
            }
        }
    }
}

/// Lossless audio extraction before processing and remux afterwards
pub struct AudioSideChannel {
    ffmpeg: PathBuf,
    timeout: Duration,
    grace: Duration,
    ledger: ProcessLedger,
}

impl AudioSideChannel {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration, grace: Duration, ledger: ProcessLedger) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
            grace,
            ledger,
        }
    }

    /// Copy the audio track of `input` to `destination`
    pub async fn extract(&self, input: &Path, destination: &Path, cancel: &CancellationToken) -> Result<ExtractedAudio> {
        // Owns the file from here so a failed run cleans up its partial output
        let audio = ExtractedAudio {
            path: destination.to_path_buf(),
        };

        self.run_tool("audio-extract", &extract_args(input, destination), cancel)
            .await
            .map_err(|e| match e {
                ReframeError::Cancelled => ReframeError::Cancelled,
                other => AudioError::ExtractionFailed { reason: other.to_string() }.into(),
            })?;

        let size = fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(AudioError::ExtractionFailed {
                reason: "extracted audio is empty".to_string(),
            }
            .into());
        }

        info!("Extracted audio track ({} bytes)", size);
        Ok(audio)
    }

    /// Write `video` with `audio` added to `destination`
    pub async fn remux(&self, video: &Path, audio: &ExtractedAudio, destination: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_tool("audio-remux", &remux_args(video, audio.path(), destination), cancel)
            .await
            .map_err(|e| match e {
                ReframeError::Cancelled => ReframeError::Cancelled,
                other => AudioError::RemuxFailed { reason: other.to_string() }.into(),
            })?;
        info!("Audio remuxed into {}", destination.display());
        Ok(())
    }

    async fn run_tool(&self, label: &'static str, args: &[String], cancel: &CancellationToken) -> Result<()> {
        debug!("{} command: {} {}", label, self.ffmpeg.display(), args.join(" "));
        let mut child = ManagedChild::spawn_quiet(&self.ffmpeg, args, label, self.grace, &self.ledger)?;

        match child.wait_cancellable(self.timeout, cancel).await? {
            ChildExit::Exited(status) if status.success() => Ok(()),
            ChildExit::Exited(status) => Err(ReframeError::generic(format!("{} exited with {}", label, status))),
            ChildExit::TimedOut => Err(ReframeError::generic(format!(
                "{} did not finish within {}s",
                label,
                self.timeout.as_secs()
            ))),
            ChildExit::Cancelled => Err(ReframeError::Cancelled),
        }
    }
}
