//! Encoder process wrapper consuming raw RGB24 frames

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{EncodeError, ReframeError, Result, TransformError};
use crate::video::encoder::EncoderChoice;
use crate::video::process::{ManagedChild, ProcessLedger};
use crate::video::types::{FrameGeometry, FrameRate, RawFrame};

/// What the encoder produces
#[derive(Debug, Clone, PartialEq)]
pub struct SinkTarget {
    pub geometry: FrameGeometry,
    pub frame_rate: FrameRate,
    pub output: PathBuf,
}

/// Command line for an encoder reading rgb24 frames on stdin
pub fn encoder_args(target: &SinkTarget, choice: &EncoderChoice, config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner", "-loglevel", "error", "-y",
        "-f", "rawvideo",
        "-pix_fmt", "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push("-s".into());
    args.push(target.geometry.to_string());
    args.push("-r".into());
    args.push(target.frame_rate.to_string());
    args.extend(["-i", "pipe:0", "-an", "-c:v"].iter().map(|s| s.to_string()));
    args.push(choice.encoder.clone());
    args.extend(choice.quality_args(config));
    args.extend(["-pix_fmt", "yuv420p", "-g"].iter().map(|s| s.to_string()));
    args.push(config.gop_size.to_string());
    args.push(target.output.display().to_string());
    args
}

/// Result of a completed encode
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    pub encoder: String,
    pub frames_written: u64,
    pub output: PathBuf,
    pub elapsed: Duration,
}

/// A running encoder and the write side of its frame pipe
pub struct FrameSink {
    child: ManagedChild,
    stdin: Option<ChildStdin>,
    target: SinkTarget,
    encoder: String,
    frames_written: u64,
    started: Instant,
}

impl FrameSink {
    pub fn spawn(
        ffmpeg: &Path,
        target: SinkTarget,
        choice: &EncoderChoice,
        config: &EncoderConfig,
        grace: Duration,
        ledger: &ProcessLedger,
    ) -> Result<Self> {
        let args = encoder_args(&target, choice, config);
        debug!("Encoder command: {} {}", ffmpeg.display(), args.join(" "));

        let mut command = Command::new(ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = ManagedChild::spawn(command, "encoder", grace, ledger).map_err(|e| EncodeError::SpawnFailed {
            encoder: choice.encoder.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.take_stdin().ok_or_else(|| EncodeError::SpawnFailed {
            encoder: choice.encoder.clone(),
            reason: "encoder stdin was not captured".to_string(),
        })?;

        info!(
            "Encoder {} started: {} @ {} fps -> {}",
            choice.encoder,
            target.geometry,
            target.frame_rate,
            target.output.display()
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            target,
            encoder: choice.encoder.clone(),
            frames_written: 0,
            started: Instant::now(),
        })
    }

    /// Write one whole frame to the encoder
    pub async fn write_frame(&mut self, frame: &RawFrame, cancel: &CancellationToken) -> Result<()> {
        let expected = self.target.geometry.frame_size();
        if frame.as_bytes().len() != expected {
            return Err(TransformError::FrameSizeMismatch {
                expected,
                actual: frame.as_bytes().len(),
            }
            .into());
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| EncodeError::WriteFailed {
            reason: "encoder input already closed".to_string(),
        })?;

        let written = tokio::select! {
            result = stdin.write_all(frame.as_bytes()) => result,
            _ = cancel.cancelled() => return Err(ReframeError::Cancelled),
        };

        written.map_err(|e| EncodeError::WriteFailed { reason: e.to_string() })?;
        self.frames_written += 1;
        Ok(())
    }

    /// Close the input, wait for the encoder to exit and check its status
    pub async fn finish(mut self, limit: Duration) -> Result<EncodeSummary> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush().await {
                warn!("Flushing encoder input failed: {}", e);
            }
            drop(stdin);
        }

        debug!("Waiting for encoder {} to finish {} frames", self.encoder, self.frames_written);
        let status = self
            .child
            .wait_or_kill(limit)
            .await
            .map_err(|e| EncodeError::WriteFailed { reason: e.to_string() })?;

        match status {
            Some(status) if status.success() => {
                let summary = EncodeSummary {
                    encoder: self.encoder.clone(),
                    frames_written: self.frames_written,
                    output: self.target.output.clone(),
                    elapsed: self.started.elapsed(),
                };
                info!(
                    "Encoder {} wrote {} frames in {:.1}s",
                    summary.encoder,
                    summary.frames_written,
                    summary.elapsed.as_secs_f64()
                );
                Ok(summary)
            }
            Some(status) => Err(EncodeError::NonZeroExit {
                encoder: self.encoder.clone(),
                code: status.code(),
            }
            .into()),
            None => Err(EncodeError::ExitTimeout { seconds: limit.as_secs() }.into()),
        }
    }

    /// Tear the encoder down without waiting for it to finish
    pub async fn abort(mut self) {
        self.stdin.take();
        self.child.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::encoder::select_encoder;

    fn target() -> SinkTarget {
        SinkTarget {
            geometry: FrameGeometry::new(1280, 720),
            frame_rate: FrameRate::whole(48),
            output: PathBuf::from("/tmp/out.mp4"),
        }
    }

    #[test]
    fn test_encoder_args() {
        let config = EncoderConfig::default();
        let choice = select_encoder(&[], target().geometry, &config);
        let args = encoder_args(&target(), &choice, &config);

        assert!(args.windows(2).any(|w| w == ["-s", "1280x720"]));
        assert!(args.windows(2).any(|w| w == ["-r", "48"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.windows(2).any(|w| w == ["-g", "250"]));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_rate_passed_as_fraction() {
        let config = EncoderConfig::default();
        let target = SinkTarget {
            frame_rate: FrameRate::new(30000, 1001).unwrap().multiplied(2),
            ..target()
        };
        let choice = select_encoder(&[], target.geometry, &config);
        let args = encoder_args(&target, &choice, &config);
        assert!(args.windows(2).any(|w| w == ["-r", "60000/1001"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sink_writes_and_finishes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.raw");
        let script = dir.path().join("fake_encoder.sh");
        // Last argument is the output path
        std::fs::write(&script, "#!/bin/sh\nfor last; do :; done\ncat > \"$last\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ledger = ProcessLedger::new();
        let config = EncoderConfig::default();
        let geometry = FrameGeometry::new(2, 2);
        let target = SinkTarget {
            geometry,
            frame_rate: FrameRate::whole(25),
            output: output.clone(),
        };
        let choice = select_encoder(&[], geometry, &config);
        let mut sink = FrameSink::spawn(&script, target, &choice, &config, Duration::from_millis(200), &ledger).unwrap();

        let cancel = CancellationToken::new();
        sink.write_frame(&RawFrame::filled(geometry, [1, 2, 3]), &cancel).await.unwrap();
        sink.write_frame(&RawFrame::filled(geometry, [4, 5, 6]), &cancel).await.unwrap();

        let wrong = RawFrame::black(FrameGeometry::new(4, 4));
        assert!(sink.write_frame(&wrong, &cancel).await.is_err());

        let summary = sink.finish(Duration::from_secs(5)).await.unwrap();
        assert_eq!(summary.frames_written, 2);
        assert_eq!(std::fs::read(&output).unwrap().len(), 24);
        assert!(ledger.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("failing_encoder.sh");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ledger = ProcessLedger::new();
        let config = EncoderConfig::default();
        let target = SinkTarget {
            geometry: FrameGeometry::new(2, 2),
            frame_rate: FrameRate::whole(25),
            output: dir.path().join("out.mp4"),
        };
        let choice = select_encoder(&[], target.geometry, &config);
        let sink = FrameSink::spawn(&script, target, &choice, &config, Duration::from_millis(200), &ledger).unwrap();

        let err = sink.finish(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ReframeError::Encode(EncodeError::NonZeroExit { code: Some(3), .. })
        ));
    }
}
