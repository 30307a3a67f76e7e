//! Decoder process wrapper producing raw RGB24 frames

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DecodeError, ReframeError, Result};
use crate::video::process::{ManagedChild, ProcessLedger};
use crate::video::types::{FrameGeometry, RawFrame};

/// Pre-filters applied by the decoder before frames reach the pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoderOptions {
    pub deinterlace: bool,

    /// Scale to this geometry (used when the source has odd dimensions)
    pub scale_to: Option<FrameGeometry>,

    pub hwaccel: Option<String>,
}

impl DecoderOptions {
    fn filter_chain(&self) -> Option<String> {
        let mut filters = Vec::new();
        if self.deinterlace {
            filters.push("yadif=0:-1:1".to_string());
        }
        if let Some(geometry) = self.scale_to {
            filters.push(format!("scale={}:{}", geometry.width, geometry.height));
        }

        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }
}

/// Command line for a decoder that writes rgb24 frames to stdout
pub fn decoder_args(input: &Path, options: &DecoderOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    if let Some(hwaccel) = &options.hwaccel {
        args.push("-hwaccel".into());
        args.push(hwaccel.clone());
    }

    args.push("-i".into());
    args.push(input.display().to_string());

    if let Some(chain) = options.filter_chain() {
        args.push("-vf".into());
        args.push(chain);
    }

    args.extend(
        [
            "-map", "0:v:0",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-fps_mode", "passthrough",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

/// A running decoder and the read side of its frame pipe
pub struct FrameSource {
    child: ManagedChild,
    stdout: ChildStdout,
    geometry: FrameGeometry,
    input: PathBuf,
    frames_read: u64,
    exhausted: bool,
}

impl FrameSource {
    /// Start the decoder for `input`
    ///
    /// Diagnostic output goes to the null device so a chatty decoder can
    /// never block on a full stderr pipe.
    pub fn spawn(
        ffmpeg: &Path,
        input: &Path,
        geometry: FrameGeometry,
        options: &DecoderOptions,
        grace: Duration,
        ledger: &ProcessLedger,
    ) -> Result<Self> {
        let args = decoder_args(input, options);
        debug!("Decoder command: {} {}", ffmpeg.display(), args.join(" "));

        let mut command = Command::new(ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = ManagedChild::spawn(command, "decoder", grace, ledger)
            .map_err(|e| DecodeError::SpawnFailed { reason: e.to_string() })?;

        let stdout = child.take_stdout().ok_or_else(|| DecodeError::SpawnFailed {
            reason: "decoder stdout was not captured".to_string(),
        })?;

        info!("Decoder started for {} at {}", input.display(), geometry);

        Ok(Self {
            child,
            stdout,
            geometry,
            input: input.to_path_buf(),
            frames_read: 0,
            exhausted: false,
        })
    }

    /// Read the next frame; `Ok(None)` at end of stream
    ///
    /// A short or empty read ends the stream. Read failures before the first
    /// frame are fatal; after that they are treated as end of stream.
    pub async fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Option<RawFrame>> {
        if self.exhausted {
            return Ok(None);
        }

        let frame_size = self.geometry.frame_size();
        let mut buffer = vec![0u8; frame_size];

        let filled = tokio::select! {
            result = read_full(&mut self.stdout, &mut buffer) => result,
            _ = cancel.cancelled() => return Err(ReframeError::Cancelled),
        };

        match filled {
            Ok(n) if n == frame_size => {
                self.frames_read += 1;
                // Length was fixed above
                RawFrame::from_bytes(self.geometry, buffer)
                    .map(Some)
                    .ok_or_else(|| ReframeError::generic("decoded frame has wrong length"))
            }
            Ok(n) => {
                if n > 0 {
                    debug!("Discarding {} trailing bytes from decoder", n);
                }
                self.finish_stream()
            }
            Err(e) if self.frames_read == 0 => Err(DecodeError::FirstReadFailed { reason: e.to_string() }.into()),
            Err(e) => {
                warn!("Decoder read failed after {} frames, treating as end of stream: {}", self.frames_read, e);
                self.finish_stream()
            }
        }
    }

    fn finish_stream(&mut self) -> Result<Option<RawFrame>> {
        self.exhausted = true;
        if self.frames_read == 0 {
            return Err(DecodeError::NoFrames { path: self.input.display().to_string() }.into());
        }
        debug!("Decoder end of stream after {} frames", self.frames_read);
        Ok(None)
    }

    /// Wait for the decoder to exit after end of stream, killing it on timeout
    pub async fn close(mut self, limit: Duration) -> u64 {
        drop(self.stdout);
        match self.child.wait_or_kill(limit).await {
            Ok(Some(status)) if !status.success() => {
                // Mid-stream exits after at least one frame are end of stream
                debug!("Decoder exited with {} after {} frames", status, self.frames_read);
            }
            Ok(_) => {}
            Err(e) => warn!("Waiting for decoder failed: {}", e),
        }
        self.frames_read
    }

    /// Tear the decoder down immediately
    pub async fn abort(mut self) {
        drop(self.stdout);
        self.child.shutdown().await;
    }
}

/// Fill `buffer` from `reader`, returning fewer bytes only at EOF
async fn read_full<R: AsyncReadExt + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_decoder_args() {
        let args = decoder_args(Path::new("in.mp4"), &DecoderOptions::default());
        assert_eq!(&args[..5], &["-hide_banner", "-loglevel", "error", "-i", "in.mp4"]);
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-fps_mode", "passthrough"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_filters_and_hwaccel() {
        let options = DecoderOptions {
            deinterlace: true,
            scale_to: Some(FrameGeometry::new(1920, 1080)),
            hwaccel: Some("cuda".to_string()),
        };
        let args = decoder_args(Path::new("in.mkv"), &options);
        assert_eq!(&args[3..5], &["-hwaccel", "cuda"]);
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "yadif=0:-1:1,scale=1920:1080");
    }

    #[tokio::test]
    async fn test_read_full_short_read() {
        let data = vec![7u8; 10];
        let mut reader = &data[..];
        let mut buffer = vec![0u8; 6];
        assert_eq!(read_full(&mut reader, &mut buffer).await.unwrap(), 6);
        assert_eq!(read_full(&mut reader, &mut buffer).await.unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buffer).await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_reads_frames_then_ends() {
        let ledger = ProcessLedger::new();
        let geometry = FrameGeometry::new(2, 2);
        let cancel = CancellationToken::new();

        // `sh -c script arg0 ...` ignores the decoder arguments and emits 2.5 frames
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake_decoder.sh");
        std::fs::write(&script, "#!/bin/sh\nhead -c 30 /dev/zero\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut source = FrameSource::spawn(
            &script,
            Path::new("in.mp4"),
            geometry,
            &DecoderOptions::default(),
            Duration::from_millis(200),
            &ledger,
        )
        .unwrap();

        assert!(source.next_frame(&cancel).await.unwrap().is_some());
        assert!(source.next_frame(&cancel).await.unwrap().is_some());
        assert!(source.next_frame(&cancel).await.unwrap().is_none());
        assert_eq!(source.close(Duration::from_secs(5)).await, 2);
        assert!(ledger.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_stream_is_fatal() {
        let ledger = ProcessLedger::new();
        let cancel = CancellationToken::new();

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("empty_decoder.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut source = FrameSource::spawn(
            &script,
            Path::new("in.mp4"),
            FrameGeometry::new(2, 2),
            &DecoderOptions::default(),
            Duration::from_millis(200),
            &ledger,
        )
        .unwrap();

        let err = source.next_frame(&cancel).await.unwrap_err();
        assert!(matches!(err, ReframeError::Decode(DecodeError::NoFrames { .. })));
        source.abort().await;
        assert!(ledger.is_empty());
    }
}
