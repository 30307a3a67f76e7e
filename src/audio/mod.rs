//! # Audio Side-Channel
//!
//! The source audio never passes through the frame pipeline. It is copied
//! out of the input before decoding starts and muxed back into the encoded
//! video afterwards, both without re-encoding.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use reframe::audio::AudioSideChannel;
//! use reframe::video::ProcessLedger;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> reframe::Result<()> {
//! let channel = AudioSideChannel::new("ffmpeg", Duration::from_secs(300), Duration::from_millis(500), ProcessLedger::new());
//! let cancel = CancellationToken::new();
//!
//! let audio = channel.extract(Path::new("in.mp4"), Path::new("/tmp/audio.mka"), &cancel).await?;
//! channel.remux(Path::new("/tmp/video.mp4"), &audio, Path::new("out.mp4"), &cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod side_channel;

pub use side_channel::{AudioSideChannel, ExtractedAudio};
