//! # Reframe
//!
//! Streaming per-frame video transforms: upscale, interpolate or inpaint a
//! video through an ffmpeg decoder, a batched transform and an ffmpeg
//! encoder, while the audio track is carried across untouched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reframe::{
//!     config::Config,
//!     pipeline::{JobRequest, PipelineCoordinator},
//!     transform::{ModelSlot, TransformParams, TransformRegistry},
//!     video::StaticEncoders,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let registry = TransformRegistry::new();
//! let transform = registry.create("enhance").ok_or_else(|| anyhow::anyhow!("missing transform"))?;
//! let model = ModelSlot::with_transform(transform).await?;
//!
//! let coordinator = PipelineCoordinator::new(config, model, Arc::new(StaticEncoders::default()));
//! let request = JobRequest::new("input.mp4", "input_enhanced.mp4");
//! let report = coordinator
//!     .run_batch(&[request], TransformParams::with_scale(2), &CancellationToken::new())
//!     .await;
//!
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - probing, decoder/encoder process wrappers, frame types
//! - [`transform`] - the transform capability, batching and fallback
//! - [`audio`] - lossless audio extraction and remux
//! - [`pipeline`] - job state, bounded queues, progress, the coordinator
//! - [`config`] - configuration management
//!
//! ## Custom Transforms
//!
//! Real models plug in by implementing [`FrameTransform`](transform::FrameTransform):
//!
//! ```rust,no_run
//! use reframe::transform::{FrameTransform, TransformContext};
//! use reframe::video::RawFrame;
//! use reframe::Result;
//!
//! struct Denoiser;
//!
//! impl FrameTransform for Denoiser {
//!     fn name(&self) -> &str {
//!         "denoise"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "Neural denoiser"
//!     }
//!
//!     fn transform_batch(&mut self, frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
//!         Ok(frames.to_vec())
//!     }
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod transform;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{ReframeError, Result},
    pipeline::PipelineCoordinator,
    transform::{FrameTransform, TransformRegistry},
};
