//! # Frame Transform System
//!
//! The pluggable per-frame operation and the batching stage that drives it.
//!
//! ## Built-in Transforms
//!
//! - **enhance**: upscale by an integer factor
//! - **interpolate**: synthesize frames between each consecutive pair
//! - **inpaint**: fill time-tagged mask regions
//!
//! The built-ins are CPU reference implementations. Real models plug in by
//! implementing [`FrameTransform`] and installing into a [`ModelSlot`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reframe::transform::{ModelSlot, TransformRegistry};
//!
//! # async fn load() -> reframe::Result<()> {
//! let registry = TransformRegistry::new();
//! let slot = ModelSlot::new();
//! if let Some(transform) = registry.create("enhance") {
//!     slot.install(transform).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod mask;
pub mod registry;
pub mod slot;
pub mod stage;
pub mod traits;

// Transform implementations
pub mod enhance;
pub mod inpaint;
pub mod interpolate;

// Re-exports for convenience
pub use batch::{expected_output_frames, BatchPolicy};
pub use mask::{Mask, MaskRegion, RegionFile};
pub use registry::TransformRegistry;
pub use slot::{ModelLease, ModelSlot};
pub use stage::{StagePlan, StageSettings, StageStats, TransformStage};
pub use traits::{ExpansionMode, FrameTransform, SharedTransform, TransformContext, TransformMetadata, TransformParams};

pub use enhance::ResampleEnhancer;
pub use inpaint::MaskFillInpainter;
pub use interpolate::BlendInterpolator;
