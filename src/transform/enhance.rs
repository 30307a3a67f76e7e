use image::imageops::{self, FilterType};
use rayon::prelude::*;

use crate::{
    error::{Result, TransformError},
    transform::traits::{FrameTransform, TransformContext, TransformParams, MAX_SCALE},
    video::types::{FrameGeometry, RawFrame},
};

/// Super-resolution stand-in: Lanczos resampling by an integer factor
///
/// Useful as a default when no model is installed and as a deterministic
/// transform in tests and benchmarks.
pub struct ResampleEnhancer {
    filter: FilterType,
}

impl ResampleEnhancer {
    pub fn new() -> Self {
        Self::with_filter(FilterType::Lanczos3)
    }

    /// Use a cheaper resampling filter
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    fn upscale(&self, frame: &RawFrame, target: FrameGeometry) -> RawFrame {
        if frame.geometry() == target {
            return frame.clone();
        }
        let image = frame.to_image();
        RawFrame::from_image(imageops::resize(&image, target.width, target.height, self.filter))
    }
}

impl Default for ResampleEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransform for ResampleEnhancer {
    fn name(&self) -> &str {
        "enhance"
    }

    fn description(&self) -> &str {
        "Upscale frames by an integer factor with Lanczos resampling"
    }

    fn output_geometry(&self, input: FrameGeometry, params: &TransformParams) -> FrameGeometry {
        input.scaled(params.scale.clamp(1, MAX_SCALE))
    }

    fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>> {
        let target = context.output;
        Ok(frames.par_iter().map(|frame| self.upscale(frame, target)).collect())
    }

    fn validate_params(&self, params: &TransformParams) -> Result<()> {
        if params.scale == 0 || params.scale > MAX_SCALE {
            return Err(TransformError::InvalidParameters {
                details: format!("scale must be between 1 and {}, got {}", MAX_SCALE, params.scale),
            }
            .into());
        }
        Ok(())
    }
}
