use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TransformError},
    transform::mask::MaskRegion,
    video::types::{FrameGeometry, RawFrame},
};

/// Largest interpolation multiplier accepted
pub const MAX_MULTIPLIER: u32 = 10;

/// Largest enhancement scale accepted
pub const MAX_SCALE: u32 = 8;

/// How a transform maps input frames to output frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionMode {
    /// One output frame per input frame
    OneToOne,

    /// Each consecutive pair (A, B) yields `intermediates` frames placed
    /// between A and B. The originals pass through unchanged.
    Interleave { intermediates: usize },
}

/// Core trait that every frame transform must implement
///
/// A transform wraps an expensive, already-loaded operation (usually a model
/// on an accelerator). The pipeline never calls it re-entrantly: at most one
/// batch is in flight at a time.
pub trait FrameTransform: Send {
    /// Returns the unique name of this transform
    fn name(&self) -> &str;

    /// Returns a human-readable description of this transform
    fn description(&self) -> &str;

    /// How output frames relate to input frames for `params`
    fn expansion(&self, params: &TransformParams) -> ExpansionMode {
        let _ = params;
        ExpansionMode::OneToOne
    }

    /// Geometry of the frames this transform produces
    fn output_geometry(&self, input: FrameGeometry, params: &TransformParams) -> FrameGeometry {
        let _ = params;
        input
    }

    /// Transform a batch of consecutive frames
    ///
    /// # Arguments
    ///
    /// * `frames` - Consecutive input frames, in stream order
    /// * `context` - Job-scoped parameters and the time of each input frame
    ///
    /// # Returns
    ///
    /// For [`ExpansionMode::OneToOne`], exactly `frames.len()` frames.
    /// For [`ExpansionMode::Interleave`], only the synthesized frames:
    /// `intermediates` per consecutive pair, grouped by pair in order.
    fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>>;

    /// Validate that the given parameters are usable by this transform
    fn validate_params(&self, params: &TransformParams) -> Result<()> {
        let _ = params;
        Ok(())
    }

    /// Get transform-specific metadata or capabilities
    fn metadata(&self) -> TransformMetadata {
        TransformMetadata::default()
    }

    /// Acquire resources; called when the transform is installed
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release resources; called when the transform is unloaded
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Job-scoped transform parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParams {
    /// Enhancement scale factor
    pub scale: u32,

    /// Interpolation frame-rate multiplier
    pub multiplier: u32,

    /// Inpainting mask regions; empty means the default region
    pub regions: Vec<MaskRegion>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            scale: 2,
            multiplier: 2,
            regions: Vec::new(),
        }
    }
}

impl TransformParams {
    pub fn with_scale(scale: u32) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn with_multiplier(multiplier: u32) -> Self {
        Self {
            multiplier,
            ..Self::default()
        }
    }

    pub fn with_regions(regions: Vec<MaskRegion>) -> Self {
        Self {
            regions,
            ..Self::default()
        }
    }

    /// Synthesized frames per pair, from the multiplier clamped to 1..=10
    pub fn intermediates(&self) -> usize {
        (self.multiplier.clamp(1, MAX_MULTIPLIER) - 1) as usize
    }
}

/// Everything a transform call needs besides the frames themselves
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub params: Arc<TransformParams>,

    /// Geometry of the input frames
    pub input: FrameGeometry,

    /// Geometry the transform must produce
    pub output: FrameGeometry,

    /// Presentation time in seconds of each input frame of this call
    pub frame_times: Vec<f64>,

    /// Source frame rate
    pub frame_rate: f64,
}

impl TransformContext {
    /// Context for `len` frames starting at stream index `first_index`
    pub fn for_frames(
        params: Arc<TransformParams>,
        input: FrameGeometry,
        output: FrameGeometry,
        frame_rate: f64,
        first_index: u64,
        len: usize,
    ) -> Self {
        let frame_times = (0..len as u64)
            .map(|i| {
                if frame_rate > 0.0 {
                    (first_index + i) as f64 / frame_rate
                } else {
                    0.0
                }
            })
            .collect();

        Self {
            params,
            input,
            output,
            frame_times,
            frame_rate,
        }
    }

    /// Narrow the context to `len` frames starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let end = (offset + len).min(self.frame_times.len());
        let start = offset.min(end);
        Self {
            params: Arc::clone(&self.params),
            input: self.input,
            output: self.output,
            frame_times: self.frame_times[start..end].to_vec(),
            frame_rate: self.frame_rate,
        }
    }

    /// Time of the frame at `index` within this call
    pub fn time_of(&self, index: usize) -> f64 {
        self.frame_times.get(index).copied().unwrap_or(0.0)
    }
}

/// Metadata about a transform's capabilities and characteristics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformMetadata {
    /// Upper bound on frames per call, if the operation has one
    pub max_batch: Option<usize>,
}

/// A loaded transform shared between the slot and the running job
pub type SharedTransform = Arc<std::sync::Mutex<Box<dyn FrameTransform>>>;

/// Check a returned batch against the frame geometry the job expects
pub fn check_output(frames: &[RawFrame], expected_count: usize, geometry: FrameGeometry) -> Result<()> {
    if frames.len() != expected_count {
        return Err(TransformError::OutputCountMismatch {
            expected: expected_count,
            actual: frames.len(),
        }
        .into());
    }

    let expected = geometry.frame_size();
    if let Some(bad) = frames.iter().find(|f| f.as_bytes().len() != expected || f.geometry() != geometry) {
        return Err(TransformError::FrameSizeMismatch {
            expected,
            actual: bad.as_bytes().len(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediates_clamped() {
        assert_eq!(TransformParams::with_multiplier(0).intermediates(), 0);
        assert_eq!(TransformParams::with_multiplier(1).intermediates(), 0);
        assert_eq!(TransformParams::with_multiplier(2).intermediates(), 1);
        assert_eq!(TransformParams::with_multiplier(25).intermediates(), 9);
    }

    #[test]
    fn test_context_times_and_slice() {
        let geometry = FrameGeometry::new(2, 2);
        let context = TransformContext::for_frames(
            Arc::new(TransformParams::default()),
            geometry,
            geometry,
            10.0,
            20,
            4,
        );
        assert_eq!(context.frame_times, vec![2.0, 2.1, 2.2, 2.3]);

        let single = context.slice(1, 1);
        assert_eq!(single.frame_times.len(), 1);
        assert!((single.time_of(0) - 2.1).abs() < 1e-9);
        assert_eq!(context.slice(3, 5).frame_times.len(), 1);
    }

    #[test]
    fn test_check_output() {
        let geometry = FrameGeometry::new(2, 2);
        let good = vec![RawFrame::black(geometry); 3];
        assert!(check_output(&good, 3, geometry).is_ok());
        assert!(check_output(&good, 2, geometry).is_err());

        let wrong = vec![RawFrame::black(FrameGeometry::new(4, 4))];
        assert!(check_output(&wrong, 1, geometry).is_err());
    }

    #[test]
    fn test_params_from_toml() {
        let params: TransformParams = toml::from_str("multiplier = 4").unwrap();
        assert_eq!(params.multiplier, 4);
        assert_eq!(params.scale, 2);
        assert!(params.regions.is_empty());
    }
}
