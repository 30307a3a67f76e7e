use rayon::prelude::*;

use crate::{
    error::{Result, TransformError},
    transform::traits::{
        ExpansionMode, FrameTransform, TransformContext, TransformMetadata, TransformParams, MAX_MULTIPLIER,
    },
    video::types::RawFrame,
};

/// Frame interpolation stand-in: linear cross-fade between neighbours
///
/// For each consecutive pair (A, B) and `n` intermediates, frame `k` is
/// `A * (1 - t) + B * t` with `t = k / (n + 1)`.
pub struct BlendInterpolator;

impl BlendInterpolator {
    pub fn new() -> Self {
        Self
    }

    fn blend(a: &RawFrame, b: &RawFrame, t: f32) -> RawFrame {
        let mut out = a.clone();
        for (dst, &src) in out.as_bytes_mut().iter_mut().zip(b.as_bytes()) {
            let mixed = *dst as f32 * (1.0 - t) + src as f32 * t;
            *dst = mixed.round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

impl Default for BlendInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransform for BlendInterpolator {
    fn name(&self) -> &str {
        "interpolate"
    }

    fn description(&self) -> &str {
        "Raise the frame rate by cross-fading between consecutive frames"
    }

    fn expansion(&self, params: &TransformParams) -> ExpansionMode {
        ExpansionMode::Interleave {
            intermediates: params.intermediates(),
        }
    }

    fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>> {
        let intermediates = context.params.intermediates();
        if frames.len() < 2 || intermediates == 0 {
            return Ok(Vec::new());
        }

        let per_pair: Vec<Vec<RawFrame>> = frames
            .par_windows(2)
            .map(|pair| {
                (1..=intermediates)
                    .map(|k| {
                        let t = k as f32 / (intermediates + 1) as f32;
                        Self::blend(&pair[0], &pair[1], t)
                    })
                    .collect()
            })
            .collect();

        Ok(per_pair.into_iter().flatten().collect())
    }

    fn validate_params(&self, params: &TransformParams) -> Result<()> {
        if params.multiplier < 2 || params.multiplier > MAX_MULTIPLIER {
            return Err(TransformError::InvalidParameters {
                details: format!("multiplier must be between 2 and {}, got {}", MAX_MULTIPLIER, params.multiplier),
            }
            .into());
        }
        Ok(())
    }

    fn metadata(&self) -> TransformMetadata {
        TransformMetadata::default()
    }
}
