use rayon::prelude::*;

use crate::{
    error::Result,
    transform::mask::{Mask, PixelRect},
    transform::traits::{FrameTransform, TransformContext, TransformMetadata},
    video::types::RawFrame,
};

/// Inpainting stand-in: fills each masked column by interpolating between
/// the nearest unmasked pixels above and below the rectangle
pub struct MaskFillInpainter;

impl MaskFillInpainter {
    pub fn new() -> Self {
        Self
    }

    fn fill(frame: &mut RawFrame, mask: &Mask) {
        for rect in mask.rects() {
            Self::fill_rect(frame, rect);
        }
    }

    fn fill_rect(frame: &mut RawFrame, rect: &PixelRect) {
        let height = frame.height();
        let above = rect.top.checked_sub(1);
        let below = if rect.bottom < height { Some(rect.bottom) } else { None };
        let span = (rect.bottom - rect.top + 1) as f32;

        for x in rect.left..rect.right {
            let top_color = above.map(|y| frame.get_pixel(x, y));
            let bottom_color = below.map(|y| frame.get_pixel(x, y));

            let (from, to) = match (top_color, bottom_color) {
                (Some(a), Some(b)) => (a, b),
                (Some(a), None) => (a, a),
                (None, Some(b)) => (b, b),
                (None, None) => ([0, 0, 0], [0, 0, 0]),
            };

            for y in rect.top..rect.bottom {
                let t = (y - rect.top + 1) as f32 / span;
                let color = [
                    lerp(from[0], to[0], t),
                    lerp(from[1], to[1], t),
                    lerp(from[2], to[2], t),
                ];
                frame.set_pixel(x, y, color);
            }
        }
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8
}

impl Default for MaskFillInpainter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransform for MaskFillInpainter {
    fn name(&self) -> &str {
        "inpaint"
    }

    fn description(&self) -> &str {
        "Remove subtitles or watermarks inside time-tagged mask regions"
    }

    fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>> {
        let regions = &context.params.regions;
        let geometry = context.input;

        Ok(frames
            .par_iter()
            .enumerate()
            .map(|(i, frame)| {
                let mask = Mask::for_time(geometry, regions, context.time_of(i));
                let mut out = frame.clone();
                if !mask.is_empty() {
                    Self::fill(&mut out, &mask);
                }
                out
            })
            .collect())
    }

    fn metadata(&self) -> TransformMetadata {
        TransformMetadata::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::mask::MaskRegion;
    use crate::transform::traits::TransformParams;
    use crate::video::types::FrameGeometry;
    use std::sync::Arc;

    fn striped(geometry: FrameGeometry) -> RawFrame {
        let mut frame = RawFrame::filled(geometry, [10, 10, 10]);
        for x in 0..geometry.width {
            frame.set_pixel(x, 2, [255, 255, 255]);
        }
        frame
    }

    #[test]
    fn test_default_region_fills_bottom() {
        let mut inpainter = MaskFillInpainter::new();
        let geometry = FrameGeometry::new(4, 8);
        let mut frame = RawFrame::filled(geometry, [10, 10, 10]);
        frame.set_pixel(1, 7, [255, 0, 0]);

        let context = TransformContext::for_frames(Arc::new(TransformParams::default()), geometry, geometry, 25.0, 0, 1);
        let result = inpainter.transform_batch(&[frame], &context).unwrap();

        // The subtitle pixel in the bottom quarter is replaced by its surroundings
        assert_eq!(result[0].get_pixel(1, 7), [10, 10, 10]);
    }

    #[test]
    fn test_inactive_region_leaves_frame_untouched() {
        let mut inpainter = MaskFillInpainter::new();
        let geometry = FrameGeometry::new(4, 6);
        let params = TransformParams::with_regions(vec![MaskRegion::new(0, 1, 4, 4).between(10.0, 20.0)]);

        let context = TransformContext::for_frames(Arc::new(params), geometry, geometry, 1.0, 0, 2);
        let frames = vec![striped(geometry), striped(geometry)];
        let result = inpainter.transform_batch(&frames, &context).unwrap();
        assert_eq!(result, frames);
    }

    #[test]
    fn test_active_region_is_filled() {
        let mut inpainter = MaskFillInpainter::new();
        let geometry = FrameGeometry::new(4, 6);
        let params = TransformParams::with_regions(vec![MaskRegion::new(0, 1, 4, 4).between(0.0, 1.0)]);

        let context = TransformContext::for_frames(Arc::new(params), geometry, geometry, 1.0, 0, 1);
        let result = inpainter.transform_batch(&[striped(geometry)], &context).unwrap();
        assert_eq!(result[0].get_pixel(2, 2), [10, 10, 10]);
        assert_eq!(result.len(), 1);
    }
}
