//! Batch and queue sizing from per-frame memory footprint

use tracing::{info, warn};

use crate::transform::traits::ExpansionMode;

const MIB: usize = 1024 * 1024;

/// Estimated peak above which a memory advisory is logged
pub const MEMORY_ADVISORY_BYTES: usize = 4 * 1024 * MIB;

/// Frames per transform call and bounded queue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub queue_depth: usize,
}

impl BatchPolicy {
    /// Larger frames get smaller batches and shallower queues
    pub fn for_frame_bytes(frame_bytes: usize) -> Self {
        let (batch_size, queue_depth) = if frame_bytes > 50 * MIB {
            (2, 4)
        } else if frame_bytes > 20 * MIB {
            (4, 6)
        } else if frame_bytes > 8 * MIB {
            (8, 10)
        } else {
            (12, 16)
        };
        Self { batch_size, queue_depth }
    }

    /// Apply explicit configuration overrides
    pub fn with_overrides(self, batch_size: Option<usize>, queue_depth: Option<usize>) -> Self {
        Self {
            batch_size: batch_size.unwrap_or(self.batch_size).max(1),
            queue_depth: queue_depth.unwrap_or(self.queue_depth).max(1),
        }
    }

    /// Respect a transform's own per-call limit
    pub fn capped(self, max_batch: Option<usize>) -> Self {
        match max_batch {
            Some(limit) => Self {
                batch_size: self.batch_size.min(limit.max(1)),
                ..self
            },
            None => self,
        }
    }

    /// Frames held at once: one batch plus both queues full
    pub fn estimated_peak_bytes(&self, frame_bytes: usize) -> usize {
        frame_bytes.saturating_mul(self.batch_size + 2 * self.queue_depth)
    }

    /// Log the sizing decision, warning when the peak estimate is large
    pub fn log_decision(&self, frame_bytes: usize) {
        let peak = self.estimated_peak_bytes(frame_bytes);
        info!(
            "Frame size {:.1} MB: batch size {}, queue depth {} (peak ~{} MB)",
            frame_bytes as f64 / MIB as f64,
            self.batch_size,
            self.queue_depth,
            peak / MIB
        );
        if peak > MEMORY_ADVISORY_BYTES {
            warn!(
                "Estimated peak frame memory {} MB is high; lower the scale or set pipeline.batch_size",
                peak / MIB
            );
        }
    }
}

/// Total output frames for `input_frames` decoded frames
pub fn expected_output_frames(input_frames: u64, mode: ExpansionMode) -> u64 {
    match mode {
        ExpansionMode::OneToOne => input_frames,
        ExpansionMode::Interleave { intermediates } => {
            if input_frames == 0 {
                0
            } else {
                input_frames + (input_frames - 1) * intermediates as u64
            }
        }
    }
}
