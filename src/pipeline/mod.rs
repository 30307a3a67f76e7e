//! # Pipeline
//!
//! Runs one job per input file: probe, then decode, transform and encode
//! concurrently over two bounded queues, then restore the audio track.
//!
//! ```text
//! decoder ──▶ [raw frames] ──▶ transform ──▶ [transformed frames] ──▶ encoder
//! ```
//!
//! A single cancellation token reaches every stage. Stages poll it at each
//! queue operation and each pipe read or write.

pub mod coordinator;
pub mod job;
pub mod progress;
pub mod queue;
pub mod state;

pub use coordinator::PipelineCoordinator;
pub use job::{BatchReport, JobOutcome, JobReport, JobRequest, Notice, PipelineJob};
pub use progress::{LogProgress, NoProgress, Progress, ProgressSink, ProgressTracker, StageLabel};
pub use state::JobState;
