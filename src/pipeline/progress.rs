//! Progress reporting as one overall fraction plus a stage label

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

/// What the current job is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageLabel {
    Probing,
    ExtractingAudio,
    StartingDecoder,
    StartingEncoder,
    Processing { done: u64, total: u64 },
    FinalizingEncoder,
    RemuxingAudio,
    Done,
    Cancelled,
    Failed,
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageLabel::Probing => f.write_str("probing"),
            StageLabel::ExtractingAudio => f.write_str("extracting audio"),
            StageLabel::StartingDecoder => f.write_str("starting decoder"),
            StageLabel::StartingEncoder => f.write_str("starting encoder"),
            StageLabel::Processing { done, total } => write!(f, "processing {}/{}", done, total),
            StageLabel::FinalizingEncoder => f.write_str("finalizing encoder"),
            StageLabel::RemuxingAudio => f.write_str("remuxing audio"),
            StageLabel::Done => f.write_str("done"),
            StageLabel::Cancelled => f.write_str("cancelled"),
            StageLabel::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Overall fraction across the whole batch, in `[0, 1]`
    pub fraction: f64,
    pub stage: StageLabel,
}

/// Consumer of progress updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}

/// Overall fraction for file `file_index` of `total_files`
///
/// The per-file share is clamped so an underestimated frame count never
/// pushes progress into the next file.
pub fn overall_fraction(file_index: usize, total_files: usize, emitted: u64, expected: u64) -> f64 {
    if total_files == 0 {
        return 0.0;
    }
    let within = if expected == 0 {
        0.0
    } else {
        (emitted as f64 / expected as f64).clamp(0.0, 1.0)
    };
    ((file_index as f64 + within) / total_files as f64).clamp(0.0, 1.0)
}

/// Per-file progress counter shared with the encode stage
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    file_index: usize,
    total_files: usize,
    expected: AtomicU64,
    emitted: AtomicU64,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>, file_index: usize, total_files: usize) -> Self {
        Self {
            sink,
            file_index,
            total_files,
            expected: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    /// Set the expected output frame count once it is known
    pub fn set_expected(&self, expected: u64) {
        self.expected.store(expected, Ordering::Relaxed);
    }

    pub fn expected(&self) -> u64 {
        self.expected.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Report a stage change at the current fraction
    pub fn stage(&self, stage: StageLabel) {
        let fraction = match stage {
            StageLabel::Done => overall_fraction(self.file_index + 1, self.total_files, 0, 0),
            _ => self.fraction(),
        };
        self.sink.report(&Progress { fraction, stage });
    }

    /// Count one frame handed to the encoder and report
    pub fn frame_emitted(&self) {
        let done = self.emitted.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.expected();
        self.sink.report(&Progress {
            fraction: self.fraction(),
            stage: StageLabel::Processing { done, total },
        });
    }

    fn fraction(&self) -> f64 {
        overall_fraction(self.file_index, self.total_files, self.emitted(), self.expected())
    }
}

/// Logs stage changes and whole-percent steps
#[derive(Debug, Default)]
pub struct LogProgress {
    last_percent: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, progress: &Progress) {
        let percent = (progress.fraction * 100.0).floor() as u64;
        match progress.stage {
            StageLabel::Processing { .. } => {
                let previous = self.last_percent.swap(percent, Ordering::Relaxed);
                if percent > previous {
                    info!("{:>3}% {}", percent, progress.stage);
                }
            }
            stage => {
                self.last_percent.store(percent, Ordering::Relaxed);
                info!("{:>3}% {}", percent, stage);
            }
        }
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: &Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_overall_fraction() {
        assert_eq!(overall_fraction(0, 2, 50, 100), 0.25);
        assert_eq!(overall_fraction(1, 2, 50, 100), 0.75);
        // Undershooting estimate stays inside the file's share
        assert_eq!(overall_fraction(0, 2, 150, 100), 0.5);
        assert_eq!(overall_fraction(0, 1, 10, 0), 0.0);
        assert_eq!(overall_fraction(0, 0, 10, 10), 0.0);
    }

    #[test]
    fn test_tracker_reports_frames_and_done() {
        let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(Arc::new(move |p: &Progress| sink.lock().unwrap().push(*p)), 1, 4);

        tracker.set_expected(2);
        tracker.stage(StageLabel::StartingDecoder);
        tracker.frame_emitted();
        tracker.frame_emitted();
        tracker.stage(StageLabel::Done);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].fraction, 0.25);
        assert_eq!(seen[1].stage, StageLabel::Processing { done: 1, total: 2 });
        assert_eq!(seen[1].fraction, 0.375);
        assert_eq!(seen[3].fraction, 0.5);
        assert_eq!(seen[3].stage.to_string(), "done");
    }

    #[test]
    fn test_labels() {
        assert_eq!(StageLabel::Processing { done: 3, total: 9 }.to_string(), "processing 3/9");
        assert_eq!(StageLabel::RemuxingAudio.to_string(), "remuxing audio");
    }
}
