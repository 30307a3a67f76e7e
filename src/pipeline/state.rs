use std::fmt;
use std::time::Instant;

/// Lifecycle of a single file job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Probing,
    Running { started_at: Instant },
    Remuxing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Check whether moving to `next` is allowed
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;

        match (self, next) {
            (Idle, Probing) => true,
            (Probing, Running { .. }) | (Probing, Failed) | (Probing, Cancelled) => true,
            (Running { .. }, Remuxing)
            | (Running { .. }, Completed)
            | (Running { .. }, Cancelled)
            | (Running { .. }, Failed) => true,
            (Remuxing, Completed) | (Remuxing, Cancelled) => true,
            // Publishing the video-only fallback can still fail on I/O
            (Remuxing, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }

    pub fn description(&self) -> &'static str {
        match self {
            JobState::Idle => "waiting to start",
            JobState::Probing => "reading video metadata",
            JobState::Running { .. } => "transforming frames",
            JobState::Remuxing => "restoring audio track",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running { started_at } => {
                write!(f, "{} ({:.1}s)", self.description(), started_at.elapsed().as_secs_f64())
            }
            _ => f.write_str(self.description()),
        }
    }
}
