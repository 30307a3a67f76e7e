use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::OutputConfig,
    error::{ReframeError, Result},
    pipeline::state::JobState,
    transform::traits::TransformParams,
    video::types::VideoDescriptor,
};

/// One input file and where its output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl JobRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Request with the output named after the input and transform
    pub fn named(input: impl Into<PathBuf>, output: &OutputConfig, transform: &str) -> Self {
        let input = input.into();
        let output = output.output_path_for(&input, transform);
        Self { input, output }
    }
}

/// A degraded condition the job continued through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SoftwareEncoder { reason: String },
    AudioExtractionFailed { reason: String },
    AudioRemuxFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SoftwareEncoder { reason } => write!(f, "software encoder used: {}", reason),
            Notice::AudioExtractionFailed { reason } => {
                write!(f, "audio could not be extracted, output has no audio: {}", reason)
            }
            Notice::AudioRemuxFailed { reason } => {
                write!(f, "audio could not be remuxed, output has no audio: {}", reason)
            }
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed(ReframeError),
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Cancelled => "cancelled",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

/// Everything the coordinator knows about one file once its job ends
#[derive(Debug)]
pub struct JobReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: JobOutcome,
    pub notices: Vec<Notice>,
    pub frames_decoded: u64,
    pub frames_written: u64,
    pub encoder: Option<String>,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, JobOutcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}

/// Mutable state of one file while it is being processed
pub struct PipelineJob {
    pub request: JobRequest,
    pub params: Arc<TransformParams>,
    pub descriptor: Option<VideoDescriptor>,
    /// Child of the batch token; a failing stage cancels only this job
    pub cancel: CancellationToken,
    pub frames_decoded: u64,
    pub frames_written: u64,
    pub encoder: Option<String>,
    state: JobState,
    notices: Vec<Notice>,
    started: Instant,
}

impl PipelineJob {
    pub fn new(request: JobRequest, params: Arc<TransformParams>, cancel: CancellationToken) -> Self {
        Self {
            request,
            params,
            descriptor: None,
            cancel,
            frames_decoded: 0,
            frames_written: 0,
            encoder: None,
            state: JobState::Idle,
            notices: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`; invalid transitions are logged and ignored
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(&next) {
            warn!("Ignoring job transition from {:?} to {:?}", self.state, next);
            return false;
        }
        debug!("{}: {} -> {}", self.request.input.display(), self.state.description(), next.description());
        self.state = next;
        true
    }

    pub fn notice(&mut self, notice: Notice) {
        warn!("{}: {}", self.request.input.display(), notice);
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn into_report(self, outcome: JobOutcome) -> JobReport {
        JobReport {
            input: self.request.input,
            output: self.request.output,
            outcome,
            notices: self.notices,
            frames_decoded: self.frames_decoded,
            frames_written: self.frames_written,
            encoder: self.encoder,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Per-file outcomes of a batch run
#[derive(Debug)]
pub struct BatchReport {
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            finished_at: None,
            jobs: Vec::new(),
        }
    }

    pub fn push(&mut self, report: JobReport) {
        self.jobs.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_failed()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_cancelled()).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} cancelled",
            self.succeeded(),
            self.failed(),
            self.cancelled()
        )
    }
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Private scratch directory for one job, removed on drop
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    /// Create a hidden scratch directory inside `parent`
    pub fn create(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(".reframe-").tempdir_in(parent)?;
        debug!("Created job workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Encoder target used when audio is remuxed afterwards
    pub fn video_path(&self, output: &Path) -> PathBuf {
        let extension = output.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        self.dir.path().join(format!("video.{}", extension))
    }

    pub fn audio_path(&self) -> PathBuf {
        self.dir.path().join("audio.mka")
    }

    /// Remove the directory now, logging instead of failing
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed job workspace {}", path.display()),
            Err(e) => warn!("Failed to remove job workspace {}: {}", path.display(), e),
        }
    }
}

/// Deletes the final output on drop unless the job committed it
pub struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: false,
        }
    }

    /// Start owning the output path; call right before anything writes it
    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the output
    pub fn commit(mut self) {
        self.armed = false;
        info!("Output written to {}", self.path.display());
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Removed partial output {}", self.path.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", self.path.display(), e),
        }
    }
}

/// Move `source` to `destination`, copying across filesystems
pub fn publish(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    fs::copy(source, destination)?;
    fs::remove_file(source)
}
