//! Per-file job orchestration and multi-file batch runs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSideChannel,
    config::Config,
    error::{ConfigError, ReframeError, Result, Severity, TransformError},
    pipeline::{
        job::{publish, BatchReport, JobOutcome, JobReport, JobRequest, JobWorkspace, Notice, OutputGuard, PipelineJob},
        progress::{NoProgress, ProgressSink, ProgressTracker, StageLabel},
        queue::{self, RetryPolicy},
        state::JobState,
    },
    transform::{
        batch::{expected_output_frames, BatchPolicy},
        slot::ModelSlot,
        stage::{StagePlan, StageSettings, StageStats, TransformStage},
        traits::{ExpansionMode, TransformParams},
    },
    video::{
        encoder::{select_encoder, EncoderCapabilities, EncoderChoice},
        probe::VideoProbe,
        process::ProcessLedger,
        sink::{EncodeSummary, FrameSink, SinkTarget},
        source::{DecoderOptions, FrameSource},
        types::{RawFrame, VideoDescriptor},
    },
};

/// Runs jobs against the transform installed in a [`ModelSlot`]
pub struct PipelineCoordinator {
    config: Config,
    probe: VideoProbe,
    audio: AudioSideChannel,
    encoders: Arc<dyn EncoderCapabilities>,
    model: ModelSlot,
    ledger: ProcessLedger,
    progress: Arc<dyn ProgressSink>,
}

/// What the three concurrent stages produced
struct StageResults {
    decoded: u64,
    stats: StageStats,
    summary: EncodeSummary,
}

impl PipelineCoordinator {
    pub fn new(config: Config, model: ModelSlot, encoders: Arc<dyn EncoderCapabilities>) -> Self {
        let ledger = ProcessLedger::new();
        let probe = VideoProbe::new(&config.tools.ffprobe, config.pipeline.probe_timeout());
        let audio = AudioSideChannel::new(
            &config.tools.ffmpeg,
            config.pipeline.tool_timeout(),
            config.pipeline.process_grace(),
            ledger.clone(),
        );

        Self {
            config,
            probe,
            audio,
            encoders,
            model,
            ledger,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// External processes currently owned by this coordinator
    pub fn ledger(&self) -> &ProcessLedger {
        &self.ledger
    }

    /// Process `requests` one after another
    ///
    /// A failed file does not stop the run. Once `cancel` fires, the current
    /// file is cancelled and every remaining file is reported as cancelled.
    pub async fn run_batch(&self, requests: &[JobRequest], params: TransformParams, cancel: &CancellationToken) -> BatchReport {
        let params = Arc::new(params);
        let total = requests.len();
        let mut report = BatchReport::new();

        info!("Starting batch of {} file(s)", total);

        for (index, request) in requests.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Skipping {}: run cancelled", request.input.display());
                let skipped = PipelineJob::new(request.clone(), Arc::clone(&params), cancel.child_token());
                report.push(skipped.into_report(JobOutcome::Cancelled));
                continue;
            }

            let job = self.run_job(request.clone(), Arc::clone(&params), index, total, cancel).await;
            report.push(job);
        }

        report.finish();
        info!("Batch finished: {}", report.summary());
        report
    }

    /// Process a single file to completion, cancellation or failure
    pub async fn run_job(
        &self,
        request: JobRequest,
        params: Arc<TransformParams>,
        file_index: usize,
        total_files: usize,
        cancel: &CancellationToken,
    ) -> JobReport {
        let tracker = Arc::new(ProgressTracker::new(Arc::clone(&self.progress), file_index, total_files));
        let mut job = PipelineJob::new(request, params, cancel.child_token());

        let result = self.execute(&mut job, &tracker).await;

        let outcome = match result {
            Ok(()) => {
                tracker.stage(StageLabel::Done);
                info!(
                    "Completed {} -> {} ({} frames in {:.1}s)",
                    job.request.input.display(),
                    job.request.output.display(),
                    job.frames_written,
                    job.elapsed().as_secs_f64()
                );
                JobOutcome::Completed
            }
            Err(e) if e.severity() == Severity::Cancelled || cancel.is_cancelled() => {
                job.transition(JobState::Cancelled);
                tracker.stage(StageLabel::Cancelled);
                info!("Cancelled {}", job.request.input.display());
                JobOutcome::Cancelled
            }
            Err(e) => {
                job.transition(JobState::Failed);
                tracker.stage(StageLabel::Failed);
                error!("Failed {}: {}", job.request.input.display(), e.user_message());
                JobOutcome::Failed(e)
            }
        };

        // Every child is reaped or killed on drop by now
        if !self.ledger.is_empty() {
            warn!("External processes still registered after job: {:?}", self.ledger.live());
        }

        job.into_report(outcome)
    }

    async fn execute(&self, job: &mut PipelineJob, tracker: &Arc<ProgressTracker>) -> Result<()> {
        job.transition(JobState::Probing);
        tracker.stage(StageLabel::Probing);

        let input = job.request.input.clone();
        let output = job.request.output.clone();
        if input == output {
            return Err(ConfigError::InvalidValue {
                key: "output".to_string(),
                value: output.display().to_string(),
            }
            .into());
        }

        let descriptor = tokio::select! {
            probed = self.probe.probe(&input) => probed?,
            _ = job.cancel.cancelled() => return Err(ReframeError::Cancelled),
        };
        job.descriptor = Some(descriptor.clone());

        // Held until the job and its last model call end so the model cannot be swapped underneath it
        let lease = Arc::new(self.model.lease().await?);

        let (name, mode, output_geometry, max_batch) = lease.with_model(|model| {
            model.validate_params(&job.params)?;
            Ok::<_, ReframeError>((
                model.name().to_string(),
                model.expansion(&job.params),
                model.output_geometry(descriptor.geometry, &job.params),
                model.metadata().max_batch,
            ))
        })?;

        if matches!(mode, ExpansionMode::Interleave { .. }) && output_geometry != descriptor.geometry {
            return Err(TransformError::InvalidParameters {
                details: format!("'{}' interleaves frames but changes geometry to {}", name, output_geometry),
            }
            .into());
        }

        let expected = expected_output_frames(descriptor.estimated_frames(), mode);
        tracker.set_expected(expected);

        let output_rate = match mode {
            ExpansionMode::OneToOne => descriptor.frame_rate,
            ExpansionMode::Interleave { intermediates } => descriptor.frame_rate.multiplied(intermediates as u64 + 1),
        };

        let frame_bytes = output_geometry.frame_size();
        let policy = BatchPolicy::for_frame_bytes(frame_bytes)
            .with_overrides(self.config.pipeline.batch_size, self.config.pipeline.queue_depth)
            .capped(max_batch);
        policy.log_decision(frame_bytes);

        let choice = select_encoder(&self.encoders.accelerated_encoders(), output_geometry, &self.config.encoder);
        if let Some(reason) = &choice.degraded {
            job.notice(Notice::SoftwareEncoder { reason: reason.clone() });
        }
        job.encoder = Some(choice.encoder.clone());

        info!(
            "Processing {} -> {} with '{}': {} @ {} fps -> {} @ {} fps, ~{} output frames",
            input.display(),
            output.display(),
            name,
            descriptor.geometry,
            descriptor.frame_rate,
            output_geometry,
            output_rate,
            expected
        );

        let output_dir = parent_dir(&output);
        tokio::fs::create_dir_all(&output_dir).await?;
        let work_parent = self.config.pipeline.work_dir.clone().unwrap_or(output_dir);
        let workspace = JobWorkspace::create(&work_parent)?;
        let mut guard = OutputGuard::new(&output);

        let audio = if self.config.audio.enabled && descriptor.has_audio {
            tracker.stage(StageLabel::ExtractingAudio);
            match self.audio.extract(&input, &workspace.audio_path(), &job.cancel).await {
                Ok(audio) => Some(audio),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    job.notice(Notice::AudioExtractionFailed { reason: e.to_string() });
                    None
                }
            }
        } else {
            debug!("No audio to carry for {}", input.display());
            None
        };

        // The encoder writes the final path directly unless a remux follows
        let encoded = match audio {
            Some(_) => workspace.video_path(&output),
            None => output.clone(),
        };
        let final_guard = audio.is_none().then_some(&mut guard);

        job.transition(JobState::Running {
            started_at: Instant::now(),
        });

        let plan = StagePlan {
            name,
            mode,
            params: Arc::clone(&job.params),
            input: descriptor.geometry,
            output: output_geometry,
            frame_rate: descriptor.frame_rate.as_f64(),
            batch_size: policy.batch_size,
        };
        let target = SinkTarget {
            geometry: output_geometry,
            frame_rate: output_rate,
            output: encoded.clone(),
        };

        let stage = TransformStage::new(Arc::clone(&lease), plan, StageSettings::from_config(&self.config.pipeline));
        let results = self
            .run_stages(&descriptor, stage, target, &choice, policy, final_guard, &job.cancel, tracker)
            .await?;

        job.frames_decoded = results.decoded;
        job.frames_written = results.summary.frames_written;
        if results.summary.frames_written != expected {
            debug!(
                "Wrote {} frames against an estimate of {} ({} batches, {} fallbacks)",
                results.summary.frames_written, expected, results.stats.batches, results.stats.fallbacks
            );
        }

        if let Some(audio) = audio {
            job.transition(JobState::Remuxing);
            tracker.stage(StageLabel::RemuxingAudio);
            guard.arm();

            match self.audio.remux(&encoded, &audio, &output, &job.cancel).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    job.notice(Notice::AudioRemuxFailed { reason: e.to_string() });
                    publish(&encoded, &output)?;
                }
            }
        }

        guard.commit();
        workspace.close();
        job.transition(JobState::Completed);
        Ok(())
    }

    /// Run decode, transform and encode concurrently until all three exit
    #[allow(clippy::too_many_arguments)]
    async fn run_stages(
        &self,
        descriptor: &VideoDescriptor,
        stage: TransformStage,
        target: SinkTarget,
        choice: &EncoderChoice,
        policy: BatchPolicy,
        output_guard: Option<&mut OutputGuard>,
        cancel: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<StageResults> {
        let pipeline = &self.config.pipeline;
        let grace = pipeline.process_grace();

        tracker.stage(StageLabel::StartingDecoder);
        let options = DecoderOptions {
            deinterlace: self.config.decoder.deinterlace,
            scale_to: descriptor.needs_scale().then_some(descriptor.geometry),
            hwaccel: self.config.decoder.hwaccel.clone(),
        };
        let source = FrameSource::spawn(&self.config.tools.ffmpeg, &descriptor.path, descriptor.geometry, &options, grace, &self.ledger)?;

        tracker.stage(StageLabel::StartingEncoder);
        let sink = match FrameSink::spawn(&self.config.tools.ffmpeg, target, choice, &self.config.encoder, grace, &self.ledger) {
            Ok(sink) => sink,
            Err(e) => {
                source.abort().await;
                return Err(e);
            }
        };
        // Only a file the encoder has started writing is ours to remove
        if let Some(guard) = output_guard {
            guard.arm();
        }

        let (raw_tx, raw_rx) = queue::bounded::<RawFrame>(policy.queue_depth);
        let (out_tx, out_rx) = queue::bounded::<RawFrame>(policy.queue_depth);

        let decode = tokio::spawn(stop_on_error(
            decode_frames(
                source,
                raw_tx,
                RetryPolicy::unbounded(pipeline.write_retry_wait()),
                cancel.clone(),
                pipeline.decoder_exit_timeout(),
            ),
            cancel.clone(),
        ));
        let transform = tokio::spawn(stop_on_error(stage.run(raw_rx, out_tx, cancel.clone()), cancel.clone()));
        let encode = tokio::spawn(stop_on_error(
            encode_frames(
                sink,
                out_rx,
                pipeline.queue_poll(),
                cancel.clone(),
                Arc::clone(tracker),
                pipeline.encoder_exit_timeout(),
            ),
            cancel.clone(),
        ));

        let (decoded, stats, summary) = tokio::join!(decode, transform, encode);

        match (joined(decoded), joined(stats), joined(summary)) {
            (Ok(decoded), Ok(stats), Ok(summary)) => Ok(StageResults { decoded, stats, summary }),
            (decoded, stats, summary) => Err(root_cause([decoded.err(), stats.err(), summary.err()])),
        }
    }
}

/// Cancel the job's token as soon as one stage fails so the others stop
async fn stop_on_error<T>(stage: impl std::future::Future<Output = Result<T>>, cancel: CancellationToken) -> Result<T> {
    let result = stage.await;
    if let Err(e) = &result {
        if !e.is_cancellation() {
            debug!("Stage failed, stopping job: {}", e);
        }
        cancel.cancel();
    }
    result
}

async fn decode_frames(
    mut source: FrameSource,
    tx: mpsc::Sender<RawFrame>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    exit_timeout: Duration,
) -> Result<u64> {
    loop {
        let frame = match source.next_frame(&cancel).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                source.abort().await;
                return Err(e);
            }
        };

        if let Err(e) = queue::push(&tx, frame, retry, &cancel, "transform").await {
            source.abort().await;
            return Err(e);
        }
    }

    // Closing the queue is the end-of-stream signal
    drop(tx);
    let decoded = source.close(exit_timeout).await;
    debug!("Decode stage finished after {} frames", decoded);
    Ok(decoded)
}

async fn encode_frames(
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<RawFrame>,
    poll: Duration,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
    exit_timeout: Duration,
) -> Result<EncodeSummary> {
    loop {
        let frame = match queue::pop(&mut rx, poll, &cancel).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };

        if let Err(e) = sink.write_frame(&frame, &cancel).await {
            sink.abort().await;
            return Err(e);
        }
        tracker.frame_emitted();
    }

    if cancel.is_cancelled() {
        sink.abort().await;
        return Err(ReframeError::Cancelled);
    }

    tracker.stage(StageLabel::FinalizingEncoder);
    tokio::select! {
        finished = sink.finish(exit_timeout) => finished,
        _ = cancel.cancelled() => Err(ReframeError::Cancelled),
    }
}

fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.unwrap_or_else(|e| {
        Err(TransformError::WorkerAborted {
            reason: format!("pipeline task ended abnormally: {}", e),
        }
        .into())
    })
}

/// Pick the error that explains a failed run
///
/// Cancellation and disconnects are consequences of another stage stopping,
/// so the first other error wins.
fn root_cause(errors: [Option<ReframeError>; 3]) -> ReframeError {
    let mut consequence: Option<ReframeError> = None;
    for error in errors.into_iter().flatten() {
        if !error.is_cancellation() && !error.is_disconnect() {
            return error;
        }
        if consequence.is_none() || error.is_cancellation() {
            consequence = Some(error);
        }
    }
    consequence.unwrap_or(ReframeError::Disconnected { stage: "pipeline" })
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, EncodeError};

    #[test]
    fn test_root_cause_prefers_real_error() {
        let cause = root_cause([
            Some(ReframeError::Disconnected { stage: "transform" }),
            Some(ReframeError::Cancelled),
            Some(EncodeError::NonZeroExit { encoder: "libx264".into(), code: Some(1) }.into()),
        ]);
        assert!(matches!(cause, ReframeError::Encode(EncodeError::NonZeroExit { .. })));

        let cause = root_cause([Some(DecodeError::NoFrames { path: "x".into() }.into()), None, None]);
        assert!(matches!(cause, ReframeError::Decode(DecodeError::NoFrames { .. })));
    }

    #[test]
    fn test_root_cause_cancellation_over_disconnect() {
        let cause = root_cause([Some(ReframeError::Disconnected { stage: "transform" }), Some(ReframeError::Cancelled), None]);
        assert!(cause.is_cancellation());
        assert!(root_cause([None, None, None]).is_disconnect());
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("out.mp4")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/a/b/out.mp4")), PathBuf::from("/a/b"));
    }
}
