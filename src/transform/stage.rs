//! The batched transform worker between the decode and encode queues

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::PipelineConfig,
    error::{ReframeError, Result, TransformError},
    pipeline::queue::{self, Collected, RetryPolicy},
    transform::{
        slot::ModelLease,
        traits::{check_output, ExpansionMode, TransformContext, TransformParams},
    },
    video::types::{FrameBatch, FrameGeometry, RawFrame},
};

/// Timing knobs for the transform stage
#[derive(Debug, Clone, Copy)]
pub struct StageSettings {
    /// How long to keep filling a partial batch after its first frame
    pub batch_window: Duration,
    pub queue_poll: Duration,
    pub write_retry: RetryPolicy,
    /// Per-item budget for the single-item fallback
    pub fallback_frame_timeout: Duration,
}

impl StageSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_window: config.batch_window(),
            queue_poll: config.queue_poll(),
            write_retry: RetryPolicy::bounded(config.write_retry_wait(), config.write_retry_budget),
            fallback_frame_timeout: config.fallback_frame_timeout(),
        }
    }
}

/// What the stage runs for one job
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub name: String,
    pub mode: ExpansionMode,
    pub params: Arc<TransformParams>,
    pub input: FrameGeometry,
    pub output: FrameGeometry,
    pub frame_rate: f64,
    pub batch_size: usize,
}

/// Counters reported when the stage exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub batches: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    /// Batches that needed the single-item fallback
    pub fallbacks: u64,
}

pub struct TransformStage {
    lease: Arc<ModelLease>,
    plan: StagePlan,
    settings: StageSettings,
}

impl TransformStage {
    pub fn new(lease: Arc<ModelLease>, plan: StagePlan, settings: StageSettings) -> Self {
        Self { lease, plan, settings }
    }

    /// Consume decoded frames from `rx` and push transformed frames to `tx`
    ///
    /// Returns once `rx` is closed and every output frame has been queued.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<RawFrame>,
        tx: mpsc::Sender<RawFrame>,
        cancel: CancellationToken,
    ) -> Result<StageStats> {
        let mut stats = StageStats::default();
        let mut carry: Option<RawFrame> = None;
        let mut next_index: u64 = 0;

        loop {
            let Some(first) = queue::pop(&mut rx, self.settings.queue_poll, &cancel).await? else {
                break;
            };

            let mut batch = FrameBatch::new(next_index);
            batch.push(first);

            // Prefer a partial batch over idling the transform
            let deadline = Instant::now() + self.settings.batch_window;
            let mut closed = false;
            while batch.len() < self.plan.batch_size {
                match queue::pop_until(&mut rx, deadline).await {
                    Collected::Item(frame) => batch.push(frame),
                    Collected::Closed => {
                        closed = true;
                        break;
                    }
                    Collected::Elapsed => break,
                }
            }

            if cancel.is_cancelled() {
                return Err(ReframeError::Cancelled);
            }

            next_index = batch.end_index();
            stats.batches += 1;
            stats.frames_in += batch.len() as u64;
            trace!(first = batch.first_index, len = batch.len(), "transform batch collected");

            let outputs = match self.plan.mode {
                ExpansionMode::OneToOne => self.one_to_one(batch, &cancel, &mut stats).await?,
                ExpansionMode::Interleave { intermediates: 0 } => batch.frames,
                ExpansionMode::Interleave { intermediates } => {
                    self.interleave(batch, intermediates, &mut carry, &cancel, &mut stats).await?
                }
            };

            for frame in outputs {
                queue::push(&tx, frame, self.settings.write_retry, &cancel, "encode").await?;
                stats.frames_out += 1;
            }

            if closed {
                break;
            }
        }

        debug!(
            "Transform '{}' finished: {} frames in, {} out, {} batches, {} fallbacks",
            self.plan.name, stats.frames_in, stats.frames_out, stats.batches, stats.fallbacks
        );
        Ok(stats)
    }

    async fn one_to_one(&self, batch: FrameBatch, cancel: &CancellationToken, stats: &mut StageStats) -> Result<Vec<RawFrame>> {
        let len = batch.len();
        let first_index = batch.first_index;
        let context = self.context(first_index, len);

        let (frames, result) = self.call_model(batch.frames, context.clone(), cancel).await?;
        match result.and_then(|out| check_output(&out, len, self.plan.output).map(|_| out)) {
            Ok(out) => Ok(out),
            Err(e) => {
                self.log_batch_failure(&e, len);
                stats.fallbacks += 1;
                self.fallback(&frames, first_index, 1, 1, &context, cancel).await
            }
        }
    }

    /// Emit originals with `intermediates` synthesized frames between each pair
    ///
    /// The last frame of every batch is carried into the next so pairs that
    /// straddle a batch boundary are still interpolated.
    async fn interleave(
        &self,
        batch: FrameBatch,
        intermediates: usize,
        carry: &mut Option<RawFrame>,
        cancel: &CancellationToken,
        stats: &mut StageStats,
    ) -> Result<Vec<RawFrame>> {
        let mut emitted = Vec::new();

        let (first_index, sequence) = match carry.take() {
            Some(previous) => {
                let mut sequence = Vec::with_capacity(batch.len() + 1);
                sequence.push(previous);
                sequence.extend(batch.frames);
                (batch.first_index.saturating_sub(1), sequence)
            }
            None => {
                // Head of the stream has no predecessor
                if let Some(head) = batch.frames.first() {
                    emitted.push(head.clone());
                }
                (batch.first_index, batch.frames)
            }
        };

        if sequence.len() < 2 {
            *carry = sequence.into_iter().last();
            return Ok(emitted);
        }

        let pairs = sequence.len() - 1;
        let context = self.context(first_index, sequence.len());
        let (sequence, result) = self.call_model(sequence, context.clone(), cancel).await?;

        let synthesized = match result.and_then(|out| check_output(&out, pairs * intermediates, self.plan.output).map(|_| out)) {
            Ok(out) => out,
            Err(e) => {
                self.log_batch_failure(&e, pairs);
                stats.fallbacks += 1;
                self.fallback(&sequence, first_index, 2, intermediates, &context, cancel).await?
            }
        };

        *carry = sequence.last().cloned();

        let mut synthesized = synthesized.into_iter();
        let mut originals = sequence.into_iter().skip(1);
        for _ in 0..pairs {
            emitted.extend(synthesized.by_ref().take(intermediates));
            if let Some(next) = originals.next() {
                emitted.push(next);
            }
        }
        Ok(emitted)
    }

    /// Re-run a failed batch one unit at a time
    ///
    /// A unit is one frame (`window == 1`) or one consecutive pair
    /// (`window == 2`). The whole fallback is bounded by the per-item budget
    /// times the number of units.
    async fn fallback(
        &self,
        frames: &[RawFrame],
        first_index: u64,
        window: usize,
        per_unit: usize,
        context: &TransformContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawFrame>> {
        let units = (frames.len() + 1).saturating_sub(window);
        let budget = self.settings.fallback_frame_timeout.saturating_mul(units.max(1) as u32);
        let deadline = Instant::now() + budget;
        let mut outputs = Vec::with_capacity(units * per_unit);

        for unit in 0..units {
            if cancel.is_cancelled() {
                return Err(ReframeError::Cancelled);
            }

            let items = frames[unit..unit + window].to_vec();
            let call = self.call_model(items, context.slice(unit, window), cancel);
            let (_, result) = match tokio::time::timeout_at(deadline, call).await {
                Ok(called) => called?,
                Err(_) => {
                    return Err(TransformError::FallbackTimeout {
                        transform: self.plan.name.clone(),
                        seconds: budget.as_secs_f64(),
                    }
                    .into())
                }
            };

            let out = result
                .and_then(|out| check_output(&out, per_unit, self.plan.output).map(|_| out))
                .map_err(|e| TransformError::FallbackFailed {
                    transform: self.plan.name.clone(),
                    index: (first_index + unit as u64) as usize,
                    reason: e.to_string(),
                })?;
            outputs.extend(out);
        }

        debug!("Fallback recovered {} items starting at frame {}", units, first_index);
        Ok(outputs)
    }

    /// Run the transform on a blocking thread; the frames are handed back
    /// alongside the result so a failed batch can be retried
    ///
    /// The blocking call owns a clone of the lease, so the model stays leased
    /// until the call returns even when this future is abandoned. A panic in
    /// the model is reported as a failed call.
    async fn call_model(
        &self,
        frames: Vec<RawFrame>,
        context: TransformContext,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RawFrame>, Result<Vec<RawFrame>>)> {
        let lease = Arc::clone(&self.lease);
        let name = self.plan.name.clone();

        let task = tokio::task::spawn_blocking(move || {
            let result = lease
                .with_model(|model| panic::catch_unwind(AssertUnwindSafe(|| model.transform_batch(&frames, &context))))
                .unwrap_or_else(|payload| {
                    Err(TransformError::Panicked {
                        transform: name,
                        reason: panic_message(payload.as_ref()),
                    }
                    .into())
                });
            (frames, result)
        });

        tokio::select! {
            joined = task => joined.map_err(|e| TransformError::WorkerAborted { reason: e.to_string() }.into()),
            _ = cancel.cancelled() => Err(ReframeError::Cancelled),
        }
    }

    fn context(&self, first_index: u64, len: usize) -> TransformContext {
        TransformContext::for_frames(
            Arc::clone(&self.plan.params),
            self.plan.input,
            self.plan.output,
            self.plan.frame_rate,
            first_index,
            len,
        )
    }

    fn log_batch_failure(&self, error: &ReframeError, items: usize) {
        let failure = TransformError::BatchFailed {
            transform: self.plan.name.clone(),
            reason: error.to_string(),
        };
        warn!("{}; retrying {} items one at a time", failure, items);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{slot::ModelSlot, traits::FrameTransform};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const TINY: FrameGeometry = FrameGeometry { width: 1, height: 1 };

    fn tagged(tag: u8) -> RawFrame {
        RawFrame::filled(TINY, [tag, 0, 0])
    }

    fn tag(frame: &RawFrame) -> u8 {
        frame.as_bytes()[0]
    }

    struct Identity;

    impl FrameTransform for Identity {
        fn name(&self) -> &str {
            "identity"
        }
        fn description(&self) -> &str {
            "returns its input"
        }
        fn transform_batch(&mut self, frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
            Ok(frames.to_vec())
        }
    }

    /// Fails any call with more than one frame
    struct SingleOnly;

    impl FrameTransform for SingleOnly {
        fn name(&self) -> &str {
            "single-only"
        }
        fn description(&self) -> &str {
            "rejects batches"
        }
        fn transform_batch(&mut self, frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
            if frames.len() > 1 {
                return Err(ReframeError::generic("out of memory"));
            }
            Ok(frames.to_vec())
        }
    }

    struct AlwaysFails;

    impl FrameTransform for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn transform_batch(&mut self, _frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
            Err(ReframeError::generic("device lost"))
        }
    }

    /// Intermediate k between tags a and b is tagged a + k
    struct TagInterpolator {
        fail_batches: bool,
    }

    impl FrameTransform for TagInterpolator {
        fn name(&self) -> &str {
            "tag-interpolator"
        }
        fn description(&self) -> &str {
            "tags synthesized frames"
        }
        fn expansion(&self, params: &TransformParams) -> ExpansionMode {
            ExpansionMode::Interleave {
                intermediates: params.intermediates(),
            }
        }
        fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>> {
            if self.fail_batches && frames.len() > 2 {
                return Err(ReframeError::generic("batch too large"));
            }
            let k = context.params.intermediates();
            Ok(frames
                .windows(2)
                .flat_map(|pair| (1..=k).map(move |i| tagged(tag(&pair[0]) + i as u8)))
                .collect())
        }
    }

    /// Panics on any call with more than one frame
    struct PanicsOnBatches;

    impl FrameTransform for PanicsOnBatches {
        fn name(&self) -> &str {
            "fragile"
        }
        fn description(&self) -> &str {
            "panics on batches"
        }
        fn transform_batch(&mut self, frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
            if frames.len() > 1 {
                panic!("accelerator out of memory");
            }
            Ok(frames.to_vec())
        }
    }

    /// Blocks each call for a while, recording when calls start and finish
    struct Slow {
        started: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl FrameTransform for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps inside the call"
        }
        fn transform_batch(&mut self, frames: &[RawFrame], _context: &TransformContext) -> Result<Vec<RawFrame>> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(400));
            self.finished.store(true, Ordering::SeqCst);
            Ok(frames.to_vec())
        }
    }

    /// Records the frame times of every call
    struct TimeRecorder {
        interleave: bool,
        calls: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl FrameTransform for TimeRecorder {
        fn name(&self) -> &str {
            "time-recorder"
        }
        fn description(&self) -> &str {
            "records frame times"
        }
        fn expansion(&self, params: &TransformParams) -> ExpansionMode {
            if self.interleave {
                ExpansionMode::Interleave {
                    intermediates: params.intermediates(),
                }
            } else {
                ExpansionMode::OneToOne
            }
        }
        fn transform_batch(&mut self, frames: &[RawFrame], context: &TransformContext) -> Result<Vec<RawFrame>> {
            self.calls.lock().unwrap().push(context.frame_times.clone());
            if self.interleave {
                let k = context.params.intermediates();
                Ok(frames.windows(2).flat_map(|pair| vec![pair[0].clone(); k]).collect())
            } else {
                Ok(frames.to_vec())
            }
        }
    }

    fn settings() -> StageSettings {
        StageSettings {
            batch_window: Duration::from_millis(10),
            queue_poll: Duration::from_millis(10),
            write_retry: RetryPolicy::bounded(Duration::from_millis(50), 100),
            fallback_frame_timeout: Duration::from_secs(5),
        }
    }

    fn plan(name: &str, mode: ExpansionMode, multiplier: u32, batch_size: usize) -> StagePlan {
        StagePlan {
            name: name.to_string(),
            mode,
            params: Arc::new(TransformParams::with_multiplier(multiplier)),
            input: TINY,
            output: TINY,
            frame_rate: 30.0,
            batch_size,
        }
    }

    async fn leased(transform: Box<dyn FrameTransform>) -> (ModelSlot, Arc<ModelLease>) {
        let slot = ModelSlot::with_transform(transform).await.unwrap();
        let lease = Arc::new(slot.lease().await.unwrap());
        (slot, lease)
    }

    async fn run_stage(
        transform: Box<dyn FrameTransform>,
        plan: StagePlan,
        inputs: Vec<RawFrame>,
    ) -> (Result<StageStats>, Vec<RawFrame>) {
        let (_slot, lease) = leased(transform).await;
        let (in_tx, in_rx) = queue::bounded(4);
        let (out_tx, mut out_rx) = queue::bounded(4);
        let cancel = CancellationToken::new();

        let producer = tokio::spawn(async move {
            for frame in inputs {
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        let consumer = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(frame) = out_rx.recv().await {
                collected.push(frame);
            }
            collected
        });

        let stats = TransformStage::new(lease, plan, settings()).run(in_rx, out_tx, cancel).await;
        producer.await.unwrap();
        (stats, consumer.await.unwrap())
    }

    #[tokio::test]
    async fn test_one_to_one_preserves_order_and_count() {
        let inputs: Vec<_> = (0..25).map(tagged).collect();
        let (stats, outputs) = run_stage(Box::new(Identity), plan("identity", ExpansionMode::OneToOne, 2, 6), inputs).await;

        let stats = stats.unwrap();
        assert_eq!(stats.frames_in, 25);
        assert_eq!(stats.frames_out, 25);
        assert_eq!(outputs.iter().map(tag).collect::<Vec<_>>(), (0..25).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_to_single_frames() {
        let inputs: Vec<_> = (0..10).map(tagged).collect();
        let (stats, outputs) =
            run_stage(Box::new(SingleOnly), plan("single-only", ExpansionMode::OneToOne, 2, 4), inputs).await;

        let stats = stats.unwrap();
        assert_eq!(stats.frames_out, 10);
        assert_eq!(outputs.iter().map(tag).collect::<Vec<_>>(), (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_fallback_failure_is_fatal() {
        let inputs: Vec<_> = (0..3).map(tagged).collect();
        let (stats, _) = run_stage(Box::new(AlwaysFails), plan("broken", ExpansionMode::OneToOne, 2, 4), inputs).await;

        let err = stats.unwrap_err();
        assert!(matches!(err, ReframeError::Transform(TransformError::FallbackFailed { index: 0, .. })));
    }

    #[tokio::test]
    async fn test_interleave_count_and_order() {
        // Originals tagged 3i; intermediates 3i+1, 3i+2
        let inputs: Vec<_> = (0..10).map(|i| tagged(3 * i)).collect();
        let mode = ExpansionMode::Interleave { intermediates: 2 };
        let (stats, outputs) =
            run_stage(Box::new(TagInterpolator { fail_batches: false }), plan("interp", mode, 3, 3), inputs).await;

        assert_eq!(stats.unwrap().frames_out, 28);
        assert_eq!(outputs.iter().map(tag).collect::<Vec<_>>(), (0..28).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_interleave_fallback_per_pair() {
        let inputs: Vec<_> = (0..7).map(|i| tagged(2 * i)).collect();
        let mode = ExpansionMode::Interleave { intermediates: 1 };
        let (stats, outputs) =
            run_stage(Box::new(TagInterpolator { fail_batches: true }), plan("interp", mode, 2, 5), inputs).await;

        let stats = stats.unwrap();
        assert_eq!(stats.frames_out, 13);
        assert_eq!(outputs.iter().map(tag).collect::<Vec<_>>(), (0..13).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_interleave_single_frame_stream() {
        let mode = ExpansionMode::Interleave { intermediates: 3 };
        let (stats, outputs) =
            run_stage(Box::new(TagInterpolator { fail_batches: false }), plan("interp", mode, 4, 3), vec![tagged(9)]).await;

        assert_eq!(stats.unwrap().frames_out, 1);
        assert_eq!(tag(&outputs[0]), 9);
    }

    #[tokio::test]
    async fn test_cancel_stops_stage() {
        let (_slot, lease) = leased(Box::new(Identity)).await;
        let (_in_tx, in_rx) = queue::bounded::<RawFrame>(4);
        let (out_tx, _out_rx) = queue::bounded(4);
        let cancel = CancellationToken::new();

        let stage = TransformStage::new(lease, plan("identity", ExpansionMode::OneToOne, 2, 4), settings());
        let handle = tokio::spawn(stage.run(in_rx, out_tx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn test_panicking_batch_falls_back_to_single_frames() {
        let (slot, lease) = leased(Box::new(PanicsOnBatches)).await;
        let (in_tx, in_rx) = queue::bounded(4);
        let (out_tx, mut out_rx) = queue::bounded(8);
        for i in 0..4 {
            in_tx.send(tagged(i)).await.unwrap();
        }
        drop(in_tx);

        let stage = TransformStage::new(lease, plan("fragile", ExpansionMode::OneToOne, 2, 4), settings());
        let stats = stage.run(in_rx, out_tx, CancellationToken::new()).await.unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.fallbacks, 1);

        let mut outputs = Vec::new();
        while let Some(frame) = out_rx.recv().await {
            outputs.push(tag(&frame));
        }
        assert_eq!(outputs, vec![0, 1, 2, 3]);

        // The model is still usable after the panic
        let lease = slot.lease().await.unwrap();
        assert_eq!(lease.with_model(|model| model.name().to_string()), "fragile");
    }

    #[tokio::test]
    async fn test_cancelled_call_keeps_model_leased_until_it_returns() {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let slow = Slow {
            started: Arc::clone(&started),
            finished: Arc::clone(&finished),
        };
        let (slot, lease) = leased(Box::new(slow)).await;

        let (in_tx, in_rx) = queue::bounded(4);
        let (out_tx, _out_rx) = queue::bounded(4);
        let cancel = CancellationToken::new();
        in_tx.send(tagged(1)).await.unwrap();

        let stage = TransformStage::new(lease, plan("slow", ExpansionMode::OneToOne, 2, 1), settings());
        let handle = tokio::spawn(stage.run(in_rx, out_tx, cancel.clone()));
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_cancellation());
        assert!(!finished.load(Ordering::SeqCst));

        // The abandoned call still owns the model
        assert!(tokio::time::timeout(Duration::from_millis(50), slot.lease()).await.is_err());

        assert!(slot.unload().await);
        assert!(finished.load(Ordering::SeqCst));
    }

    async fn recorded_times(interleave: bool, count: u8, batch_size: usize) -> Vec<Vec<f64>> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = TimeRecorder {
            interleave,
            calls: Arc::clone(&calls),
        };
        let mode = if interleave {
            ExpansionMode::Interleave { intermediates: 1 }
        } else {
            ExpansionMode::OneToOne
        };
        let inputs: Vec<_> = (0..count).map(tagged).collect();
        let (stats, _) = run_stage(Box::new(recorder), plan("time-recorder", mode, 2, batch_size), inputs).await;
        assert!(stats.unwrap().batches > 1);

        let recorded = calls.lock().unwrap().clone();
        recorded
    }

    #[tokio::test]
    async fn test_frame_times_span_batches_one_to_one() {
        let calls = recorded_times(false, 10, 3).await;

        let times: Vec<f64> = calls.into_iter().flatten().collect();
        let expected: Vec<f64> = (0..10).map(|i| i as f64 / 30.0).collect();
        assert_eq!(times, expected);
    }

    #[tokio::test]
    async fn test_frame_times_span_batches_interleave() {
        let calls = recorded_times(true, 10, 3).await;

        // Every call after the first starts at the frame carried over from the previous one
        for pair in calls.windows(2) {
            assert_eq!(pair[1].first(), pair[0].last());
        }

        let mut times: Vec<f64> = calls.into_iter().flatten().collect();
        times.dedup();
        let expected: Vec<f64> = (0..10).map(|i| i as f64 / 30.0).collect();
        assert_eq!(times, expected);
    }
}
