//! Bounded frame queues with cancellation-aware push and pop
//!
//! Readers poll with a short timeout rather than blocking indefinitely;
//! writers retry with a bounded wait when the queue is full.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{EncodeError, ReframeError, Result};

/// Create a bounded queue holding at most `depth` items
pub fn bounded<T>(depth: usize) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(depth.max(1))
}

/// How long a writer keeps retrying against a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub wait: Duration,

    /// Maximum number of waits; `None` retries until cancelled
    pub budget: Option<u32>,
}

impl RetryPolicy {
    pub fn bounded(wait: Duration, budget: u32) -> Self {
        Self {
            wait,
            budget: Some(budget),
        }
    }

    pub fn unbounded(wait: Duration) -> Self {
        Self { wait, budget: None }
    }

    fn waited_ms(&self, attempts: u32) -> u64 {
        (self.wait.as_millis() as u64).saturating_mul(attempts as u64)
    }
}

/// Push `item`, retrying while the queue is full
///
/// Running out of retries is a stall unless cancellation was requested, in
/// which case it is reported as cancellation.
pub async fn push<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    retry: RetryPolicy,
    cancel: &CancellationToken,
    stage: &'static str,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ReframeError::Cancelled);
    }

    let mut item = item;
    let mut attempts: u32 = 0;

    loop {
        match tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(ReframeError::Disconnected { stage }),
            Err(TrySendError::Full(returned)) => item = returned,
        }

        if let Some(budget) = retry.budget {
            if attempts >= budget {
                if cancel.is_cancelled() {
                    return Err(ReframeError::Cancelled);
                }
                return Err(EncodeError::Stalled {
                    waited_ms: retry.waited_ms(attempts),
                }
                .into());
            }
        }
        attempts += 1;

        let reserved = tokio::select! {
            _ = cancel.cancelled() => return Err(ReframeError::Cancelled),
            reserved = tokio::time::timeout(retry.wait, tx.reserve()) => reserved,
        };

        match reserved {
            Ok(Ok(permit)) => {
                permit.send(item);
                return Ok(());
            }
            Ok(Err(_)) => return Err(ReframeError::Disconnected { stage }),
            Err(_) => trace!(stage, attempts, "queue still full"),
        }
    }
}

/// Pop the next item, polling so cancellation is observed promptly
///
/// Returns `Ok(None)` once the queue is closed and drained.
pub async fn pop<T>(rx: &mut mpsc::Receiver<T>, poll: Duration, cancel: &CancellationToken) -> Result<Option<T>> {
    loop {
        if cancel.is_cancelled() {
            return Err(ReframeError::Cancelled);
        }
        if let Ok(item) = tokio::time::timeout(poll, rx.recv()).await {
            return Ok(item);
        }
    }
}

/// Outcome of waiting for an item until a deadline
#[derive(Debug)]
pub enum Collected<T> {
    Item(T),
    Closed,
    Elapsed,
}

/// Wait for an item until `deadline`
pub async fn pop_until<T>(rx: &mut mpsc::Receiver<T>, deadline: Instant) -> Collected<T> {
    match tokio::time::timeout_at(deadline, rx.recv()).await {
        Ok(Some(item)) => Collected::Item(item),
        Ok(None) => Collected::Closed,
        Err(_) => Collected::Elapsed,
    }
}
