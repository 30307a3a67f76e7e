//! Single-owner holder for the loaded transform
//!
//! Installing or unloading a transform waits for any running job to release
//! its lease, so model lifecycle changes never overlap a job. A lease shared
//! with an in-flight model call stays held until that call returns, even if
//! the job that started it has already ended.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::error::{Result, TransformError};
use crate::transform::traits::{FrameTransform, SharedTransform};

#[derive(Clone, Default)]
pub struct ModelSlot {
    inner: Arc<AsyncMutex<Option<SharedTransform>>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot with `transform` already installed and initialized
    pub async fn with_transform(transform: Box<dyn FrameTransform>) -> Result<Self> {
        let slot = Self::new();
        slot.install(transform).await?;
        Ok(slot)
    }

    /// Install `transform`, replacing whatever was loaded
    pub async fn install(&self, mut transform: Box<dyn FrameTransform>) -> Result<()> {
        transform.initialize()?;
        let name = transform.name().to_string();

        let mut guard = self.inner.lock().await;
        if let Some(previous) = guard.take() {
            finalize(&previous);
        }
        *guard = Some(Arc::new(Mutex::new(transform)));
        info!("Transform '{}' loaded", name);
        Ok(())
    }

    /// Unload the current transform; returns false if none was loaded
    pub async fn unload(&self) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.take() {
            Some(previous) => {
                finalize(&previous);
                true
            }
            None => false,
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Exclusive use of the loaded transform for the duration of a job
    pub async fn lease(&self) -> Result<ModelLease> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let transform = guard.as_ref().map(Arc::clone).ok_or(TransformError::NotLoaded)?;
        Ok(ModelLease {
            _guard: guard,
            transform,
        })
    }
}

/// Held by a job while it uses the transform
pub struct ModelLease {
    _guard: OwnedMutexGuard<Option<SharedTransform>>,
    transform: SharedTransform,
}

impl ModelLease {
    /// Run `f` with exclusive access to the loaded transform
    ///
    /// Blocks the calling thread while another call holds the model; callers
    /// on the async runtime go through `spawn_blocking`.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut dyn FrameTransform) -> R) -> R {
        let mut model = self.transform.lock().unwrap_or_else(PoisonError::into_inner);
        f(model.as_mut())
    }
}

fn finalize(transform: &SharedTransform) {
    let mut model = transform.lock().unwrap_or_else(PoisonError::into_inner);
    let name = model.name().to_string();
    if let Err(e) = model.finalize() {
        warn!("Finalizing transform '{}' failed: {}", name, e);
    }
    info!("Transform '{}' unloaded", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ResampleEnhancer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lease_requires_loaded_model() {
        let slot = ModelSlot::new();
        assert!(matches!(
            slot.lease().await,
            Err(crate::ReframeError::Transform(TransformError::NotLoaded))
        ));

        slot.install(Box::new(ResampleEnhancer::new())).await.unwrap();
        assert!(slot.is_loaded().await);
        let lease = slot.lease().await.unwrap();
        assert_eq!(lease.with_model(|model| model.name().to_string()), "enhance");
    }

    #[tokio::test]
    async fn test_unload_waits_for_lease() {
        let slot = ModelSlot::with_transform(Box::new(ResampleEnhancer::new())).await.unwrap();
        let lease = slot.lease().await.unwrap();

        let unloader = slot.clone();
        let pending = tokio::spawn(async move { unloader.unload().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        drop(lease);
        assert!(pending.await.unwrap());
        assert!(!slot.is_loaded().await);
    }

    #[tokio::test]
    async fn test_poisoned_model_lock_is_recovered() {
        let slot = ModelSlot::with_transform(Box::new(ResampleEnhancer::new())).await.unwrap();
        let lease = Arc::new(slot.lease().await.unwrap());

        let crashing = Arc::clone(&lease);
        let joined = std::thread::spawn(move || {
            crashing.with_model(|_| {
                panic!("model crashed");
            })
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(lease.with_model(|model| model.name().to_string()), "enhance");
        drop(lease);
        assert!(slot.unload().await);
    }
}
