//! Process-wide imaging capability.
//!
//! One [`ImagingContext`] is created at startup and shared by every request.
//! It owns a dedicated rayon pool, so decode/resize/encode never run on the
//! async executor, and the decode memory ceiling every job must honour.
//!
//! Async callers hand a closure to [`ImagingContext::run`]; it executes on a
//! pool worker and the result comes back over a oneshot channel. A panicking
//! job fails only its own request.

use super::decode::DecodeLimits;
use super::error::ImagingError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::oneshot;

/// Startup parameters for [`ImagingContext::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    /// Worker thread count. Already clamped by the caller.
    pub workers: usize,
    pub limits: DecodeLimits,
}

#[derive(Debug)]
pub struct ImagingContext {
    pool: RwLock<Option<Arc<rayon::ThreadPool>>>,
    limits: DecodeLimits,
    workers: usize,
}

impl ImagingContext {
    pub fn start(settings: ContextSettings) -> Result<Self, ImagingError> {
        let workers = settings.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("imaging-{i}"))
            .build()
            .map_err(|e| ImagingError::Unavailable(e.to_string()))?;
        tracing::info!(workers, max_decode_memory = settings.limits.max_alloc, "imaging context started");
        Ok(Self {
            pool: RwLock::new(Some(Arc::new(pool))),
            limits: settings.limits,
            workers,
        })
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_closed(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `job` on a pool worker and await its result.
    ///
    /// Fails with [`ImagingError::Unavailable`] after [`shutdown`](Self::shutdown),
    /// or when the job panics.
    pub async fn run<T, F>(&self, job: F) -> Result<T, ImagingError>
    where
        F: FnOnce(&DecodeLimits) -> T + Send + 'static,
        T: Send + 'static,
    {
        let pool = self
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ImagingError::Unavailable("imaging context is shut down".into()))?;

        let limits = self.limits;
        let (tx, rx) = oneshot::channel();
        pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| job(&limits)));
            // Receiver gone means the request was cancelled.
            let _ = tx.send(outcome);
        });
        drop(pool);

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(%message, "imaging worker panicked");
                Err(ImagingError::Unavailable("imaging worker panicked".into()))
            }
            Err(_) => Err(ImagingError::Unavailable("imaging worker lost".into())),
        }
    }

    /// Stop accepting jobs and release the pool. In-flight jobs finish.
    ///
    /// Returns `false` if the context was already shut down.
    pub fn shutdown(&self) -> bool {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pool {
            Some(_) => {
                tracing::info!("imaging context shut down");
                true
            }
            None => false,
        }
    }
}
