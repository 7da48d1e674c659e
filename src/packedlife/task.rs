//! Long-lived worker slots and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};

use rayon::ThreadPool;

use super::error::{GridError, Result};

/// Shared cancellation flag checked by running jobs.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One worker slot: at most one job in flight on a shared pool.
///
/// Results travel back through a channel, which also orders the job's
/// buffer writes before whatever the receiver does next.
pub struct Task<T> {
    pool: Arc<ThreadPool>,
    pending: Option<Receiver<T>>,
    ready: Option<T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool,
            pending: None,
            ready: None,
        }
    }

    /// Spawn `job` unless a previous one has not been collected yet.
    pub fn start<F>(&mut self, job: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_busy() {
            return Err(GridError::AlreadyRunning);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.pool.spawn(move || {
            // The receiver may be gone if the engine was dropped mid-job.
            let _ = tx.send(job());
        });
        self.pending = Some(rx);
        Ok(())
    }

    /// True while a job is in flight or its result is uncollected.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some() || self.ready.is_some()
    }

    /// Non-blocking: true once the job's result can be collected.
    pub fn result_ready(&mut self) -> bool {
        if self.ready.is_some() {
            return true;
        }
        let Some(rx) = &self.pending else {
            return false;
        };
        match rx.try_recv() {
            Ok(value) => {
                self.ready = Some(value);
                self.pending = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                tracing::error!("worker job ended without reporting a result");
                self.pending = None;
                true
            }
        }
    }

    /// Block until the in-flight job finishes and take its result.
    ///
    /// `None` if nothing was started or the job died without a result.
    pub fn wait_for_result(&mut self) -> Option<T> {
        if let Some(value) = self.ready.take() {
            return Some(value);
        }
        let rx = self.pending.take()?;
        match rx.recv() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!("worker job ended without reporting a result");
                None
            }
        }
    }
}
