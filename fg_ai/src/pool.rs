//! ABOUTME: Bounded worker pool for slow remote analysis calls
//! ABOUTME: Semaphore-based admission control that drains in-flight work on shutdown

use metrics::{counter, gauge};
use std::future::Future;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::AnalysisError;

/// Fixed-size pool; excess callers queue until a slot frees up
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    active: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        gauge!("analysis_pool_workers").set(size as f64);

        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            active: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `task` while holding one worker slot
    pub async fn run<F, T>(&self, task: F) -> Result<T, AnalysisError>
    where
        F: Future<Output = Result<T, AnalysisError>>,
    {
        let available = self.semaphore.available_permits();
        if available == 0 {
            debug!(workers = self.size, "Waiting for analysis worker");
            counter!("analysis_pool_wait_events_total").increment(1);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AnalysisError::PoolClosed)?;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        gauge!("analysis_pool_active").set(active as f64);

        let result = task.await;

        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("analysis_pool_active").set(active as f64);

        result
    }

    /// Wait for in-flight work to finish, then refuse new work
    pub async fn shutdown(&self) {
        if self.semaphore.is_closed() {
            return;
        }
        match self.semaphore.acquire_many(self.size as u32).await {
            Ok(_all) => {
                self.semaphore.close();
                info!(completed = self.total_operations(), "Analysis worker pool drained");
            }
            Err(_) => debug!("Analysis worker pool already closed"),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn active_operations(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_operations(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
