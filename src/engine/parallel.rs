// src/engine/parallel.rs
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};

/// Runs independent jobs with a concurrency ceiling
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_concurrent_tasks: usize,
    semaphore: Arc<Semaphore>,
}

impl ParallelExecutor {
    /// Create a new parallel executor
    pub fn new(max_concurrent_tasks: usize) -> Self {
        let max_concurrent_tasks = max_concurrent_tasks.max(1);
        Self {
            max_concurrent_tasks,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
        }
    }

    /// Run every job, returning outputs in completion order.
    ///
    /// A job that panics is logged and contributes no output.
    pub async fn run_all<F>(&self, jobs: Vec<F>) -> Vec<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if jobs.is_empty() {
            return Vec::new();
        }

        info!("Executing {} jobs with max concurrency {}", jobs.len(), self.max_concurrent_tasks);
        let total = jobs.len();
        let (tx, mut rx) = mpsc::channel(total);
        let mut handles = Vec::with_capacity(total);

        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    error!("Job {} dropped: executor closed", index);
                    return;
                };
                let output = job.await;
                if tx.send(output).await.is_err() {
                    debug!("Result receiver dropped for job {}", index);
                }
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(output) = rx.recv().await {
            results.push(output);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Job execution failed: {}", e);
            }
        }

        debug!("Completed {}/{} jobs", results.len(), total);
        results
    }
}
