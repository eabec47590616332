//! The fixed-size worker pool: least-loaded admission across
//! `MAX_THREADS` `Worker`s.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::info;

use crate::pipeline::Pipeline;
use crate::worker::Worker;

/// Admission outcome for `WorkerPool::add`.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Ok,
    PoolFull,
}

/// Owns a fixed set of `Worker`s and assigns new connections to whichever currently
/// holds the fewest. The pool-level lock only guards this
/// selection — a short critical section.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        slots_per_worker: usize,
        pipeline: Arc<Pipeline>,
        buffer_size: usize,
        select_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        let mut tasks = JoinSet::new();

        for id in 0..worker_count {
            let worker = Worker::new(
                id,
                slots_per_worker,
                pipeline.clone(),
                buffer_size,
                select_timeout,
                idle_timeout,
            );
            workers.push(worker.clone());
            tasks.spawn(worker.run());
        }

        WorkerPool {
            workers,
            tasks: tokio::sync::Mutex::new(tasks),
        }
    }

    pub fn capacity(&self) -> usize {
        self.workers.len()
    }

    /// Admits a newly accepted socket onto the least-loaded worker.
    pub async fn add(&self, stream: TcpStream) -> Admission {
        let Some(worker) = self
            .workers
            .iter()
            .min_by_key(|w| w.connection_count())
            .cloned()
        else {
            return Admission::PoolFull;
        };

        if worker.add_connection(stream).await {
            Admission::Ok
        } else {
            Admission::PoolFull
        }
    }

    /// Flips every worker's run-flag, joins all worker tasks.
    pub async fn shutdown(&self) {
        info!("worker pool shutdown: signalling workers");
        for worker in &self.workers {
            worker.stop();
        }

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::warn!(%err, "worker task panicked");
            }
        }
        info!("worker pool shutdown complete");
    }
}
