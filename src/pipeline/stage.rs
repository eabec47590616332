//! The generic pipeline stage: `(in_queue, out_queue, transform,
//! worker_count)`. Each stage runs a fixed pool of consumer workers; each worker pops,
//! transforms, and pushes downstream.
//!
//! The transform seam is an `async_trait` trait, spawned with `tokio::task::JoinSet`.
//! Each adjacent pair of stages gets its own typed queue rather than a single
//! polymorphic queue carrying a type tag, so `Transform<In, Out>` is generic per
//! stage pair instead of a single type-erased payload.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::debug;

use crate::queue::Queue;

/// One stage's transform: pop an `In`, produce an `Out` or short-circuit by returning
/// `None`. Implementations that need to notify a connection directly on short-circuit
/// (e.g. both sub-fetches failed) do so inside `apply` before returning `None`.
#[async_trait]
pub trait Transform<In, Out>: Send + Sync {
    async fn apply(&self, item: In) -> Option<Out>;
}

/// Spawns `worker_count` consumer loops for one stage onto `tasks`. Each worker pops
/// from `in_queue` until it closes and drains, applying `transform` and pushing
/// surviving results to `out_queue`. Workers exit silently if `out_queue` is closed
/// mid-push (shutdown in progress).
pub fn spawn_stage<In, Out, T>(
    name: &'static str,
    in_queue: Queue<In>,
    out_queue: Queue<Out>,
    worker_count: usize,
    transform: Arc<T>,
    tasks: &mut JoinSet<()>,
) where
    In: Send + 'static,
    Out: Send + 'static,
    T: Transform<In, Out> + 'static,
{
    for worker_id in 0..worker_count {
        let in_queue = in_queue.clone();
        let out_queue = out_queue.clone();
        let transform = transform.clone();
        tasks.spawn(async move {
            loop {
                let item = match in_queue.pop().await {
                    Some(item) => item,
                    None => break,
                };
                if let Some(out) = transform.apply(item).await {
                    if out_queue.push(out).await.is_err() {
                        break;
                    }
                }
            }
            debug!(stage = name, worker_id, "stage worker exiting");
        });
    }
}
