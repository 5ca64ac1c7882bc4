//! Sharded worker pool shared by the dispatch and side-effect queues.
//!
//! One unbounded channel and one spawned worker per shard. Jobs on the same
//! shard run strictly in push order; shards run independently.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::signal::QueueSize;

/// Processes one job on one shard. Must not panic: wrap handler calls in
/// [`guarded`].
#[async_trait]
pub(crate) trait JobRunner<J: Send + 'static>: Send + Sync + 'static {
    async fn run(&self, shard: usize, job: J);
}

pub(crate) struct ShardedQueue<J> {
    name: &'static str,
    shards: usize,
    senders: RwLock<Vec<mpsc::UnboundedSender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: QueueSize,
}

impl<J: Send + 'static> ShardedQueue<J> {
    /// Spawn one worker per shard. Must be called inside a Tokio runtime.
    pub(crate) fn start<R>(name: &'static str, shards: usize, size: QueueSize, runner: Arc<R>) -> Self
    where
        R: JobRunner<J>,
    {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);

        for shard in 0..shards {
            let (tx, mut rx) = mpsc::unbounded_channel::<J>();
            let runner = runner.clone();
            let size = size.clone();

            workers.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    runner.run(shard, job).await;
                    size.decrement();
                }
                debug!(queue = name, shard, "Shard worker stopped");
            }));
            senders.push(tx);
        }

        debug!(queue = name, shards, "Started shard workers");

        Self {
            name,
            shards,
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.shards
    }

    pub(crate) fn size(&self) -> &QueueSize {
        &self.size
    }

    /// Hand `job` to `shard`'s worker. Gives the job back if the queue is
    /// shut down.
    pub(crate) fn enqueue(&self, shard: usize, job: J) -> Result<(), J> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = senders.get(shard) else {
            return Err(job);
        };

        // Count before sending so the worker's decrement can never run first.
        self.size.increment();
        if let Err(mpsc::error::SendError(job)) = tx.send(job) {
            self.size.decrement();
            return Err(job);
        }
        Ok(())
    }

    /// Stop accepting jobs, let every shard finish what it already has, and
    /// wait for the workers to exit.
    pub(crate) async fn shutdown(&self) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(queue = self.name, error = %e, "Shard worker ended abnormally");
            }
        }
        debug!(queue = self.name, "Queue shut down");
    }
}

/// Run `fut`, turning a panic into its message.
pub(crate) async fn guarded<F, T>(fut: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(&*panic))
}

/// Invoke a completion callback. A panicking callback is logged and dropped;
/// it must not take the shard worker down with it.
pub(crate) fn notify<T>(callback: Option<Box<dyn FnOnce(T) + Send>>, value: T) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        warn!(panic = %panic_message(&*panic), "Completion callback panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    struct Recorder {
        seen: AsyncMutex<Vec<(usize, u32)>>,
    }

    #[async_trait]
    impl JobRunner<u32> for Recorder {
        async fn run(&self, shard: usize, job: u32) {
            self.seen.lock().await.push((shard, job));
        }
    }

    fn queue(shards: usize) -> (ShardedQueue<u32>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            seen: AsyncMutex::new(Vec::new()),
        });
        let size = QueueSize::new(64, Duration::from_millis(5));
        (ShardedQueue::start("test", shards, size, recorder.clone()), recorder)
    }

    #[tokio::test]
    async fn zero_shards_still_gets_one_worker() {
        let (queue, _) = queue(0);
        assert_eq!(queue.shard_count(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn jobs_on_one_shard_run_in_push_order() {
        let (queue, recorder) = queue(3);
        for job in 0..50 {
            queue.enqueue(1, job).unwrap();
        }
        queue.shutdown().await;

        let seen = recorder.seen.lock().await;
        let jobs: Vec<u32> = seen.iter().map(|(_, job)| *job).collect();
        assert_eq!(jobs, (0..50).collect::<Vec<_>>());
        assert!(seen.iter().all(|(shard, _)| *shard == 1));
    }

    #[tokio::test]
    async fn shutdown_finishes_queued_work_and_rejects_new_jobs() {
        let (queue, recorder) = queue(2);
        queue.enqueue(0, 1).unwrap();
        queue.enqueue(1, 2).unwrap();
        queue.shutdown().await;

        assert_eq!(recorder.seen.lock().await.len(), 2);
        assert_eq!(queue.size().current(), 0);
        assert_eq!(queue.enqueue(0, 3), Err(3));
        assert_eq!(queue.size().current(), 0);
    }

    #[tokio::test]
    async fn out_of_range_shard_is_rejected() {
        let (queue, _) = queue(2);
        assert_eq!(queue.enqueue(5, 7), Err(7));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn guarded_reports_panic_message() {
        let ok = guarded(async { 5 }).await;
        assert_eq!(ok, Ok(5));

        let err = guarded(async { panic!("boom {}", 1) }).await;
        assert_eq!(err, Err::<(), _>("boom 1".to_string()));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let callback: Box<dyn FnOnce(u32) + Send> = Box::new(|_| panic!("callback"));
        notify(Some(callback), 1);
        notify::<u32>(None, 2);
    }
}
