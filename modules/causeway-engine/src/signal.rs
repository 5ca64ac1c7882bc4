//! Observable queue depth.
//!
//! Every change is broadcast to subscribers. While nothing changes, each
//! subscription re-reports the current depth on a heartbeat, so an idle
//! queue keeps saying `0` and the drain detector can confirm it.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::drain::settle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// A readings source fell behind and missed this many readings.
    /// [`QueueSize`] resyncs instead of reporting it.
    #[error("queue size observer lagged by {0} readings")]
    Lagged(u64),

    /// The queue went away before the signal settled.
    #[error("queue size signal closed")]
    Closed,
}

/// Readings of a queue's depth: the current value first, then every change.
pub type SizeReadings = Pin<Box<dyn Stream<Item = Result<usize, SignalError>> + Send>>;

const MIN_HEARTBEAT: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Depth(Mutex<usize>);

impl Depth {
    fn get(&self) -> usize {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and publish the result while still holding the lock, so
    /// readings go out in the order the changes happened.
    fn update(&self, tx: &broadcast::Sender<usize>, f: impl FnOnce(usize) -> usize) -> usize {
        let mut depth = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *depth = f(*depth);
        // No subscribers is fine.
        let _ = tx.send(*depth);
        *depth
    }
}

/// Handle to a queue's depth. Cheap to clone.
#[derive(Clone, Debug)]
pub struct QueueSize {
    depth: Arc<Depth>,
    tx: broadcast::Sender<usize>,
    heartbeat: Duration,
}

impl QueueSize {
    /// A zero `heartbeat` is raised to one millisecond.
    pub fn new(capacity: usize, heartbeat: Duration) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            depth: Arc::new(Depth::default()),
            tx,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
        }
    }

    pub fn current(&self) -> usize {
        self.depth.get()
    }

    pub(crate) fn increment(&self) -> usize {
        self.depth.update(&self.tx, |d| d + 1)
    }

    pub(crate) fn decrement(&self) -> usize {
        self.depth.update(&self.tx, |d| d.saturating_sub(1))
    }

    /// Subscribe to depth readings.
    ///
    /// The stream ends once every `QueueSize` handle (and so the queue) is
    /// dropped. A subscriber that falls too far behind skips the readings it
    /// missed and resumes from the current depth, so the stream never errors.
    pub fn subscribe(&self) -> SizeReadings {
        let mut rx = self.tx.subscribe();
        let depth = self.depth.clone();
        let heartbeat = self.heartbeat;

        Box::pin(async_stream::stream! {
            yield Ok(depth.get());

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let reading = tokio::select! {
                    received = rx.recv() => match received {
                        Ok(value) => {
                            ticker.reset();
                            Some(Ok(value))
                        }
                        Err(RecvError::Lagged(missed)) => {
                            debug!(missed, "Queue size subscriber lagged, resyncing");
                            Some(Ok(depth.get()))
                        }
                        Err(RecvError::Closed) => None,
                    },
                    _ = ticker.tick() => Some(Ok(depth.get())),
                };

                match reading {
                    Some(reading) => yield reading,
                    None => break,
                }
            }
        })
    }

    /// Resolve once the depth reads `0` twice in a row. Returns that `0`.
    pub async fn drained(&self) -> Result<usize, SignalError> {
        settle(self.subscribe()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn size() -> QueueSize {
        QueueSize::new(16, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn subscription_starts_with_current_depth() {
        let size = size();
        size.increment();
        size.increment();

        let mut readings = size.subscribe();
        assert_eq!(readings.next().await, Some(Ok(2)));
    }

    #[tokio::test]
    async fn every_change_is_reported_in_order() {
        let size = size();
        let mut readings = size.subscribe();
        assert_eq!(readings.next().await, Some(Ok(0)));

        size.increment();
        size.increment();
        size.decrement();

        assert_eq!(readings.next().await, Some(Ok(1)));
        assert_eq!(readings.next().await, Some(Ok(2)));
        assert_eq!(readings.next().await, Some(Ok(1)));
    }

    #[tokio::test]
    async fn idle_queue_keeps_reporting_on_heartbeat() {
        let size = size();
        let readings: Vec<_> = size.subscribe().take(3).collect().await;
        assert_eq!(readings, vec![Ok(0), Ok(0), Ok(0)]);
    }

    #[tokio::test]
    async fn decrement_never_goes_below_zero() {
        let size = size();
        assert_eq!(size.decrement(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_resyncs_to_current_depth() {
        let size = QueueSize::new(2, Duration::from_secs(60));
        let mut readings = size.subscribe();
        assert_eq!(readings.next().await, Some(Ok(0)));

        for _ in 0..5 {
            size.increment();
        }
        size.decrement();

        // Missed readings are skipped; the next one is the live depth.
        assert_eq!(readings.next().await, Some(Ok(4)));
        // Then the buffered tail follows as usual.
        assert_eq!(readings.next().await, Some(Ok(5)));
        assert_eq!(readings.next().await, Some(Ok(4)));
    }

    #[tokio::test]
    async fn drained_survives_a_burst_larger_than_capacity() {
        let size = QueueSize::new(4, Duration::from_millis(5));
        let waiter = tokio::spawn({
            let size = size.clone();
            async move { size.drained().await }
        });
        tokio::task::yield_now().await;

        for _ in 0..100 {
            size.increment();
        }
        for _ in 0..100 {
            size.decrement();
        }

        assert_eq!(waiter.await.unwrap(), Ok(0));
    }

    #[tokio::test]
    async fn zero_heartbeat_is_clamped() {
        let size = QueueSize::new(4, Duration::ZERO);
        let readings: Vec<_> = size.subscribe().take(2).collect().await;
        assert_eq!(readings, vec![Ok(0), Ok(0)]);
        assert_eq!(size.drained().await, Ok(0));
    }

    #[tokio::test]
    async fn drained_resolves_on_idle_queue() {
        let size = size();
        assert_eq!(size.drained().await, Ok(0));
    }

    #[tokio::test]
    async fn stream_ends_when_queue_is_dropped() {
        let size = QueueSize::new(4, Duration::from_secs(60));
        let mut readings = size.subscribe();
        assert_eq!(readings.next().await, Some(Ok(0)));
        drop(size);
        assert_eq!(readings.next().await, None);
    }
}
