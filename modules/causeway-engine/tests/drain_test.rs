//! Drain detection over queue size readings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use causeway_engine::{
    complete_on_terminal_repeat, side_effect_fn, wait_until_idle, EngineConfig, QueueSize,
    SideEffect, SideEffectQueue, SideEffectSource, SideEffectTable, SignalError, Step,
    TerminalRepeat,
};
use futures::{stream, StreamExt};
use serde_json::json;

async fn run(readings: Vec<Result<usize, SignalError>>) -> Vec<Result<usize, SignalError>> {
    complete_on_terminal_repeat(stream::iter(readings), 0)
        .collect()
        .await
}

fn ok(values: &[usize]) -> Vec<Result<usize, SignalError>> {
    values.iter().copied().map(Ok).collect()
}

// =========================================================================
// Completion operator
// =========================================================================

#[tokio::test]
async fn countdown_completes_on_the_second_zero() {
    let out = run(ok(&[3, 2, 1, 0, 0])).await;
    assert_eq!(out, ok(&[3, 2, 1, 0]));
}

#[tokio::test]
async fn repeats_of_other_values_do_not_complete() {
    // The trailing 1 is never reached.
    let out = run(ok(&[1, 1, 2, 0, 0, 1])).await;
    assert_eq!(out, ok(&[1, 1, 2, 0]));
}

#[tokio::test]
async fn a_single_zero_between_bursts_is_not_drained() {
    let out = run(ok(&[2, 0, 1, 0, 0])).await;
    assert_eq!(out, ok(&[2, 0, 1, 0]));
}

#[tokio::test]
async fn upstream_ending_early_ends_the_stream() {
    let out = run(ok(&[1, 0, 1, 0])).await;
    assert_eq!(out, ok(&[1, 0, 1, 0]));
}

#[tokio::test]
async fn upstream_error_is_forwarded_and_ends_the_stream() {
    let out = run(vec![Ok(1), Err(SignalError::Lagged(3)), Ok(0), Ok(0)]).await;
    assert_eq!(out, vec![Ok(1), Err(SignalError::Lagged(3))]);
}

#[test]
fn terminal_repeat_keeps_one_bit_of_state() {
    let mut detector = TerminalRepeat::new(0);
    assert_eq!(detector.observe(0), Step::Emit(0));
    assert_eq!(detector.observe(4), Step::Emit(4));
    assert_eq!(detector.observe(0), Step::Emit(0));
    assert_eq!(detector.observe(0), Step::Complete);
}

// =========================================================================
// Idle wait
// =========================================================================

struct NoSideEffects;

impl SideEffectSource for NoSideEffects {
    fn side_effect_queue_size(&self) -> Option<QueueSize> {
        None
    }
}

#[tokio::test]
async fn no_side_effect_queue_resolves_immediately_with_none() {
    assert_eq!(wait_until_idle(&NoSideEffects).await, Ok(None));
}

#[tokio::test]
async fn idle_side_effect_queue_resolves_with_zero() {
    let queue = SideEffectQueue::new(SideEffectTable::new(), &EngineConfig::single_shard());
    assert_eq!(wait_until_idle(&queue).await, Ok(Some(0)));
    queue.shutdown().await;
}

#[tokio::test]
async fn idle_wait_covers_queued_side_effects() {
    let done = Arc::new(AtomicUsize::new(0));
    let counter = done.clone();

    let mut table = SideEffectTable::new();
    table
        .register(
            "slow",
            side_effect_fn(move |_| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();

    let queue = SideEffectQueue::new(table, &EngineConfig::single_shard());
    for n in 0..3 {
        queue.push(SideEffect::new("slow", json!({"n": n})), None);
    }

    assert_eq!(wait_until_idle(&queue).await, Ok(Some(0)));
    assert_eq!(done.load(Ordering::SeqCst), 3);
    queue.shutdown().await;
}

#[tokio::test]
async fn queue_size_drained_waits_for_zero_twice() {
    let size = QueueSize::new(16, Duration::from_millis(5));
    let readings: Vec<_> = complete_on_terminal_repeat(size.subscribe(), 0).collect().await;
    // Idle from the start: the first reading is emitted, the heartbeat repeat completes.
    assert_eq!(readings, ok(&[0]));
    assert_eq!(size.drained().await, Ok(0));
}
