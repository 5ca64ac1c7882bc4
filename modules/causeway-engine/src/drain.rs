//! Drain detection: "the queue has settled at zero".
//!
//! A single `0` reading can be a gap between two bursts, so a queue only
//! counts as drained after it reports the terminal value twice in a row.

use futures::{Stream, StreamExt};

use crate::signal::{QueueSize, SignalError};

/// Outcome of feeding one reading to a [`TerminalRepeat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Emit(T),
    Complete,
}

/// Two-in-a-row detector for a terminal value.
///
/// The only state is whether the previous reading was terminal. Repeats of
/// any other value do nothing.
#[derive(Debug, Clone)]
pub struct TerminalRepeat<T> {
    terminal: T,
    last_was_terminal: bool,
}

impl<T: PartialEq> TerminalRepeat<T> {
    pub fn new(terminal: T) -> Self {
        Self {
            terminal,
            last_was_terminal: false,
        }
    }

    pub fn observe(&mut self, value: T) -> Step<T> {
        let is_terminal = value == self.terminal;
        if is_terminal && self.last_was_terminal {
            return Step::Complete;
        }
        self.last_was_terminal = is_terminal;
        Step::Emit(value)
    }
}

/// Pass readings through until the terminal value shows up twice in a row,
/// then end. The second terminal reading is not emitted.
///
/// An error from `readings` is forwarded and ends the stream.
pub fn complete_on_terminal_repeat<S, T, E>(
    readings: S,
    terminal: T,
) -> impl Stream<Item = Result<T, E>> + Send
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: PartialEq + Send + 'static,
    E: Send + 'static,
{
    let state = (Box::pin(readings), TerminalRepeat::new(terminal), false);

    futures::stream::unfold(state, |(mut readings, mut detector, done)| async move {
        if done {
            return None;
        }
        match readings.next().await? {
            Ok(value) => match detector.observe(value) {
                Step::Emit(value) => Some((Ok(value), (readings, detector, false))),
                Step::Complete => None,
            },
            Err(e) => Some((Err(e), (readings, detector, true))),
        }
    })
}

/// Anything that may own a side-effect queue.
pub trait SideEffectSource {
    /// `None` when no side-effect queue is configured.
    fn side_effect_queue_size(&self) -> Option<QueueSize>;
}

/// Wait for `source`'s side-effect queue to drain.
///
/// Returns `Ok(None)` straight away when there is no side-effect queue, and
/// `Ok(Some(0))` once its depth has read `0` twice in a row.
pub async fn wait_until_idle<S>(source: &S) -> Result<Option<usize>, SignalError>
where
    S: SideEffectSource + ?Sized,
{
    let Some(size) = source.side_effect_queue_size() else {
        return Ok(None);
    };
    settle(size.subscribe()).await.map(Some)
}

/// Drive `readings` until they read `0` twice in a row.
pub(crate) async fn settle<S>(readings: S) -> Result<usize, SignalError>
where
    S: Stream<Item = Result<usize, SignalError>>,
{
    let mut readings = Box::pin(readings);
    let mut detector = TerminalRepeat::new(0usize);
    while let Some(reading) = readings.next().await {
        if let Step::Complete = detector.observe(reading?) {
            return Ok(0);
        }
    }
    Err(SignalError::Closed)
}
