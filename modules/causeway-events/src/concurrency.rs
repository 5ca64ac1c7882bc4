//! Optimistic concurrency: expected vs. actual stream sequence at commit time.

use std::collections::HashMap;

use thiserror::Error;

/// The only consistency-conflict signal. Retry after re-reading the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on stream {stream_key}: expected sequence {expected_sequence}, actual {actual_sequence}"
)]
pub struct ConcurrencyError {
    pub stream_key: String,
    pub expected_sequence: i64,
    pub actual_sequence: i64,
}

pub fn check_sequence(
    stream_key: &str,
    expected_sequence: i64,
    actual_sequence: i64,
) -> Result<(), ConcurrencyError> {
    if expected_sequence == actual_sequence {
        Ok(())
    } else {
        Err(ConcurrencyError {
            stream_key: stream_key.to_string(),
            expected_sequence,
            actual_sequence,
        })
    }
}

/// Per-stream counters for one batch being applied.
///
/// The first time a stream is seen its committed length is loaded; every
/// event of that stream in the batch then advances the counter, so a batch
/// holding several events of one stream checks each against its own slot.
#[derive(Debug, Default)]
pub struct StreamSequences {
    current: HashMap<String, i64>,
}

impl StreamSequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, stream_key: &str) -> bool {
        self.current.contains_key(stream_key)
    }

    pub fn load(&mut self, stream_key: &str, committed_len: i64) {
        self.current
            .entry(stream_key.to_string())
            .or_insert(committed_len);
    }

    /// Check `expected` (if any) against the stream's position, then advance it.
    /// The stream must have been loaded first.
    pub fn admit(&mut self, stream_key: &str, expected: Option<i64>) -> Result<(), ConcurrencyError> {
        let actual = self.current.get(stream_key).copied().unwrap_or(0);
        if let Some(expected) = expected {
            check_sequence(stream_key, expected, actual)?;
        }
        self.current.insert(stream_key.to_string(), actual + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_sequence_passes() {
        assert!(check_sequence("order-1", 3, 3).is_ok());
    }

    #[test]
    fn mismatch_reports_both_sides() {
        let err = check_sequence("order-1", 2, 5).unwrap_err();
        assert_eq!(err.stream_key, "order-1");
        assert_eq!(err.expected_sequence, 2);
        assert_eq!(err.actual_sequence, 5);
    }

    #[test]
    fn batch_events_of_one_stream_take_successive_slots() {
        let mut seqs = StreamSequences::new();
        seqs.load("order-1", 4);

        assert!(seqs.admit("order-1", Some(4)).is_ok());
        assert!(seqs.admit("order-1", None).is_ok());
        let err = seqs.admit("order-1", Some(5)).unwrap_err();
        assert_eq!(err.actual_sequence, 6);
    }

    #[test]
    fn load_does_not_reset_a_stream_already_in_progress() {
        let mut seqs = StreamSequences::new();
        seqs.load("order-1", 0);
        seqs.admit("order-1", Some(0)).unwrap();
        seqs.load("order-1", 0);
        assert!(seqs.admit("order-1", Some(1)).is_ok());
    }
}
