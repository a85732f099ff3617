//! Bounded, time-ordered window of propagation snapshots used to rewind the
//! filter to the instant of a delayed observation and replay the inertial
//! samples that followed it.

use crate::propagate::ImuSample;
use crate::state::{ErrorCovariance, NominalState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on the slots reserved up front; larger buffers grow on demand.
const PREALLOCATED_ENTRIES: usize = 4096;

/// Retention bounds. Both are enforced on every append by evicting the head.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryCapacity {
    pub max_entries: usize,
    /// Maximum time between the oldest and newest retained entry.
    pub max_span_s: Option<f64>,
}

impl Default for HistoryCapacity {
    fn default() -> Self {
        // One second of 400 Hz inertial data.
        Self {
            max_entries: 400,
            max_span_s: Some(1.0),
        }
    }
}

impl HistoryCapacity {
    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            max_span_s: None,
        }
    }
}

/// One inertial sample and the filter state right after it was applied.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub timestamp_s: f64,
    pub sample: ImuSample,
    pub state: NominalState,
    pub covariance: ErrorCovariance,
}

#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: HistoryCapacity,
}

impl HistoryBuffer {
    pub fn new(capacity: HistoryCapacity) -> Self {
        let capacity = HistoryCapacity {
            max_entries: capacity.max_entries.max(1),
            ..capacity
        };
        Self {
            entries: VecDeque::with_capacity(capacity.max_entries.min(PREALLOCATED_ENTRIES)),
            capacity,
        }
    }

    /// Add a snapshot at the tail. Returns how many head entries were evicted
    /// to stay within capacity.
    pub fn append(
        &mut self,
        timestamp_s: f64,
        sample: ImuSample,
        state: NominalState,
        covariance: ErrorCovariance,
    ) -> usize {
        self.push(HistoryEntry {
            timestamp_s,
            sample,
            state,
            covariance,
        })
    }

    pub fn push(&mut self, entry: HistoryEntry) -> usize {
        debug_assert!(
            self.newest_timestamp()
                .map_or(true, |newest| entry.timestamp_s >= newest),
            "history entries must be appended in timestamp order"
        );
        self.entries.push_back(entry);
        self.enforce_capacity()
    }

    /// Remove and return, oldest first, every entry strictly older than `timestamp_s`.
    pub fn drop_before(&mut self, timestamp_s: f64) -> Vec<HistoryEntry> {
        let split = self
            .entries
            .iter()
            .position(|e| e.timestamp_s >= timestamp_s)
            .unwrap_or(self.entries.len());
        self.entries.drain(..split).collect()
    }

    /// Remove and return every remaining entry, oldest first.
    pub fn drain_all(&mut self) -> Vec<HistoryEntry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> HistoryCapacity {
        self.capacity
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.entries.front().map(|e| e.timestamp_s)
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.entries.back().map(|e| e.timestamp_s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    fn enforce_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity.max_entries {
            self.entries.pop_front();
            evicted += 1;
        }
        if let Some(span) = self.capacity.max_span_s {
            while let (Some(oldest), Some(newest)) =
                (self.oldest_timestamp(), self.newest_timestamp())
            {
                // The entry just appended always survives.
                if self.entries.len() <= 1 || newest - oldest <= span {
                    break;
                }
                self.entries.pop_front();
                evicted += 1;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(capacity: HistoryCapacity, stamps: &[f64]) -> HistoryBuffer {
        let mut buffer = HistoryBuffer::new(capacity);
        for &t in stamps {
            buffer.append(
                t,
                ImuSample::default(),
                NominalState::new(),
                ErrorCovariance::zeros(),
            );
        }
        buffer
    }

    fn stamps(entries: &[HistoryEntry]) -> Vec<f64> {
        entries.iter().map(|e| e.timestamp_s).collect()
    }

    #[test]
    fn test_huge_entry_bound_does_not_preallocate() {
        let mut buffer = buffer_with(HistoryCapacity::entries(usize::MAX), &[0.0, 1.0]);
        assert_eq!(buffer.capacity().max_entries, usize::MAX);
        assert_eq!(buffer.len(), 2);
        assert_eq!(stamps(&buffer.drain_all()), vec![0.0, 1.0]);
    }

    #[test]
    fn test_drop_before_is_strict() {
        let mut buffer = buffer_with(HistoryCapacity::entries(10), &[0.1, 0.2, 0.3, 0.4]);
        let dropped = buffer.drop_before(0.3);
        assert_eq!(stamps(&dropped), vec![0.1, 0.2]);
        assert_eq!(buffer.oldest_timestamp(), Some(0.3));
        assert_eq!(stamps(&buffer.drain_all()), vec![0.3, 0.4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drop_before_everything_and_nothing() {
        let mut buffer = buffer_with(HistoryCapacity::entries(10), &[1.0, 2.0]);
        assert!(buffer.drop_before(0.5).is_empty());
        assert_eq!(buffer.len(), 2);
        assert_eq!(stamps(&buffer.drop_before(5.0)), vec![1.0, 2.0]);
        assert!(buffer.is_empty());
        assert!(buffer.drop_before(5.0).is_empty());
    }

    #[test]
    fn test_entry_bound_evicts_oldest() {
        let mut buffer = buffer_with(HistoryCapacity::entries(3), &[0.0, 1.0, 2.0]);
        let evicted = buffer.append(
            3.0,
            ImuSample::default(),
            NominalState::new(),
            ErrorCovariance::zeros(),
        );
        assert_eq!(evicted, 1);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.oldest_timestamp(), Some(1.0));
        assert_eq!(buffer.newest_timestamp(), Some(3.0));
    }

    #[test]
    fn test_size_never_exceeds_bound() {
        let capacity = HistoryCapacity::entries(16);
        let mut buffer = HistoryBuffer::new(capacity);
        for i in 0..1000 {
            buffer.append(
                i as f64 * 0.0025,
                ImuSample::default(),
                NominalState::new(),
                ErrorCovariance::zeros(),
            );
            assert!(buffer.len() <= 16);
        }
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn test_span_bound_evicts_old_entries() {
        let capacity = HistoryCapacity {
            max_entries: 100,
            max_span_s: Some(0.25),
        };
        let buffer = buffer_with(capacity, &[0.0, 0.1, 0.2, 0.3, 0.4]);
        assert_eq!(buffer.oldest_timestamp(), Some(0.2));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_span_bound_keeps_latest_entry() {
        let capacity = HistoryCapacity {
            max_entries: 100,
            max_span_s: Some(0.01),
        };
        let buffer = buffer_with(capacity, &[0.0, 10.0]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.newest_timestamp(), Some(10.0));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = buffer_with(HistoryCapacity::entries(0), &[0.0, 1.0]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.capacity().max_entries, 1);
    }
}
