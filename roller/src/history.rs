//! Windowed sample history for one tracked series.
//!
//! A [`History`] is an append-only queue of `(timestamp, cumulative value)`
//! samples. Samples arrive in wall-clock order, so the oldest sample is
//! always at the front and eviction never has to look past the first
//! sample that is still inside the retention window.
//!
//! # Design
//!
//! - Append at the back, evict from the front (`VecDeque`)
//! - Timestamps are nanoseconds since the Unix epoch
//! - Reducers never see raw values, only [`History::to_deltas`]: the
//!   differences between consecutive cumulative samples
//!
//! Deltas are only evenly spaced in time to the extent the scheduler fires
//! on schedule. No interpolation or time weighting is applied.

use std::collections::VecDeque;

/// One reading of a cumulative source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// When the source was read, in nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    /// The raw cumulative value.
    pub value: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(timestamp_ns: u64, value: f64) -> Self {
        Self {
            timestamp_ns,
            value,
        }
    }
}

/// Time-ordered samples for one series, bounded by a retention horizon.
///
/// # Thread Safety
///
/// A history is owned by exactly one roller and is only touched from that
/// roller's `collect()`. It carries no synchronization of its own.
#[derive(Debug, Clone, Default)]
pub struct History {
    samples: VecDeque<Sample>,
}

impl History {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample at the back.
    ///
    /// The caller is trusted to supply non-decreasing timestamps.
    pub fn append(&mut self, sample: Sample) {
        self.samples.push_back(sample);
    }

    /// Drops samples from the front whose timestamp is strictly earlier
    /// than `cutoff_ns`, returning how many were dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roller::history::{History, Sample};
    ///
    /// let mut history = History::new();
    /// history.append(Sample::new(100, 1.0));
    /// history.append(Sample::new(200, 2.0));
    /// history.append(Sample::new(300, 4.0));
    ///
    /// assert_eq!(history.evict_older_than(200), 1);
    /// assert_eq!(history.to_deltas(), vec![2.0]);
    /// ```
    pub fn evict_older_than(&mut self, cutoff_ns: u64) -> usize {
        let mut evicted = 0;
        while let Some(oldest) = self.samples.front() {
            if oldest.timestamp_ns >= cutoff_ns {
                break;
            }
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Differences between consecutive retained samples, oldest first.
    ///
    /// The result has `len() - 1` entries, or none for a history holding
    /// zero or one sample.
    pub fn to_deltas(&self) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(prev, next)| next.value - prev.value)
            .collect()
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are retained.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The oldest retained sample.
    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    /// The newest retained sample.
    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Iterates retained samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}
