//! Rollers: rolling-window gauges over one cumulative source.
//!
//! A [`Roller`] owns one cumulative source (a counter, or every bucket of a
//! histogram), one [`History`] per tracked series, a [`Reducer`], and one
//! output gauge in a `prometheus` registry. Each call to
//! [`collect`](Roller::collect) reads the source, appends the reading to the
//! history, evicts samples that fell out of the retention window, reduces
//! the remaining deltas and overwrites the gauge.
//!
//! # Collection Flow
//!
//! ```text
//! source ─► append ─► evict (now - retention) ─► deltas ─► reducer ─► gauge
//! ```
//!
//! # Output Gauges
//!
//! - Counter source: one scalar gauge
//! - Histogram source: one gauge with an `le` label, one child per bucket.
//!   The bucket set is fixed when the roller is constructed.
//!
//! Unless configured, the gauge is named `<source>_<reducer>_rolled` and
//! documented as `Tracks the recent behavior of <source>`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prometheus::{Gauge, GaugeVec, Opts, Registry};

use crate::config::RollerConfig;
use crate::error::{CollectError, ConfigError, MetricsError, Result, SourceError};
use crate::history::{History, Sample};
use crate::reducer::{Reducer, ReducerParams};
use crate::registry::RollerRegistry;
use crate::source::{CounterSource, HistogramSource, MetricSource, SourceKind};

/// Label carrying a histogram bucket's upper bound on the output gauge.
pub const BUCKET_LABEL: &str = "le";

/// A rolling-window gauge over one cumulative source.
///
/// Rollers are created through [`Roller::counter`] or [`Roller::histogram`],
/// which register them in a [`RollerRegistry`] and hand back a shared
/// [`RollerHandle`].
///
/// # Thread Safety
///
/// `collect` must not run concurrently for the same roller. The handle's
/// mutex enforces this for callers going through [`RollerHandle`].
pub struct Roller {
    name: String,
    documentation: String,
    source_name: String,
    retention: Duration,
    update_seconds: u64,
    reducer: Reducer,
    reducer_params: ReducerParams,
    tracked: Tracked,
}

/// Source, per-series histories and output gauge.
enum Tracked {
    Counter {
        source: Box<dyn CounterSource>,
        history: History,
        gauge: Gauge,
    },
    Histogram {
        source: Box<dyn HistogramSource>,
        buckets: Vec<BucketSeries>,
        gauge: GaugeVec,
    },
}

/// History of one histogram bucket.
struct BucketSeries {
    label: String,
    history: History,
}

impl Roller {
    /// Creates a roller over a counter source and registers it.
    ///
    /// The output gauge is declared in `metrics` and immediately reports the
    /// reducer's empty-window value. The roller is added to `rollers` under
    /// its output name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SourceKindMismatch`] when `source` is a
    /// histogram, any other [`ConfigError`] from `config`, and
    /// [`MetricsError`] when the gauge cannot be declared or registered.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use prometheus::{Counter, Registry};
    /// use roller::{Roller, RollerConfig, RollerRegistry};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let metrics = Registry::new();
    /// let rollers = RollerRegistry::new();
    ///
    /// let requests = Counter::new("requests_total", "Requests")?;
    /// let handle = Roller::counter(requests.clone(), RollerConfig::new(), &metrics, &rollers)?;
    ///
    /// assert_eq!(handle.name(), "requests_total_sum_rolled");
    /// assert!(rollers.get("requests_total_sum_rolled").is_some());
    /// # Ok(())
    /// # }
    /// ```
    pub fn counter(
        source: impl Into<MetricSource>,
        config: RollerConfig,
        metrics: &Registry,
        rollers: &RollerRegistry,
    ) -> Result<RollerHandle> {
        let roller = Self::build(source.into(), SourceKind::Counter, &config, metrics)?;
        Ok(rollers.insert(roller))
    }

    /// Creates a roller over a histogram source and registers it.
    ///
    /// The source's buckets are read once to discover their labels; the
    /// output gauge gets one `le` child per bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SourceKindMismatch`] when `source` is a
    /// counter, [`ConfigError::EmptySource`] when it has no buckets, any
    /// other [`ConfigError`] from `config`, [`CollectError::Source`] when the
    /// buckets cannot be read, and [`MetricsError`] when the gauge cannot be
    /// declared or registered.
    pub fn histogram(
        source: impl Into<MetricSource>,
        config: RollerConfig,
        metrics: &Registry,
        rollers: &RollerRegistry,
    ) -> Result<RollerHandle> {
        let roller = Self::build(source.into(), SourceKind::Histogram, &config, metrics)?;
        Ok(rollers.insert(roller))
    }

    fn build(
        source: MetricSource,
        expected: SourceKind,
        config: &RollerConfig,
        metrics: &Registry,
    ) -> Result<Self> {
        let source_name = source.name();
        if source.kind() != expected {
            return Err(ConfigError::SourceKindMismatch {
                name: source_name,
                expected,
                found: source.kind(),
            }
            .into());
        }

        let update_seconds = config.update_seconds()?;
        let reducer = config.resolve_reducer()?;
        let reducer_params = config.reducer_params.clone();
        let name = config.output_name(&source_name, &reducer);
        let documentation = config.output_documentation(&source_name);

        // Nothing has been collected yet, so every series starts at the
        // reducer's empty-window value.
        let initial = reducer.apply(&[], &reducer_params);

        let tracked = match source {
            MetricSource::Counter(source) => {
                let gauge = Gauge::with_opts(Opts::new(name.as_str(), documentation.as_str()))
                    .map_err(|e| MetricsError::Declare {
                        name: name.clone(),
                        source: e,
                    })?;
                gauge.set(initial);
                register(metrics, &name, Box::new(gauge.clone()))?;

                Tracked::Counter {
                    source,
                    history: History::new(),
                    gauge,
                }
            }
            MetricSource::Histogram(source) => {
                let readings = source.read_buckets().map_err(|e| CollectError::Source {
                    roller: name.clone(),
                    source: e,
                })?;
                if readings.is_empty() {
                    return Err(ConfigError::EmptySource { name: source_name }.into());
                }
                let mut labels = BTreeSet::new();
                for (label, _) in &readings {
                    if !labels.insert(label.as_str()) {
                        return Err(ConfigError::DuplicateBucket {
                            name: source_name,
                            label: label.clone(),
                        }
                        .into());
                    }
                }

                let gauge = GaugeVec::new(
                    Opts::new(name.as_str(), documentation.as_str()),
                    &[BUCKET_LABEL],
                )
                .map_err(|e| MetricsError::Declare {
                    name: name.clone(),
                    source: e,
                })?;

                let mut buckets = Vec::with_capacity(readings.len());
                for (label, _) in readings {
                    gauge
                        .get_metric_with_label_values(&[label.as_str()])
                        .map_err(|e| MetricsError::Declare {
                            name: name.clone(),
                            source: e,
                        })?
                        .set(initial);
                    buckets.push(BucketSeries {
                        label,
                        history: History::new(),
                    });
                }
                register(metrics, &name, Box::new(gauge.clone()))?;

                Tracked::Histogram {
                    source,
                    buckets,
                    gauge,
                }
            }
        };

        tracing::info!(
            roller = %name,
            source = %source_name,
            kind = %expected,
            reducer = reducer.name(),
            update_seconds,
            "created roller"
        );

        Ok(Self {
            name,
            documentation,
            source_name,
            retention: config.retention,
            update_seconds,
            reducer,
            reducer_params,
            tracked,
        })
    }

    /// Samples the source at the current wall-clock time and republishes
    /// the rolled value of every series.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError`] when the source cannot be read, when its
    /// bucket set differs from the one seen at construction, or when the
    /// gauge cannot be written.
    pub fn collect(&mut self) -> std::result::Result<(), CollectError> {
        self.collect_at(now_ns())
    }

    /// Samples the source as if the current time were `timestamp_ns`
    /// (nanoseconds since the Unix epoch).
    ///
    /// Timestamps passed to successive calls must not decrease.
    ///
    /// # Errors
    ///
    /// Same as [`collect`](Self::collect). A failed call leaves every
    /// history and gauge untouched.
    pub fn collect_at(&mut self, timestamp_ns: u64) -> std::result::Result<(), CollectError> {
        let retention_ns = u64::try_from(self.retention.as_nanos()).unwrap_or(u64::MAX);
        let cutoff_ns = timestamp_ns.saturating_sub(retention_ns);

        match &mut self.tracked {
            Tracked::Counter {
                source,
                history,
                gauge,
            } => {
                let value = source.read().map_err(|e| source_error(&self.name, e))?;

                history.append(Sample::new(timestamp_ns, value));
                history.evict_older_than(cutoff_ns);
                let rolled = self.reducer.apply(&history.to_deltas(), &self.reducer_params);
                gauge.set(rolled);

                tracing::debug!(roller = %self.name, value, rolled, samples = history.len(), "collected");
            }
            Tracked::Histogram {
                source,
                buckets,
                gauge,
            } => {
                let readings = source
                    .read_buckets()
                    .map_err(|e| source_error(&self.name, e))?;

                // Resolve every reading before touching any state.
                let mut seen = vec![false; buckets.len()];
                let mut updates = Vec::with_capacity(readings.len());
                for (label, value) in readings {
                    let index = buckets
                        .iter()
                        .position(|bucket| bucket.label == label)
                        .ok_or_else(|| CollectError::UnknownBucket {
                            roller: self.name.clone(),
                            label: label.clone(),
                        })?;
                    if std::mem::replace(&mut seen[index], true) {
                        return Err(CollectError::RepeatedBucket {
                            roller: self.name.clone(),
                            label,
                        });
                    }
                    let child = gauge
                        .get_metric_with_label_values(&[label.as_str()])
                        .map_err(|e| CollectError::GaugeWrite {
                            roller: self.name.clone(),
                            source: e,
                        })?;
                    updates.push((index, value, child));
                }
                if let Some(missing) = seen.iter().position(|found| !found) {
                    return Err(CollectError::MissingBucket {
                        roller: self.name.clone(),
                        label: buckets[missing].label.clone(),
                    });
                }

                for (index, value, child) in updates {
                    let Some(bucket) = buckets.get_mut(index) else {
                        continue;
                    };
                    bucket.history.append(Sample::new(timestamp_ns, value));
                    bucket.history.evict_older_than(cutoff_ns);
                    let rolled = self
                        .reducer
                        .apply(&bucket.history.to_deltas(), &self.reducer_params);
                    child.set(rolled);
                }

                tracing::debug!(roller = %self.name, buckets = buckets.len(), "collected");
            }
        }

        Ok(())
    }

    /// Removes the output gauge from `metrics`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Unregister`] when the gauge is not registered
    /// there.
    pub fn unregister(&self, metrics: &Registry) -> Result<()> {
        let collector: Box<dyn prometheus::core::Collector> = match &self.tracked {
            Tracked::Counter { gauge, .. } => Box::new(gauge.clone()),
            Tracked::Histogram { gauge, .. } => Box::new(gauge.clone()),
        };
        metrics
            .unregister(collector)
            .map_err(|e| MetricsError::Unregister {
                name: self.name.clone(),
                source: e,
            })?;
        tracing::info!(roller = %self.name, "unregistered roller gauge");
        Ok(())
    }

    /// Output gauge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output gauge help text.
    pub fn documentation(&self) -> &str {
        &self.documentation
    }

    /// Name of the source metric.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Kind of the source metric.
    pub fn kind(&self) -> SourceKind {
        match self.tracked {
            Tracked::Counter { .. } => SourceKind::Counter,
            Tracked::Histogram { .. } => SourceKind::Histogram,
        }
    }

    /// Sampling cadence in seconds.
    pub fn update_seconds(&self) -> u64 {
        self.update_seconds
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// The reducer applied to each window.
    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    /// Parameters passed to the reducer.
    pub fn reducer_params(&self) -> &ReducerParams {
        &self.reducer_params
    }

    /// Current gauge value of a counter roller; `None` for histograms.
    pub fn value(&self) -> Option<f64> {
        match &self.tracked {
            Tracked::Counter { gauge, .. } => Some(gauge.get()),
            Tracked::Histogram { .. } => None,
        }
    }

    /// Current gauge value of one histogram bucket; `None` for counters and
    /// unknown labels.
    pub fn bucket_value(&self, label: &str) -> Option<f64> {
        match &self.tracked {
            Tracked::Histogram { buckets, gauge, .. } => {
                if !buckets.iter().any(|bucket| bucket.label == label) {
                    return None;
                }
                gauge
                    .get_metric_with_label_values(&[label])
                    .ok()
                    .map(|child| child.get())
            }
            Tracked::Counter { .. } => None,
        }
    }

    /// Bucket labels tracked by a histogram roller, in bucket order.
    pub fn bucket_labels(&self) -> Vec<&str> {
        match &self.tracked {
            Tracked::Histogram { buckets, .. } => {
                buckets.iter().map(|bucket| bucket.label.as_str()).collect()
            }
            Tracked::Counter { .. } => Vec::new(),
        }
    }

    /// History of a counter roller's single series.
    pub fn history(&self) -> Option<&History> {
        match &self.tracked {
            Tracked::Counter { history, .. } => Some(history),
            Tracked::Histogram { .. } => None,
        }
    }

    /// History of one histogram bucket.
    pub fn bucket_history(&self, label: &str) -> Option<&History> {
        match &self.tracked {
            Tracked::Histogram { buckets, .. } => buckets
                .iter()
                .find(|bucket| bucket.label == label)
                .map(|bucket| &bucket.history),
            Tracked::Counter { .. } => None,
        }
    }
}

impl fmt::Debug for Roller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Roller")
            .field("name", &self.name)
            .field("source_name", &self.source_name)
            .field("kind", &self.kind())
            .field("retention", &self.retention)
            .field("update_seconds", &self.update_seconds)
            .field("reducer", &self.reducer)
            .finish_non_exhaustive()
    }
}

/// Shared, cloneable handle to a roller.
///
/// The registry and the scheduler both hold handles to the same roller. The
/// name and cadence are copied out so the scheduler can plan wake-ups
/// without taking the roller's lock.
#[derive(Clone)]
pub struct RollerHandle {
    name: Arc<str>,
    update_seconds: u64,
    inner: Arc<Mutex<Roller>>,
}

impl RollerHandle {
    /// Wraps a roller in a shared handle.
    pub fn new(roller: Roller) -> Self {
        Self {
            name: Arc::from(roller.name()),
            update_seconds: roller.update_seconds(),
            inner: Arc::new(Mutex::new(roller)),
        }
    }

    /// Output gauge name of the roller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sampling cadence of the roller, in seconds.
    pub fn update_seconds(&self) -> u64 {
        self.update_seconds
    }

    /// Locks the roller for inspection.
    ///
    /// A poisoned lock is recovered: a roller's state is only ever changed
    /// by appends, front pops and gauge overwrites.
    pub fn lock(&self) -> MutexGuard<'_, Roller> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs [`Roller::collect`] under the roller's lock.
    ///
    /// # Errors
    ///
    /// Propagates the roller's [`CollectError`].
    pub fn collect(&self) -> std::result::Result<(), CollectError> {
        self.lock().collect()
    }

    /// Runs [`Roller::collect_at`] under the roller's lock.
    ///
    /// # Errors
    ///
    /// Propagates the roller's [`CollectError`].
    pub fn collect_at(&self, timestamp_ns: u64) -> std::result::Result<(), CollectError> {
        self.lock().collect_at(timestamp_ns)
    }

    /// Whether two handles point at the same roller.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RollerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollerHandle")
            .field("name", &self.name)
            .field("update_seconds", &self.update_seconds)
            .finish_non_exhaustive()
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)] // u64 nanoseconds last until 2554
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

fn register(
    metrics: &Registry,
    name: &str,
    collector: Box<dyn prometheus::core::Collector>,
) -> std::result::Result<(), MetricsError> {
    metrics
        .register(collector)
        .map_err(|e| MetricsError::Register {
            name: name.to_string(),
            source: e,
        })
}

fn source_error(roller: &str, source: SourceError) -> CollectError {
    CollectError::Source {
        roller: roller.to_string(),
        source,
    }
}
