//! Cumulative sources a roller can sample.
//!
//! A roller reads one of two capabilities:
//!
//! - [`CounterSource`]: a single monotonic value
//! - [`HistogramSource`]: one monotonic value per bucket, keyed by the
//!   bucket's upper-bound label (`le`)
//!
//! Both are implemented for the matching `prometheus` types, and
//! [`MetricSource::from_collector`] adapts any boxed collector by looking at
//! the metric family type it reports. Custom sources (tests, other metric
//! libraries) implement the traits directly.

use std::fmt;

use prometheus::core::Collector;
use prometheus::proto::{MetricFamily, MetricType};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SourceError};

/// Label used by prometheus for the implicit overflow bucket.
pub const INF_BUCKET_LABEL: &str = "+Inf";

/// A monotonic scalar, such as a counter.
pub trait CounterSource: Send + Sync {
    /// Metric name of the source, used to derive the output gauge name.
    fn name(&self) -> String;

    /// Reads the current cumulative value.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the value cannot be read.
    fn read(&self) -> Result<f64, SourceError>;
}

/// A set of monotonic per-bucket counts, such as a histogram.
pub trait HistogramSource: Send + Sync {
    /// Metric name of the source, without any `_bucket` suffix.
    fn name(&self) -> String;

    /// Reads the current cumulative count of every bucket, in bucket order,
    /// keyed by upper-bound label.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the buckets cannot be read.
    fn read_buckets(&self) -> Result<Vec<(String, f64)>, SourceError>;
}

/// The two kinds of cumulative source a roller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single monotonic value.
    Counter,
    /// Monotonic per-bucket counts.
    Histogram,
}

impl SourceKind {
    /// Lowercase name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Counter => "counter",
            SourceKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cumulative source of either kind, as handed to a roller.
pub enum MetricSource {
    /// A counter-like source.
    Counter(Box<dyn CounterSource>),
    /// A histogram-like source.
    Histogram(Box<dyn HistogramSource>),
}

impl MetricSource {
    /// Wraps a counter-like source.
    pub fn counter<S: CounterSource + 'static>(source: S) -> Self {
        Self::Counter(Box::new(source))
    }

    /// Wraps a histogram-like source.
    pub fn histogram<S: HistogramSource + 'static>(source: S) -> Self {
        Self::Histogram(Box::new(source))
    }

    /// Adapts any prometheus collector, choosing the kind from the type of
    /// the first metric family it reports.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptySource`] when the collector reports no
    /// metric family, and [`ConfigError::UnsupportedSource`] for gauges,
    /// summaries and untyped metrics.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use prometheus::{Histogram, HistogramOpts};
    /// use roller::source::{MetricSource, SourceKind};
    ///
    /// let hist = Histogram::with_opts(HistogramOpts::new("latency", "Latency")).unwrap();
    /// let source = MetricSource::from_collector(Box::new(hist)).unwrap();
    /// assert_eq!(source.kind(), SourceKind::Histogram);
    /// assert_eq!(source.name(), "latency");
    /// ```
    pub fn from_collector(collector: Box<dyn Collector>) -> Result<Self, ConfigError> {
        let name = collector_name(collector.as_ref());
        let family = collector
            .collect()
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::EmptySource { name: name.clone() })?;

        let source = CollectorSource { collector, name };
        match family.get_field_type() {
            MetricType::COUNTER => Ok(Self::counter(source)),
            MetricType::HISTOGRAM => Ok(Self::histogram(source)),
            other => Err(ConfigError::UnsupportedSource {
                name: source.name,
                metric_type: format!("{other:?}"),
            }),
        }
    }

    /// The kind of this source.
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Counter(_) => SourceKind::Counter,
            Self::Histogram(_) => SourceKind::Histogram,
        }
    }

    /// The source's metric name.
    pub fn name(&self) -> String {
        match self {
            Self::Counter(source) => source.name(),
            Self::Histogram(source) => source.name(),
        }
    }
}

impl fmt::Debug for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSource")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl From<prometheus::Counter> for MetricSource {
    fn from(counter: prometheus::Counter) -> Self {
        Self::counter(counter)
    }
}

impl From<prometheus::IntCounter> for MetricSource {
    fn from(counter: prometheus::IntCounter) -> Self {
        Self::counter(counter)
    }
}

impl From<prometheus::Histogram> for MetricSource {
    fn from(histogram: prometheus::Histogram) -> Self {
        Self::histogram(histogram)
    }
}

impl CounterSource for prometheus::Counter {
    fn name(&self) -> String {
        collector_name(self)
    }

    fn read(&self) -> Result<f64, SourceError> {
        Ok(self.get())
    }
}

impl CounterSource for prometheus::IntCounter {
    fn name(&self) -> String {
        collector_name(self)
    }

    #[allow(clippy::cast_precision_loss)] // counts above 2^53 lose precision in any gauge
    fn read(&self) -> Result<f64, SourceError> {
        Ok(self.get() as f64)
    }
}

impl HistogramSource for prometheus::Histogram {
    fn name(&self) -> String {
        collector_name(self)
    }

    fn read_buckets(&self) -> Result<Vec<(String, f64)>, SourceError> {
        let name = collector_name(self);
        let family = first_family(self, &name)?;
        histogram_buckets(&family, &name)
    }
}

/// Adapter over an arbitrary boxed collector.
struct CollectorSource {
    collector: Box<dyn Collector>,
    name: String,
}

impl CounterSource for CollectorSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self) -> Result<f64, SourceError> {
        let family = first_family(self.collector.as_ref(), &self.name)?;
        counter_value(&family, &self.name)
    }
}

impl HistogramSource for CollectorSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_buckets(&self) -> Result<Vec<(String, f64)>, SourceError> {
        let family = first_family(self.collector.as_ref(), &self.name)?;
        histogram_buckets(&family, &self.name)
    }
}

/// Formats a bucket upper bound the way it appears in the `le` label.
///
/// Whole numbers keep one decimal place (`5.0`), the overflow bucket is
/// `+Inf`, and everything else uses the shortest round-trip form.
///
/// # Examples
///
/// ```rust
/// use roller::source::bucket_label;
///
/// assert_eq!(bucket_label(5.0), "5.0");
/// assert_eq!(bucket_label(0.005), "0.005");
/// assert_eq!(bucket_label(f64::INFINITY), "+Inf");
/// ```
pub fn bucket_label(upper_bound: f64) -> String {
    if upper_bound == f64::INFINITY {
        INF_BUCKET_LABEL.to_string()
    } else if upper_bound.fract() == 0.0 && upper_bound.abs() < 1e15 {
        format!("{upper_bound:.1}")
    } else {
        format!("{upper_bound}")
    }
}

fn collector_name(collector: &dyn Collector) -> String {
    collector
        .desc()
        .first()
        .map(|desc| desc.fq_name.clone())
        .unwrap_or_default()
}

fn first_family(collector: &dyn Collector, name: &str) -> Result<MetricFamily, SourceError> {
    collector
        .collect()
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::NoSamples {
            name: name.to_string(),
        })
}

fn counter_value(family: &MetricFamily, name: &str) -> Result<f64, SourceError> {
    if family.get_field_type() != MetricType::COUNTER {
        return Err(SourceError::Malformed {
            name: name.to_string(),
            reason: format!("expected a counter, got {:?}", family.get_field_type()),
        });
    }

    let metrics = family.get_metric();
    if metrics.len() > 1 {
        return Err(SourceError::Malformed {
            name: name.to_string(),
            reason: format!("{} labeled children, expected one", metrics.len()),
        });
    }
    metrics
        .first()
        .map(|metric| metric.get_counter().get_value())
        .ok_or_else(|| SourceError::NoSamples {
            name: name.to_string(),
        })
}

#[allow(clippy::cast_precision_loss)] // bucket counts above 2^53 lose precision in any gauge
fn histogram_buckets(family: &MetricFamily, name: &str) -> Result<Vec<(String, f64)>, SourceError> {
    if family.get_field_type() != MetricType::HISTOGRAM {
        return Err(SourceError::Malformed {
            name: name.to_string(),
            reason: format!("expected a histogram, got {:?}", family.get_field_type()),
        });
    }

    let metrics = family.get_metric();
    if metrics.len() > 1 {
        return Err(SourceError::Malformed {
            name: name.to_string(),
            reason: format!("{} labeled children, expected one", metrics.len()),
        });
    }
    let histogram = metrics
        .first()
        .ok_or_else(|| SourceError::NoSamples {
            name: name.to_string(),
        })?
        .get_histogram();

    let mut buckets: Vec<(String, f64)> = histogram
        .get_bucket()
        .iter()
        .map(|bucket| {
            (
                bucket_label(bucket.get_upper_bound()),
                bucket.get_cumulative_count() as f64,
            )
        })
        .collect();

    // The overflow bucket is implicit in the exposition model.
    if buckets.last().map(|(label, _)| label.as_str()) != Some(INF_BUCKET_LABEL) {
        buckets.push((
            INF_BUCKET_LABEL.to_string(),
            histogram.get_sample_count() as f64,
        ));
    }

    Ok(buckets)
}
