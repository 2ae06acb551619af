//! Error types for roller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::source::SourceKind;

/// The main error type for all roller operations.
///
/// Configuration problems surface at construction time and are never
/// retried. Collection problems surface from `collect()` and the scheduler
/// loop; they are never swallowed inside the library.
#[derive(Error, Debug)]
pub enum RollerError {
    /// Invalid roller or scheduler configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error during a collection cycle.
    #[error("collect error: {0}")]
    Collect(#[from] CollectError),

    /// Error declaring or removing an output gauge.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Error starting or running the scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised while validating configuration or constructing a roller.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The update interval is not a whole number of seconds >= 1.
    #[error("invalid update interval {interval:?}: {reason}")]
    InvalidUpdateInterval {
        /// The rejected interval.
        interval: Duration,
        /// Why the interval was rejected.
        reason: String,
    },

    /// The scheduler wait ceiling is zero or longer than a day.
    #[error("max wait period {max_wait_period}s must be between 1s and {limit}s")]
    InvalidMaxWaitPeriod {
        /// The rejected ceiling, in seconds.
        max_wait_period: u64,
        /// Largest accepted ceiling, in seconds.
        limit: u64,
    },

    /// The source is not of the kind the roller expects.
    #[error("source '{name}' is a {found}, expected a {expected}")]
    SourceKindMismatch {
        /// Name of the offending source.
        name: String,
        /// The kind the roller requires.
        expected: SourceKind,
        /// The kind that was passed.
        found: SourceKind,
    },

    /// The collector exposes a metric type that cannot be rolled.
    #[error("source '{name}' has unsupported metric type {metric_type}")]
    UnsupportedSource {
        /// Name of the collector's metric family.
        name: String,
        /// The metric type reported by the collector.
        metric_type: String,
    },

    /// The collector exposes no metric family or no sample to track.
    #[error("source '{name}' exposes nothing to track")]
    EmptySource {
        /// Name of the source, possibly empty.
        name: String,
    },

    /// The histogram source reported the same bucket label twice.
    #[error("source '{name}' reports bucket le=\"{label}\" more than once")]
    DuplicateBucket {
        /// Name of the source.
        name: String,
        /// The repeated upper-bound label.
        label: String,
    },

    /// No reducer is registered under this name.
    #[error("unknown reducer '{name}'")]
    UnknownReducer {
        /// The requested reducer name.
        name: String,
    },

    /// A reducer parameter is outside its accepted range.
    #[error("invalid parameter {param}={value} for reducer '{reducer}': {reason}")]
    InvalidReducerParam {
        /// The reducer the parameter belongs to.
        reducer: String,
        /// The parameter name.
        param: String,
        /// The rejected value.
        value: f64,
        /// Why the value was rejected.
        reason: String,
    },

    /// Failed to read a configuration file.
    #[error("failed to read config file '{}': {source}", path.display())]
    FileRead {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("failed to parse config file '{}': {source}", path.display())]
    FileParse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors reported by a cumulative source when it cannot be read.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The collector returned no metric family or no metric.
    #[error("source '{name}' returned no samples")]
    NoSamples {
        /// Name of the source.
        name: String,
    },

    /// The collector returned data of an unexpected shape.
    #[error("source '{name}' returned malformed data: {reason}")]
    Malformed {
        /// Name of the source.
        name: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// The source is temporarily unavailable.
    #[error("source '{name}' is unavailable: {reason}")]
    Unavailable {
        /// Name of the source.
        name: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Errors that abort a single `collect()` call.
#[derive(Error, Debug)]
pub enum CollectError {
    /// The cumulative source could not be read.
    #[error("roller '{roller}': {source}")]
    Source {
        /// The roller whose source failed.
        roller: String,
        /// The source failure.
        #[source]
        source: SourceError,
    },

    /// The histogram reported a bucket that did not exist at construction.
    #[error("roller '{roller}' saw unknown bucket le=\"{label}\"")]
    UnknownBucket {
        /// The roller that saw the bucket.
        roller: String,
        /// The bucket's upper-bound label.
        label: String,
    },

    /// A bucket tracked since construction was absent from a reading.
    #[error("roller '{roller}' is missing bucket le=\"{label}\"")]
    MissingBucket {
        /// The roller whose source dropped the bucket.
        roller: String,
        /// The absent bucket's upper-bound label.
        label: String,
    },

    /// The histogram reported the same bucket more than once.
    #[error("roller '{roller}' saw bucket le=\"{label}\" twice")]
    RepeatedBucket {
        /// The roller that saw the bucket.
        roller: String,
        /// The repeated upper-bound label.
        label: String,
    },

    /// The output gauge could not be written.
    #[error("roller '{roller}' failed to write gauge: {source}")]
    GaugeWrite {
        /// The roller that failed.
        roller: String,
        /// The underlying prometheus error.
        #[source]
        source: prometheus::Error,
    },
}

/// Errors declaring or removing output gauges in a prometheus registry.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The gauge could not be created (bad name, bad labels).
    #[error("failed to declare gauge '{name}': {source}")]
    Declare {
        /// The gauge name.
        name: String,
        /// The underlying prometheus error.
        #[source]
        source: prometheus::Error,
    },

    /// The gauge could not be added to the registry (usually a duplicate).
    #[error("failed to register gauge '{name}': {source}")]
    Register {
        /// The gauge name.
        name: String,
        /// The underlying prometheus error.
        #[source]
        source: prometheus::Error,
    },

    /// The gauge could not be removed from the registry.
    #[error("failed to unregister gauge '{name}': {source}")]
    Unregister {
        /// The gauge name.
        name: String,
        /// The underlying prometheus error.
        #[source]
        source: prometheus::Error,
    },
}

/// Errors starting or running the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The background thread could not be spawned.
    #[error("failed to spawn scheduler thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The background thread panicked.
    #[error("scheduler thread panicked")]
    Panicked,
}

/// Type alias for `Result<T, RollerError>`.
pub type Result<T> = std::result::Result<T, RollerError>;
