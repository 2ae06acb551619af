//! Configuration types for rollers and the scheduler.
//!
//! These types can be built in code with the `with_*` helpers or loaded from
//! JSON. Durations are written as seconds, so a roller that keeps ten
//! minutes of history and samples every 15 seconds looks like:
//!
//! ```json
//! { "retention": 600, "update_interval": 15, "reducer": "max" }
//! ```
//!
//! Validation happens when a roller or scheduler is constructed; a
//! misconfigured roller never starts collecting.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reducer::{CustomReducer, DEFAULT_REDUCER, Reducer, ReducerParams};
use crate::source::SourceKind;

/// Retention window used when none is configured (five minutes).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Sampling cadence used when none is configured.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Longest the scheduler sleeps between wake-ups, in seconds.
pub const MAX_WAIT_PERIOD: u64 = 30;

/// Largest accepted scheduler ceiling, in seconds (one day).
pub const MAX_WAIT_PERIOD_LIMIT: u64 = 24 * 60 * 60;

/// Options for a single roller.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use roller::config::RollerConfig;
///
/// let config = RollerConfig::new()
///     .with_reducer("ema")
///     .with_reducer_param("alpha", 0.2)
///     .with_update_interval(Duration::from_secs(10));
///
/// assert_eq!(config.update_seconds().unwrap(), 10);
/// assert_eq!(config.resolve_reducer().unwrap().name(), "ema");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollerConfig {
    /// Output gauge name. Generated as `<source>_<reducer>_rolled` if unset.
    pub name: Option<String>,

    /// Output gauge help text. Generated from the source name if unset.
    pub documentation: Option<String>,

    /// How long samples are kept before eviction.
    #[serde(with = "duration_serde")]
    pub retention: Duration,

    /// Sampling cadence. Must be a whole number of seconds, at least one.
    #[serde(with = "duration_serde")]
    pub update_interval: Duration,

    /// Name of a built-in reducer (`sum`, `avg`, `max`, `min`, `ema`).
    pub reducer: String,

    /// Parameters passed to the reducer.
    pub reducer_params: ReducerParams,

    /// Caller-supplied reducer, used instead of `reducer` when set.
    #[serde(skip)]
    pub custom_reducer: Option<CustomReducer>,
}

impl Default for RollerConfig {
    fn default() -> Self {
        Self {
            name: None,
            documentation: None,
            retention: DEFAULT_RETENTION,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            reducer: DEFAULT_REDUCER.to_string(),
            reducer_params: ReducerParams::new(),
            custom_reducer: None,
        }
    }
}

impl RollerConfig {
    /// Creates a configuration with every option at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output gauge name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the output gauge help text.
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Sets the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the sampling cadence.
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    /// Selects a built-in reducer by name.
    pub fn with_reducer(mut self, reducer: impl Into<String>) -> Self {
        self.reducer = reducer.into();
        self
    }

    /// Adds a reducer parameter.
    pub fn with_reducer_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.reducer_params.insert(name.into(), value);
        self
    }

    /// Uses a caller-supplied reducer instead of a built-in one.
    pub fn with_custom_reducer(mut self, reducer: CustomReducer) -> Self {
        self.custom_reducer = Some(reducer);
        self
    }

    /// Validates every option.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid update interval, an unknown
    /// reducer, or an out-of-range reducer parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.update_seconds()?;
        self.resolve_reducer()?;
        Ok(())
    }

    /// The sampling cadence in whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUpdateInterval`] when the interval is
    /// shorter than one second or has a fractional part.
    pub fn update_seconds(&self) -> Result<u64, ConfigError> {
        let interval = self.update_interval;
        if interval < Duration::from_secs(1) {
            return Err(ConfigError::InvalidUpdateInterval {
                interval,
                reason: "must be at least one second".to_string(),
            });
        }

        if interval.subsec_nanos() != 0 {
            return Err(ConfigError::InvalidUpdateInterval {
                interval,
                reason: "must be a whole number of seconds".to_string(),
            });
        }

        Ok(interval.as_secs())
    }

    /// Resolves the configured reducer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the reducer name is unknown or one of its
    /// parameters is invalid.
    pub fn resolve_reducer(&self) -> Result<Reducer, ConfigError> {
        match &self.custom_reducer {
            Some(custom) => Ok(Reducer::Custom(custom.clone())),
            None => Reducer::from_name(&self.reducer, &self.reducer_params),
        }
    }

    /// Output gauge name for a source with the given base name.
    pub fn output_name(&self, source_name: &str, reducer: &Reducer) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{source_name}_{}_rolled", reducer.name()))
    }

    /// Output gauge help text for a source with the given base name.
    pub fn output_documentation(&self, source_name: &str) -> String {
        self.documentation
            .clone()
            .unwrap_or_else(|| format!("Tracks the recent behavior of {source_name}"))
    }
}

/// What the scheduler loop does when a collection cycle fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the loop and return the error. Every gauge keeps its last value.
    #[default]
    Stop,
    /// Log the error and keep going on the next wake-up.
    Log,
}

/// Options for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ceiling on the shared wait period, in seconds.
    pub max_wait_period: u64,

    /// Behaviour when a roller fails to collect.
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wait_period: MAX_WAIT_PERIOD,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validates the scheduler options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxWaitPeriod`] for a zero ceiling or
    /// one above [`MAX_WAIT_PERIOD_LIMIT`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WAIT_PERIOD_LIMIT).contains(&self.max_wait_period) {
            return Err(ConfigError::InvalidMaxWaitPeriod {
                max_wait_period: self.max_wait_period,
                limit: MAX_WAIT_PERIOD_LIMIT,
            });
        }
        Ok(())
    }
}

/// One roller entry in a configuration file: which source it follows and
/// how it rolls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRollerConfig {
    /// Name of the source metric.
    pub source: String,

    /// Kind of the source metric.
    pub kind: SourceKind,

    /// Bucket upper bounds, for histogram sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,

    /// Roller options.
    #[serde(flatten)]
    pub roller: RollerConfig,
}

/// A full configuration file: scheduler options plus roller entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollerSetConfig {
    /// Scheduler options.
    pub scheduler: SchedulerConfig,

    /// Roller entries.
    pub rollers: Vec<SourceRollerConfig>,
}

impl RollerSetConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] or [`ConfigError::FileParse`] when
    /// the file cannot be loaded, or any validation error of its entries.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: RollerSetConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::FileParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the scheduler options and every roller entry.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        for entry in &self.rollers {
            entry.roller.validate()?;
        }
        Ok(())
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}
