//! # roller
//!
//! Rolling-window gauges derived from cumulative Prometheus metrics.
//!
//! Counters and histograms only ever go up, so "how many requests in the
//! last five minutes" or "the largest per-interval jump in errors" cannot
//! be read off them directly. roller samples a cumulative source on a fixed
//! cadence, keeps a bounded history of those samples, and republishes a
//! reduction of the recent deltas (sum, average, max, min, ema, or a custom
//! function) as an ordinary gauge.
//!
//! ## Key Properties
//!
//! - One output gauge per roller, named `<source>_<reducer>_rolled` unless
//!   configured otherwise
//! - Histogram sources produce one gauge child per `le` bucket
//! - Every reducer has a defined empty-window value; nothing is published
//!   as NaN because too few samples were seen
//! - One background thread collects every roller, waking on clock-aligned
//!   multiples of the GCD of their cadences
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use prometheus::{Counter, Registry};
//! use roller::{Roller, RollerConfig, RollerRegistry, scheduler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = Registry::new();
//! let rollers = RollerRegistry::new();
//!
//! let errors = Counter::new("errors_total", "Errors seen")?;
//! metrics.register(Box::new(errors.clone()))?;
//!
//! // Largest 10-second jump in errors over the last 5 minutes.
//! let config = RollerConfig::new()
//!     .with_reducer("max")
//!     .with_update_interval(Duration::from_secs(10));
//! Roller::counter(errors.clone(), config, &metrics, &rollers)?;
//!
//! // Collect every registered roller in the background.
//! let _updater = scheduler::start(None, &rollers)?;
//!
//! errors.inc();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Roller`] - One source, its histories, a reducer and an output gauge
//! - [`RollerRegistry`] - Name-keyed set of live rollers
//! - [`Scheduler`] - Collects rollers on their cadence
//! - [`RollerConfig`] - Per-roller options, loadable from JSON
//!
//! ## Modules
//!
//! - [`roller`] - Roller construction and collection
//! - [`history`] - Per-series sample windows
//! - [`reducer`] - Built-in and custom reducers
//! - [`source`] - Counter and histogram source traits
//! - [`registry`] - Roller registry
//! - [`scheduler`] - Background collection loop
//! - [`config`] - Configuration types
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod history;
pub mod reducer;
pub mod registry;
pub mod roller;
pub mod scheduler;
pub mod source;

// Re-export primary API types at crate root for convenience.
pub use config::{FailurePolicy, RollerConfig, RollerSetConfig, SchedulerConfig};
pub use error::{Result, RollerError};
pub use reducer::{CustomReducer, Reducer};
pub use registry::RollerRegistry;
pub use roller::{Roller, RollerHandle};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use source::{CounterSource, HistogramSource, MetricSource, SourceKind};
