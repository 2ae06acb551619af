//! Reducers that turn a window of deltas into a single gauge value.
//!
//! A reducer is a pure function over an ordered slice of deltas plus a set
//! of named parameters. Every reducer defines an explicit value for an empty
//! window, so a roller that has collected zero or one sample always has
//! something to publish:
//!
//! | Reducer | Value | Empty window |
//! |---------|-------|--------------|
//! | `sum`   | total change | `0.0` |
//! | `avg`   | mean change | `0.0` |
//! | `max`   | largest change | `-inf` |
//! | `min`   | smallest change | `+inf` |
//! | `ema`   | exponential moving average, parameter `alpha` | `0.0` |
//!
//! Callers can also plug in any function with the same shape through
//! [`CustomReducer`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

/// Named parameters handed to a reducer (`reducer_params` in configuration).
pub type ReducerParams = BTreeMap<String, f64>;

/// Signature shared by every reducer.
pub type ReduceFn = dyn Fn(&[f64], &ReducerParams) -> f64 + Send + Sync;

/// Name of the reducer used when none is configured.
pub const DEFAULT_REDUCER: &str = "sum";

/// Smoothing factor used by `ema` when `alpha` is not given.
pub const DEFAULT_EMA_ALPHA: f64 = 0.5;

/// Names accepted by [`Reducer::from_name`].
pub const REDUCER_NAMES: &[&str] = &["sum", "avg", "average", "max", "min", "ema"];

/// A caller-supplied reducer with the name used in generated gauge names.
#[derive(Clone)]
pub struct CustomReducer {
    name: String,
    func: Arc<ReduceFn>,
}

impl CustomReducer {
    /// Wraps a function as a named reducer.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roller::reducer::CustomReducer;
    ///
    /// let last = CustomReducer::new("last", |deltas, _params| {
    ///     deltas.last().copied().unwrap_or(0.0)
    /// });
    /// assert_eq!(last.name(), "last");
    /// assert_eq!(last.apply(&[1.0, 4.0], &Default::default()), 4.0);
    /// ```
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64], &ReducerParams) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Returns the reducer's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the wrapped function.
    pub fn apply(&self, deltas: &[f64], params: &ReducerParams) -> f64 {
        (self.func)(deltas, params)
    }
}

impl fmt::Debug for CustomReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomReducer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A reducer, resolved once when a roller is constructed.
#[derive(Debug, Clone, Default)]
pub enum Reducer {
    /// Total of all deltas.
    #[default]
    Sum,

    /// Arithmetic mean of the deltas.
    Average,

    /// Largest delta.
    Max,

    /// Smallest delta.
    Min,

    /// Exponential moving average seeded with the first delta.
    Ema {
        /// Weight of each new delta, in `(0, 1]`.
        alpha: f64,
    },

    /// A caller-supplied function.
    Custom(CustomReducer),
}

impl Reducer {
    /// Looks up a built-in reducer by name.
    ///
    /// `ema` reads its `alpha` from `params`, falling back to
    /// [`DEFAULT_EMA_ALPHA`]. Other parameters are ignored by the built-ins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownReducer`] for a name not in
    /// [`REDUCER_NAMES`], and [`ConfigError::InvalidReducerParam`] when
    /// `alpha` is outside `(0, 1]`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roller::reducer::{Reducer, ReducerParams};
    ///
    /// let params = ReducerParams::from([("alpha".to_string(), 0.25)]);
    /// let ema = Reducer::from_name("ema", &params).unwrap();
    /// assert_eq!(ema.name(), "ema");
    /// assert!(Reducer::from_name("median", &params).is_err());
    /// ```
    pub fn from_name(name: &str, params: &ReducerParams) -> Result<Self, ConfigError> {
        match name {
            "sum" => Ok(Self::Sum),
            "avg" | "average" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "ema" => {
                let alpha = params.get("alpha").copied().unwrap_or(DEFAULT_EMA_ALPHA);
                if alpha.is_nan() || alpha <= 0.0 || alpha > 1.0 {
                    return Err(ConfigError::InvalidReducerParam {
                        reducer: name.to_string(),
                        param: "alpha".to_string(),
                        value: alpha,
                        reason: "must be in (0, 1]".to_string(),
                    });
                }
                Ok(Self::Ema { alpha })
            }
            _ => Err(ConfigError::UnknownReducer {
                name: name.to_string(),
            }),
        }
    }

    /// Canonical name, used when generating output gauge names.
    pub fn name(&self) -> &str {
        match self {
            Self::Sum => "sum",
            Self::Average => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Ema { .. } => "ema",
            Self::Custom(custom) => custom.name(),
        }
    }

    /// Reduces a delta window to one value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use roller::reducer::{Reducer, ReducerParams};
    ///
    /// let params = ReducerParams::new();
    /// let deltas = [1.0, 3.0, 2.0];
    /// assert_eq!(Reducer::Sum.apply(&deltas, &params), 6.0);
    /// assert_eq!(Reducer::Average.apply(&deltas, &params), 2.0);
    /// assert_eq!(Reducer::Max.apply(&deltas, &params), 3.0);
    /// assert_eq!(Reducer::Min.apply(&[], &params), f64::INFINITY);
    /// ```
    pub fn apply(&self, deltas: &[f64], params: &ReducerParams) -> f64 {
        match self {
            Self::Sum => sum(deltas),
            Self::Average => average(deltas),
            Self::Max => max(deltas),
            Self::Min => min(deltas),
            Self::Ema { alpha } => ema(deltas, *alpha),
            Self::Custom(custom) => custom.apply(deltas, params),
        }
    }
}

/// Total change over the window; `0.0` when empty.
pub fn sum(deltas: &[f64]) -> f64 {
    // Explicit 0.0 seed: `Iterator::sum` on floats starts from -0.0.
    deltas.iter().fold(0.0, |total, delta| total + delta)
}

/// Mean change; `0.0` (not NaN) when empty.
#[allow(clippy::cast_precision_loss)] // window lengths are far below 2^52
pub fn average(deltas: &[f64]) -> f64 {
    if deltas.is_empty() {
        return 0.0;
    }
    sum(deltas) / deltas.len() as f64
}

/// Largest change; `-inf` when empty.
pub fn max(deltas: &[f64]) -> f64 {
    deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Smallest change; `+inf` when empty.
pub fn min(deltas: &[f64]) -> f64 {
    deltas.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Exponential moving average; `0.0` when empty.
pub fn ema(deltas: &[f64], alpha: f64) -> f64 {
    let mut iter = deltas.iter().copied();
    let Some(seed) = iter.next() else {
        return 0.0;
    };
    iter.fold(seed, |prev, delta| alpha * delta + (1.0 - alpha) * prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_values() {
        let params = ReducerParams::new();

        assert_eq!(Reducer::Sum.apply(&[], &params), 0.0);
        assert_eq!(Reducer::Average.apply(&[], &params), 0.0);
        assert_eq!(Reducer::Max.apply(&[], &params), f64::NEG_INFINITY);
        assert_eq!(Reducer::Min.apply(&[], &params), f64::INFINITY);
        assert_eq!(Reducer::Ema { alpha: 0.5 }.apply(&[], &params), 0.0);
    }

    #[test]
    fn test_sum_equals_average_times_len() {
        let windows: [&[f64]; 4] = [
            &[1.0],
            &[1.0, 2.0, 3.0],
            &[0.5, 0.25, 10.0, 0.0, 7.5],
            &[100.0, 0.0, 0.0, 3.0],
        ];

        for deltas in windows {
            #[allow(clippy::cast_precision_loss)]
            let len = deltas.len() as f64;
            assert!((sum(deltas) - average(deltas) * len).abs() < 1e-9);
        }
    }

    #[test]
    fn test_min_max() {
        let deltas = [3.0, 0.0, 7.0, 1.0];
        assert_eq!(max(&deltas), 7.0);
        assert_eq!(min(&deltas), 0.0);
    }

    #[test]
    fn test_ema() {
        // Seed with the first delta.
        assert_eq!(ema(&[4.0], 0.5), 4.0);
        // 0.5 * 2 + 0.5 * 4 = 3, then 0.5 * 0 + 0.5 * 3 = 1.5
        assert!((ema(&[4.0, 2.0, 0.0], 0.5) - 1.5).abs() < f64::EPSILON);
        // alpha = 1 tracks the last delta exactly.
        assert_eq!(ema(&[4.0, 2.0, 9.0], 1.0), 9.0);
    }

    #[test]
    fn test_from_name() {
        let params = ReducerParams::new();

        assert!(matches!(Reducer::from_name("sum", &params), Ok(Reducer::Sum)));
        assert!(matches!(Reducer::from_name("avg", &params), Ok(Reducer::Average)));
        assert!(matches!(
            Reducer::from_name("average", &params),
            Ok(Reducer::Average)
        ));
        assert!(matches!(Reducer::from_name("max", &params), Ok(Reducer::Max)));
        assert!(matches!(Reducer::from_name("min", &params), Ok(Reducer::Min)));

        match Reducer::from_name("ema", &params) {
            Ok(Reducer::Ema { alpha }) => assert_eq!(alpha, DEFAULT_EMA_ALPHA),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            Reducer::from_name("p99", &params),
            Err(ConfigError::UnknownReducer { .. })
        ));
    }

    #[test]
    fn test_ema_alpha_validation() {
        for alpha in [0.0, -0.1, 1.5, f64::NAN] {
            let params = ReducerParams::from([("alpha".to_string(), alpha)]);
            assert!(matches!(
                Reducer::from_name("ema", &params),
                Err(ConfigError::InvalidReducerParam { .. })
            ));
        }

        let params = ReducerParams::from([("alpha".to_string(), 1.0)]);
        assert!(Reducer::from_name("ema", &params).is_ok());
    }

    #[test]
    fn test_canonical_names() {
        let params = ReducerParams::new();
        assert_eq!(Reducer::from_name("average", &params).unwrap().name(), "avg");
        assert_eq!(Reducer::default().name(), DEFAULT_REDUCER);

        let custom = Reducer::Custom(CustomReducer::new("spread", |d, _| max(d) - min(d)));
        assert_eq!(custom.name(), "spread");
    }

    #[test]
    fn test_custom_receives_params() {
        let scaled = CustomReducer::new("scaled", |deltas, params| {
            sum(deltas) * params.get("scale").copied().unwrap_or(1.0)
        });
        let params = ReducerParams::from([("scale".to_string(), 10.0)]);

        assert_eq!(Reducer::Custom(scaled).apply(&[1.0, 2.0], &params), 30.0);
    }
}
