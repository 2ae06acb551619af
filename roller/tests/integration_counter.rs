//! Integration tests for counter rollers.
//!
//! These tests cover the full construction contract (naming, registration,
//! initial empty-window values, kind checks) and windowed collection over
//! `prometheus` counters and arbitrary collectors.

use prometheus::core::Collector;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, IntCounter, Registry};
use roller::error::{ConfigError, RollerError};
use roller::reducer::CustomReducer;
use roller::{MetricSource, Roller, RollerConfig, RollerRegistry, SourceKind};
use std::time::Duration;

const SEC: u64 = 1_000_000_000;

/// Base timestamp for tests: a round number of seconds.
const BASE_TIME: u64 = 1_700_000_000 * SEC;

/// Helper: fresh metric and roller registries.
fn registries() -> (Registry, RollerRegistry) {
    (Registry::new(), RollerRegistry::new())
}

#[test]
fn test_generated_name_and_documentation() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("http_requests_total", "Requests").unwrap();

    for reducer in ["sum", "avg", "average", "max", "min", "ema"] {
        let config = RollerConfig::new().with_reducer(reducer);
        let handle = Roller::counter(counter.clone(), config, &metrics, &rollers).unwrap();
        let roller = handle.lock();

        let canonical = if reducer == "average" { "avg" } else { reducer };
        assert_eq!(roller.name(), format!("http_requests_total_{canonical}_rolled"));
        assert_eq!(
            roller.documentation(),
            "Tracks the recent behavior of http_requests_total"
        );

        // "avg" and "average" share a gauge name; free it for the next case.
        roller.unregister(&metrics).unwrap();
    }
}

#[test]
fn test_explicit_name_and_documentation() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("bytes_sent_total", "Bytes").unwrap();
    let config = RollerConfig::new()
        .with_name("bytes_sent_last_5m")
        .with_documentation("Bytes sent over the last five minutes");

    let handle = Roller::counter(counter, config, &metrics, &rollers).unwrap();

    assert_eq!(handle.name(), "bytes_sent_last_5m");
    assert!(rollers.get("bytes_sent_last_5m").is_some());
    let families = metrics.gather();
    assert_eq!(families.len(), 1);
    assert_eq!(families[0].get_name(), "bytes_sent_last_5m");
    assert_eq!(families[0].get_help(), "Bytes sent over the last five minutes");
}

#[test]
fn test_collect_once_reports_zero_for_sum_and_avg() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("once_total", "Once").unwrap();
    counter.inc_by(42.0);

    for reducer in ["sum", "avg"] {
        let config = RollerConfig::new().with_reducer(reducer);
        let handle = Roller::counter(counter.clone(), config, &metrics, &rollers).unwrap();
        handle.collect().unwrap();
        assert_eq!(handle.lock().value(), Some(0.0), "reducer {reducer}");
    }
}

#[test]
fn test_reducers_over_same_window() {
    let (metrics, rollers) = registries();
    let counter = IntCounter::new("jobs_total", "Jobs").unwrap();

    let handles: Vec<_> = ["sum", "avg", "max", "min"]
        .into_iter()
        .map(|reducer| {
            let config = RollerConfig::new().with_reducer(reducer);
            Roller::counter(counter.clone(), config, &metrics, &rollers).unwrap()
        })
        .collect();

    let collect_all = |ts: u64| {
        for handle in &handles {
            handle.collect_at(ts).unwrap();
        }
    };

    collect_all(BASE_TIME);
    for (i, step) in [2, 6, 1].into_iter().enumerate() {
        counter.inc_by(step);
        collect_all(BASE_TIME + (i as u64 + 1) * 5 * SEC);
    }

    let values: Vec<_> = handles.iter().map(|h| h.lock().value().unwrap()).collect();
    assert_eq!(values, vec![9.0, 3.0, 6.0, 1.0]);
}

#[test]
fn test_ema_reducer_with_alpha() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("ema_total", "Ema").unwrap();
    let config = RollerConfig::new()
        .with_reducer("ema")
        .with_reducer_param("alpha", 0.25);
    let handle = Roller::counter(counter.clone(), config, &metrics, &rollers).unwrap();

    handle.collect_at(BASE_TIME).unwrap();
    counter.inc_by(8.0);
    handle.collect_at(BASE_TIME + SEC).unwrap();
    counter.inc_by(4.0);
    handle.collect_at(BASE_TIME + 2 * SEC).unwrap();

    // Seeded with 8, then 0.25 * 4 + 0.75 * 8 = 7.
    assert_eq!(handle.lock().value(), Some(7.0));
}

#[test]
fn test_custom_reducer_names_gauge() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("spread_total", "Spread").unwrap();
    let spread = CustomReducer::new("spread", |deltas, _| {
        let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
        if deltas.is_empty() { 0.0 } else { max - min }
    });
    let config = RollerConfig::new().with_custom_reducer(spread);
    let handle = Roller::counter(counter.clone(), config, &metrics, &rollers).unwrap();

    assert_eq!(handle.name(), "spread_total_spread_rolled");

    handle.collect_at(BASE_TIME).unwrap();
    counter.inc_by(1.0);
    handle.collect_at(BASE_TIME + SEC).unwrap();
    counter.inc_by(10.0);
    handle.collect_at(BASE_TIME + 2 * SEC).unwrap();

    assert_eq!(handle.lock().value(), Some(9.0));
}

#[test]
fn test_kind_mismatch() {
    let (metrics, rollers) = registries();
    let histogram = Histogram::with_opts(HistogramOpts::new("h_seconds", "H")).unwrap();

    let err = Roller::counter(histogram, RollerConfig::new(), &metrics, &rollers).unwrap_err();
    match err {
        RollerError::Config(ConfigError::SourceKindMismatch {
            name,
            expected,
            found,
        }) => {
            assert_eq!(name, "h_seconds");
            assert_eq!(expected, SourceKind::Counter);
            assert_eq!(found, SourceKind::Histogram);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_configurations() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("cfg_total", "Cfg").unwrap();

    let cases = [
        RollerConfig::new().with_update_interval(Duration::ZERO),
        RollerConfig::new().with_update_interval(Duration::from_millis(2500)),
        RollerConfig::new().with_reducer("median"),
        RollerConfig::new()
            .with_reducer("ema")
            .with_reducer_param("alpha", 1.5),
    ];

    for config in cases {
        let result = Roller::counter(counter.clone(), config, &metrics, &rollers);
        assert!(matches!(result, Err(RollerError::Config(_))));
    }
    assert!(rollers.is_empty());
    assert!(metrics.gather().is_empty());
}

#[test]
fn test_collector_source() {
    let (metrics, rollers) = registries();
    let counter = Counter::new("boxed_total", "Boxed").unwrap();
    let boxed: Box<dyn Collector> = Box::new(counter.clone());
    let source = MetricSource::from_collector(boxed).unwrap();
    assert_eq!(source.kind(), SourceKind::Counter);

    let handle = Roller::counter(source, RollerConfig::new(), &metrics, &rollers).unwrap();
    handle.collect_at(BASE_TIME).unwrap();
    counter.inc_by(5.0);
    handle.collect_at(BASE_TIME + 5 * SEC).unwrap();

    assert_eq!(handle.name(), "boxed_total_sum_rolled");
    assert_eq!(handle.lock().value(), Some(5.0));
}

#[test]
fn test_gauge_collector_is_unsupported() {
    let gauge = Gauge::new("temperature", "Not cumulative").unwrap();
    let result = MetricSource::from_collector(Box::new(gauge));
    assert!(matches!(result, Err(ConfigError::UnsupportedSource { .. })));
}
