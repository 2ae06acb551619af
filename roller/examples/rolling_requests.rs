//! Example demonstrating rolled gauges over a request counter and a latency
//! histogram.
//!
//! This example shows how to:
//! - Create counter and histogram rollers with different reducers
//! - Drive collection explicitly with `collect_at`
//! - Read rolled values back and render the registry as text exposition

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use roller::error::Result;
use roller::{Roller, RollerConfig, RollerRegistry};
use std::time::Duration;

const SEC: u64 = 1_000_000_000;

fn main() -> Result<()> {
    println!("Roller rolling requests example");

    let metrics = Registry::new();
    let rollers = RollerRegistry::new();

    let requests = Counter::new("http_requests_total", "HTTP requests served")
        .map_err(|e| roller::error::MetricsError::Declare {
            name: "http_requests_total".to_string(),
            source: e,
        })?;
    let latency = Histogram::with_opts(
        HistogramOpts::new("http_latency_seconds", "HTTP latency").buckets(vec![0.1, 0.5, 1.0]),
    )
    .map_err(|e| roller::error::MetricsError::Declare {
        name: "http_latency_seconds".to_string(),
        source: e,
    })?;

    // Requests over the last minute, and the busiest 10-second interval in it.
    let window = Duration::from_secs(60);
    let every = Duration::from_secs(10);
    let total = Roller::counter(
        requests.clone(),
        RollerConfig::new().with_retention(window).with_update_interval(every),
        &metrics,
        &rollers,
    )?;
    let peak = Roller::counter(
        requests.clone(),
        RollerConfig::new()
            .with_reducer("max")
            .with_retention(window)
            .with_update_interval(every),
        &metrics,
        &rollers,
    )?;

    // Mean per-interval bucket growth for latency.
    let slow = Roller::histogram(
        latency.clone(),
        RollerConfig::new()
            .with_reducer("avg")
            .with_retention(window)
            .with_update_interval(every),
        &metrics,
        &rollers,
    )?;

    println!("\nRegistered rollers: {:?}", rollers.names());

    let base = 1_700_000_000 * SEC;
    let traffic = [12, 40, 7, 25, 3, 18, 30, 9];
    for (i, count) in traffic.iter().enumerate() {
        for n in 0..*count {
            requests.inc();
            latency.observe(f64::from(n % 12) * 0.1);
        }

        let ts = base + (i as u64) * 10 * SEC;
        for handle in [&total, &peak, &slow] {
            handle.collect_at(ts)?;
        }

        println!(
            "t={:>3}s  requests/min={:>5}  peak/10s={:>5}  avg <=0.5s/10s={:>6.2}",
            i * 10,
            total.lock().value().unwrap_or_default(),
            peak.lock().value().unwrap_or_default(),
            slow.lock().bucket_value("0.5").unwrap_or_default(),
        );
    }

    println!("\nText exposition:");
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&metrics.gather(), &mut buffer).is_ok() {
        println!("{}", String::from_utf8_lossy(&buffer));
    }

    Ok(())
}
