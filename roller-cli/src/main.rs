//! CLI for the roller rolling-gauge library.
//!
//! Provides commands for checking roller configuration files, watching
//! rolled gauges over synthetic traffic, and benchmarking collection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use roller::config::{RollerSetConfig, SourceRollerConfig};
use roller::error::ConfigError;
use roller::{
    Roller, RollerConfig, RollerHandle, RollerRegistry, Scheduler, SchedulerConfig, SourceKind,
};
use tracing_subscriber::EnvFilter;

/// roller - Rolling-window gauges over cumulative Prometheus metrics.
#[derive(Parser)]
#[command(name = "roller", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Validate a roller configuration file and show the resolved rollers.
    Check {
        /// Path to the JSON configuration file.
        config_path: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Feed synthetic traffic through rollers and print the rolled gauges.
    Demo {
        /// Configuration file to build rollers from. A counter and a
        /// histogram roller are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// How long to generate traffic, in seconds.
        #[arg(long, default_value = "12")]
        seconds: u64,

        /// Reducer for the built-in demo rollers.
        #[arg(long, default_value = "sum")]
        reducer: String,
    },

    /// Run a collect-path microbenchmark.
    Bench {
        /// Number of collections per roller.
        #[arg(long, default_value = "100000")]
        points: u64,

        /// Number of counter rollers.
        #[arg(long, default_value = "30")]
        rollers: u32,
    },
}

/// Output format for `check`.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable listing.
    Text,
    /// JSON document.
    Json,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            config_path,
            format,
        } => cmd_check(&config_path, &format),
        Commands::Demo {
            config,
            seconds,
            reducer,
        } => cmd_demo(config.as_deref(), seconds, &reducer),
        Commands::Bench { points, rollers } => cmd_bench(points, rollers),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Implements `roller check <config_path>`.
fn cmd_check(config_path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = RollerSetConfig::load(config_path)?;

    // Build every roller against throwaway sources so name clashes and kind
    // problems surface here rather than at startup.
    let metrics = Registry::new();
    let rollers = RollerRegistry::new();
    let handles = build_rollers(&config.rollers, &metrics, &rollers)?.handles;

    let scheduler = Scheduler::with_config(config.scheduler.clone())?;
    for handle in &handles {
        scheduler.add(handle.clone());
    }

    match format {
        OutputFormat::Text => {
            println!("Config: {}", config_path.display());
            println!(
                "Scheduler: wait_period={}s (max {}s), failure_policy={:?}",
                scheduler.wait_period(),
                config.scheduler.max_wait_period,
                config.scheduler.failure_policy
            );
            println!();
            println!("Rollers: {}", handles.len());
            for (entry, handle) in config.rollers.iter().zip(&handles) {
                let roller = handle.lock();
                println!("  - {} ({} {})", roller.name(), entry.kind, entry.source);
                println!(
                    "      reducer={}, every={}, retention={}",
                    roller.reducer().name(),
                    format_duration_secs(roller.update_seconds()),
                    format_duration_secs(roller.retention().as_secs())
                );
                if roller.kind() == SourceKind::Histogram {
                    println!("      buckets={}", roller.bucket_labels().join(", "));
                }
            }
        }
        OutputFormat::Json => {
            let rollers_json: Vec<serde_json::Value> = handles
                .iter()
                .map(|handle| {
                    let roller = handle.lock();
                    serde_json::json!({
                        "name": roller.name(),
                        "source": roller.source_name(),
                        "kind": roller.kind(),
                        "reducer": roller.reducer().name(),
                        "update_seconds": roller.update_seconds(),
                        "retention_seconds": roller.retention().as_secs_f64(),
                        "buckets": roller.bucket_labels(),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "config": config_path.display().to_string(),
                "wait_period": scheduler.wait_period(),
                "scheduler": config.scheduler,
                "rollers": rollers_json,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `roller demo`.
#[allow(clippy::cast_precision_loss)] // synthetic traffic values are small
fn cmd_demo(
    config_path: Option<&Path>,
    seconds: u64,
    reducer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Registry::new();
    let rollers = RollerRegistry::new();

    let (scheduler_config, entries) = match config_path {
        Some(path) => {
            let config = RollerSetConfig::load(path)?;
            (config.scheduler, config.rollers)
        }
        None => (SchedulerConfig::default(), demo_entries(reducer)),
    };
    let built = build_rollers(&entries, &metrics, &rollers)?;
    let scheduler = demo_scheduler(scheduler_config, &built.handles)?;
    let updater = roller::scheduler::start(Some(Arc::new(scheduler)), &rollers)?;

    tracing::info!(
        rollers = built.handles.len(),
        wait_period = updater.scheduler().wait_period(),
        seconds,
        "generating synthetic traffic"
    );

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut step: u64 = 0;
    while Instant::now() < deadline {
        for source in built.sources.values() {
            match source {
                DemoSource::Counter(counter) => counter.inc_by((step % 7) as f64),
                DemoSource::Histogram(histogram) => histogram.observe((step % 10) as f64 * 0.1),
            }
        }
        step += 1;
        std::thread::sleep(Duration::from_millis(100));
    }

    if updater.is_finished() {
        updater.join()?;
        return Ok(());
    }

    let families: Vec<_> = metrics
        .gather()
        .into_iter()
        .filter(|family| rollers.get(family.get_name()).is_some())
        .collect();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    print!("{}", String::from_utf8(buffer)?);

    Ok(())
}

/// Implements `roller bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(points: u64, roller_count: u32) -> Result<(), Box<dyn std::error::Error>> {
    println!("roller collect-path benchmark");
    println!("  Collections per roller: {points}");
    println!("  Rollers: {roller_count}");
    println!();

    let metrics = Registry::new();
    let rollers = RollerRegistry::new();
    let mut counters = Vec::with_capacity(roller_count as usize);
    let mut handles = Vec::with_capacity(roller_count as usize);
    for i in 0..roller_count {
        let counter = Counter::new(format!("bench_{i}_total"), "bench")?;
        let config = RollerConfig::new().with_update_interval(Duration::from_secs(1));
        handles.push(Roller::counter(counter.clone(), config, &metrics, &rollers)?);
        counters.push(counter);
    }

    println!("Collecting {points} samples across {roller_count} rollers...");

    let mut ts = 1_700_000_000_000_000_000u64;
    let start = Instant::now();

    for _ in 0..points {
        ts += 1_000_000_000;
        for (counter, handle) in counters.iter().zip(&handles) {
            counter.inc();
            handle.collect_at(ts)?;
        }
    }

    let elapsed = start.elapsed();
    let total = points * u64::from(roller_count);
    let ns_per_collect = elapsed.as_nanos() as f64 / total as f64;
    let collects_per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Total collections: {total}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_collect:.1} ns/collect");
    println!("  Throughput: {collects_per_sec:.0} collects/sec");

    Ok(())
}

/// Scheduler for `roller demo`, honoring the configured scheduler options.
fn demo_scheduler(
    config: SchedulerConfig,
    handles: &[RollerHandle],
) -> Result<Scheduler, ConfigError> {
    let scheduler = Scheduler::with_config(config)?;
    for handle in handles {
        scheduler.add(handle.clone());
    }
    Ok(scheduler)
}

/// Default demo rollers: one counter and one histogram, both every second.
fn demo_entries(reducer: &str) -> Vec<SourceRollerConfig> {
    let roller = RollerConfig::new()
        .with_reducer(reducer)
        .with_update_interval(Duration::from_secs(1))
        .with_retention(Duration::from_secs(10));

    vec![
        SourceRollerConfig {
            source: "demo_requests_total".to_string(),
            kind: SourceKind::Counter,
            buckets: None,
            roller: roller.clone(),
        },
        SourceRollerConfig {
            source: "demo_latency_seconds".to_string(),
            kind: SourceKind::Histogram,
            buckets: Some(vec![0.25, 0.5, 1.0]),
            roller,
        },
    ]
}

/// A synthetic source created for a configuration entry.
#[derive(Clone)]
enum DemoSource {
    Counter(Counter),
    Histogram(Histogram),
}

/// Rollers built from configuration entries, plus the sources they follow.
struct Built {
    sources: BTreeMap<String, DemoSource>,
    handles: Vec<RollerHandle>,
}

/// Creates and registers one source per distinct source name, then a roller
/// per entry.
fn build_rollers(
    entries: &[SourceRollerConfig],
    metrics: &Registry,
    rollers: &RollerRegistry,
) -> Result<Built, Box<dyn std::error::Error>> {
    let mut sources = BTreeMap::new();
    let mut handles = Vec::with_capacity(entries.len());

    for entry in entries {
        let source = match sources.get(&entry.source) {
            Some(existing) => DemoSource::clone(existing),
            None => {
                let created = create_source(entry, metrics)?;
                sources.insert(entry.source.clone(), created.clone());
                created
            }
        };

        // A kind clash between entries sharing a source name is reported by
        // the roller constructor.
        let handle = match source {
            DemoSource::Counter(counter) if entry.kind == SourceKind::Counter => {
                Roller::counter(counter, entry.roller.clone(), metrics, rollers)?
            }
            DemoSource::Histogram(histogram) if entry.kind == SourceKind::Histogram => {
                Roller::histogram(histogram, entry.roller.clone(), metrics, rollers)?
            }
            DemoSource::Counter(counter) => {
                Roller::histogram(counter, entry.roller.clone(), metrics, rollers)?
            }
            DemoSource::Histogram(histogram) => {
                Roller::counter(histogram, entry.roller.clone(), metrics, rollers)?
            }
        };
        handles.push(handle);
    }

    Ok(Built { sources, handles })
}

fn create_source(
    entry: &SourceRollerConfig,
    metrics: &Registry,
) -> Result<DemoSource, Box<dyn std::error::Error>> {
    let source = match entry.kind {
        SourceKind::Counter => {
            let counter = Counter::new(entry.source.as_str(), "synthetic source")?;
            metrics.register(Box::new(counter.clone()))?;
            DemoSource::Counter(counter)
        }
        SourceKind::Histogram => {
            let mut opts = HistogramOpts::new(entry.source.as_str(), "synthetic source");
            if let Some(buckets) = &entry.buckets {
                opts = opts.buckets(buckets.clone());
            }
            let histogram = Histogram::with_opts(opts)?;
            metrics.register(Box::new(histogram.clone()))?;
            DemoSource::Histogram(histogram)
        }
    };
    Ok(source)
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
