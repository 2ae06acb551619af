//! Periodic driver that calls `collect()` on every roller at its cadence.
//!
//! The scheduler keeps an ordered list of roller handles and a shared wait
//! period: the greatest common divisor of every roller's `update_seconds`,
//! capped at [`SchedulerConfig::max_wait_period`]. Its loop wakes on
//! absolute multiples of the wait period and collects the rollers whose
//! cadence divides the current epoch second, so a 10 s roller fires at
//! `:00, :10, :20, ...` regardless of when the process started.
//!
//! # Wait Period
//!
//! ```text
//! rollers {5}        -> 5
//! rollers {5, 10}    -> 5
//! rollers {5, 10, 2} -> 1
//! rollers {10, 2}    -> 2
//! rollers {}         -> 30 (ceiling)
//! ```
//!
//! Coprime cadences drive the wait period down to one second. Every wake-up
//! is then a lock acquisition plus one modulo per roller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{FailurePolicy, SchedulerConfig};
use crate::error::{CollectError, ConfigError, RollerError, SchedulerError};
use crate::registry::RollerRegistry;
use crate::roller::RollerHandle;

/// Name of the background thread spawned by [`start`].
pub const THREAD_NAME: &str = "roller-scheduler";

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Collects registered rollers on a shared, clock-aligned cadence.
///
/// # Thread Safety
///
/// The roller list and wait period live behind one mutex. `add`, `remove`
/// and every [`tick`](Self::tick) take it, so adding a roller while the
/// loop is running is safe; the new roller is first considered on the next
/// wake-up.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

#[derive(Debug)]
struct SchedulerState {
    rollers: Vec<RollerHandle>,
    wait_period: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::from_valid_config(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Creates an idle scheduler with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an idle scheduler with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxWaitPeriod`] for a zero ceiling or
    /// one longer than a day.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SchedulerConfig) -> Self {
        let wait_period = config.max_wait_period;
        Self {
            config,
            state: Mutex::new(SchedulerState {
                rollers: Vec::new(),
                wait_period,
            }),
        }
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts tracking a roller and recomputes the wait period.
    pub fn add(&self, roller: RollerHandle) {
        let mut state = self.lock();
        tracing::info!(
            roller = roller.name(),
            update_seconds = roller.update_seconds(),
            "scheduler tracking roller"
        );
        state.rollers.push(roller);
        self.recompute_wait_period(&mut state);
    }

    /// Stops tracking the roller with the given output name and recomputes
    /// the wait period. Returns the removed handle, if any.
    ///
    /// When several tracked rollers share the name, the most recently added
    /// one is removed.
    pub fn remove(&self, name: &str) -> Option<RollerHandle> {
        let mut state = self.lock();
        let position = state.rollers.iter().rposition(|roller| roller.name() == name);
        let removed = position.map(|index| state.rollers.remove(index));
        if removed.is_some() {
            tracing::info!(roller = name, "scheduler dropped roller");
        }
        self.recompute_wait_period(&mut state);
        removed
    }

    /// Current shared wait period in seconds.
    pub fn wait_period(&self) -> u64 {
        self.lock().wait_period
    }

    /// Names of the tracked rollers, in insertion order.
    pub fn roller_names(&self) -> Vec<String> {
        self.lock()
            .rollers
            .iter()
            .map(|roller| roller.name().to_string())
            .collect()
    }

    /// Number of tracked rollers.
    pub fn len(&self) -> usize {
        self.lock().rollers.len()
    }

    /// Whether the scheduler is idle.
    pub fn is_empty(&self) -> bool {
        self.lock().rollers.is_empty()
    }

    /// Runs one collection pass for the given Unix epoch second.
    ///
    /// Every roller whose `update_seconds` divides `epoch_second` is
    /// collected, in insertion order, with its samples stamped at the start
    /// of that second. Returns how many rollers were collected.
    ///
    /// # Errors
    ///
    /// The first [`CollectError`] aborts the pass. Rollers later in the list
    /// are not collected and keep their previous values.
    pub fn tick(&self, epoch_second: u64) -> Result<usize, CollectError> {
        let state = self.lock();
        let timestamp_ns = epoch_second.saturating_mul(NANOS_PER_SEC);

        let mut collected = 0;
        for roller in &state.rollers {
            if epoch_second % roller.update_seconds() == 0 {
                roller.collect_at(timestamp_ns)?;
                collected += 1;
            }
        }

        tracing::debug!(epoch_second, collected, "scheduler tick");
        Ok(collected)
    }

    /// Runs the collection loop on the calling thread.
    ///
    /// Each iteration ticks at the current epoch second, then sleeps until
    /// the next multiple of the wait period.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::Stop`](crate::config::FailurePolicy::Stop) the
    /// first failed pass ends the loop and its error is returned. Under
    /// `Log` the error is logged and the loop never returns.
    pub fn run(&self) -> Result<(), CollectError> {
        loop {
            let now = wall_clock();
            if let Err(e) = self.tick(now.as_secs()) {
                match self.config.failure_policy {
                    FailurePolicy::Stop => {
                        tracing::error!(error = %e, "roller collection failed, scheduler stopping");
                        return Err(e);
                    }
                    FailurePolicy::Log => {
                        tracing::warn!(error = %e, "roller collection failed");
                    }
                }
            }

            thread::sleep(time_to_next_boundary(wall_clock(), self.wait_period()));
        }
    }

    fn recompute_wait_period(&self, state: &mut SchedulerState) {
        let cadences = state.rollers.iter().map(RollerHandle::update_seconds);
        state.wait_period = wait_period(cadences, self.config.max_wait_period);
        tracing::debug!(
            wait_period = state.wait_period,
            rollers = state.rollers.len(),
            "recomputed wait period"
        );
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running scheduler thread.
///
/// Dropping the handle detaches the thread; it keeps collecting until the
/// process exits.
#[derive(Debug)]
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    thread: JoinHandle<Result<(), CollectError>>,
}

impl SchedulerHandle {
    /// The scheduler driven by the thread. Rollers added here are picked up
    /// on the next wake-up.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns the collection error that stopped the loop, or
    /// [`SchedulerError::Panicked`] if the thread panicked.
    pub fn join(self) -> Result<(), RollerError> {
        match self.thread.join() {
            Ok(result) => result.map_err(RollerError::from),
            Err(_) => Err(SchedulerError::Panicked.into()),
        }
    }
}

/// Starts the collection loop on a background thread.
///
/// Without a `scheduler`, a default one is created and every roller
/// currently in `rollers` is added to it. A supplied scheduler is used as
/// is; the registry is not consulted.
///
/// # Errors
///
/// Returns [`SchedulerError::Spawn`] if the thread cannot be created.
///
/// # Examples
///
/// ```rust,no_run
/// use prometheus::{Counter, Registry};
/// use roller::{Roller, RollerConfig, RollerRegistry, scheduler};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let metrics = Registry::new();
/// let rollers = RollerRegistry::new();
/// Roller::counter(Counter::new("requests_total", "Requests")?, RollerConfig::new(), &metrics, &rollers)?;
///
/// let handle = scheduler::start(None, &rollers)?;
/// assert_eq!(handle.scheduler().len(), 1);
/// # Ok(())
/// # }
/// ```
pub fn start(
    scheduler: Option<Arc<Scheduler>>,
    rollers: &RollerRegistry,
) -> Result<SchedulerHandle, SchedulerError> {
    let scheduler = scheduler.unwrap_or_else(|| {
        let scheduler = Scheduler::new();
        for roller in rollers.handles() {
            scheduler.add(roller);
        }
        Arc::new(scheduler)
    });

    let runner = Arc::clone(&scheduler);
    let thread = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || runner.run())
        .map_err(|e| SchedulerError::Spawn { source: e })?;

    tracing::info!(
        rollers = scheduler.len(),
        wait_period = scheduler.wait_period(),
        "started roller scheduler"
    );

    Ok(SchedulerHandle { scheduler, thread })
}

/// Greatest common divisor; `gcd(0, n) == n`.
///
/// # Examples
///
/// ```rust
/// use roller::scheduler::gcd;
///
/// assert_eq!(gcd(10, 4), 2);
/// assert_eq!(gcd(0, 7), 7);
/// assert_eq!(gcd(7, 5), 1);
/// ```
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Shared wait period for a set of cadences: their GCD capped at `ceiling`,
/// or `ceiling` itself when there are none.
pub fn wait_period(cadences: impl IntoIterator<Item = u64>, ceiling: u64) -> u64 {
    match cadences.into_iter().fold(0, gcd) {
        0 => ceiling,
        period => period.min(ceiling),
    }
}

fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Time from `now` until the next multiple of `wait_period` seconds.
fn time_to_next_boundary(now: Duration, wait_period: u64) -> Duration {
    let period_ns = u128::from(wait_period.max(1)) * u128::from(NANOS_PER_SEC);
    let remaining = period_ns - now.as_nanos() % period_ns;
    Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use prometheus::{Counter, Registry};

    use super::*;
    use crate::config::RollerConfig;
    use crate::error::SourceError;
    use crate::roller::Roller;
    use crate::source::{CounterSource, MetricSource};

    /// Counter source that counts reads and can be switched to failing.
    struct SwitchCounter {
        name: String,
        reads: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl CounterSource for SwitchCounter {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn read(&self) -> Result<f64, SourceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable {
                    name: self.name.clone(),
                    reason: "switched off".to_string(),
                });
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(0.0)
        }
    }

    struct Fixture {
        handle: RollerHandle,
        reads: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    fn fixture(rollers: &RollerRegistry, metrics: &Registry, name: &str, seconds: u64) -> Fixture {
        let reads = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let source = MetricSource::counter(SwitchCounter {
            name: name.to_string(),
            reads: Arc::clone(&reads),
            failing: Arc::clone(&failing),
        });
        let config = RollerConfig::new().with_update_interval(Duration::from_secs(seconds));
        let handle = Roller::counter(source, config, metrics, rollers).unwrap();
        Fixture {
            handle,
            reads,
            failing,
        }
    }

    fn cadence_roller(rollers: &RollerRegistry, metrics: &Registry, seconds: u64) -> RollerHandle {
        let counter = Counter::new(format!("every_{seconds}s_total"), "cadence").unwrap();
        let config = RollerConfig::new().with_update_interval(Duration::from_secs(seconds));
        Roller::counter(counter, config, metrics, rollers).unwrap()
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(18, 12), 6);
        assert_eq!(gcd(5, 10), 5);
        assert_eq!(gcd(2, 5), 1);
    }

    #[test]
    fn test_wait_period_follows_cadences() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.wait_period(), 30);

        let five = cadence_roller(&rollers, &metrics, 5);
        scheduler.add(five.clone());
        assert_eq!(scheduler.wait_period(), 5);

        scheduler.add(cadence_roller(&rollers, &metrics, 10));
        assert_eq!(scheduler.wait_period(), 5);

        scheduler.add(cadence_roller(&rollers, &metrics, 2));
        assert_eq!(scheduler.wait_period(), 1);

        assert!(scheduler.remove(five.name()).is_some());
        assert_eq!(scheduler.wait_period(), 2);

        scheduler.remove("every_10s_total_sum_rolled");
        scheduler.remove("every_2s_total_sum_rolled");
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.wait_period(), 30);
    }

    #[test]
    fn test_wait_period_capped_at_ceiling() {
        assert_eq!(wait_period([60, 120], 30), 30);
        assert_eq!(wait_period([3600], 30), 30);
        assert_eq!(wait_period([], 30), 30);

        let config = SchedulerConfig {
            max_wait_period: 4,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::with_config(config).unwrap();
        assert_eq!(scheduler.wait_period(), 4);
        scheduler.add(cadence_roller(&RollerRegistry::new(), &Registry::new(), 10));
        assert_eq!(scheduler.wait_period(), 4);
    }

    #[test]
    fn test_out_of_range_ceiling_is_rejected() {
        for max_wait_period in [0, u64::MAX] {
            let config = SchedulerConfig {
                max_wait_period,
                ..SchedulerConfig::default()
            };
            assert!(matches!(
                Scheduler::with_config(config),
                Err(ConfigError::InvalidMaxWaitPeriod { .. })
            ));
        }
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let scheduler = Scheduler::new();
        scheduler.add(cadence_roller(&RollerRegistry::new(), &Registry::new(), 5));

        assert!(scheduler.remove("missing").is_none());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.wait_period(), 5);
    }

    #[test]
    fn test_tick_collects_due_rollers_only() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let two = fixture(&rollers, &metrics, "two_total", 2);
        let three = fixture(&rollers, &metrics, "three_total", 3);

        let scheduler = Scheduler::new();
        scheduler.add(two.handle.clone());
        scheduler.add(three.handle.clone());

        assert_eq!(scheduler.tick(4).unwrap(), 1);
        assert_eq!(scheduler.tick(9).unwrap(), 1);
        assert_eq!(scheduler.tick(6).unwrap(), 2);
        assert_eq!(scheduler.tick(7).unwrap(), 0);

        assert_eq!(two.reads.load(Ordering::SeqCst), 2);
        assert_eq!(three.reads.load(Ordering::SeqCst), 2);

        let history_len = two.handle.lock().history().map(|h| h.len());
        assert_eq!(history_len, Some(2));
    }

    #[test]
    fn test_tick_aborts_on_first_error() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let first = fixture(&rollers, &metrics, "first_total", 1);
        let second = fixture(&rollers, &metrics, "second_total", 1);

        let scheduler = Scheduler::new();
        scheduler.add(first.handle.clone());
        scheduler.add(second.handle.clone());

        first.failing.store(true, Ordering::SeqCst);
        let result = scheduler.tick(10);

        assert!(matches!(result, Err(CollectError::Source { ref roller, .. }) if roller == "first_total_sum_rolled"));
        assert_eq!(second.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_stops_on_failure() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let failing = fixture(&rollers, &metrics, "broken_total", 1);
        failing.failing.store(true, Ordering::SeqCst);

        let scheduler = Scheduler::new();
        scheduler.add(failing.handle.clone());

        // Every epoch second is due for a 1 s roller, so the first pass fails.
        assert!(matches!(scheduler.run(), Err(CollectError::Source { .. })));
    }

    #[test]
    fn test_start_adds_registry_rollers() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        cadence_roller(&rollers, &metrics, 5);
        cadence_roller(&rollers, &metrics, 10);

        let handle = start(None, &rollers).unwrap();
        assert_eq!(handle.scheduler().len(), 2);
        assert_eq!(handle.scheduler().wait_period(), 5);
    }

    #[test]
    fn test_start_with_given_scheduler_ignores_registry() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        cadence_roller(&rollers, &metrics, 5);

        let handle = start(Some(Arc::new(Scheduler::new())), &rollers).unwrap();
        assert!(handle.scheduler().is_empty());
        assert_eq!(handle.scheduler().wait_period(), 30);
    }

    #[test]
    fn test_join_reports_stopping_error() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let failing = fixture(&rollers, &metrics, "down_total", 1);
        failing.failing.store(true, Ordering::SeqCst);

        let handle = start(None, &rollers).unwrap();
        assert!(matches!(
            handle.join(),
            Err(RollerError::Collect(CollectError::Source { .. }))
        ));
    }

    #[test]
    fn test_log_policy_keeps_running() {
        let metrics = Registry::new();
        let rollers = RollerRegistry::new();
        let failing = fixture(&rollers, &metrics, "noisy_total", 1);
        failing.failing.store(true, Ordering::SeqCst);

        let config = SchedulerConfig {
            failure_policy: FailurePolicy::Log,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(Scheduler::with_config(config).unwrap());
        scheduler.add(failing.handle.clone());

        let handle = start(Some(Arc::clone(&scheduler)), &rollers).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
    }

    #[test]
    fn test_time_to_next_boundary() {
        let at = |secs: u64, millis: u64| Duration::from_secs(secs) + Duration::from_millis(millis);

        assert_eq!(time_to_next_boundary(at(100, 0), 5), Duration::from_secs(5));
        assert_eq!(time_to_next_boundary(at(101, 0), 5), Duration::from_secs(4));
        assert_eq!(time_to_next_boundary(at(104, 500), 5), Duration::from_millis(500));
        assert_eq!(time_to_next_boundary(at(7, 250), 1), Duration::from_millis(750));
    }

    #[test]
    fn test_time_to_next_boundary_long_period() {
        // Periods whose length in nanoseconds does not fit a u64 saturate
        // instead of wrapping to a short sleep.
        let huge = u64::MAX / 2;
        assert_eq!(time_to_next_boundary(Duration::ZERO, huge), Duration::from_nanos(u64::MAX));

        let day = 24 * 60 * 60;
        assert_eq!(
            time_to_next_boundary(Duration::from_secs(day - 1), day),
            Duration::from_secs(1)
        );
    }
}
