//! Name-keyed collection of live rollers.
//!
//! Every roller registers itself here on construction, under its output
//! gauge name. [`crate::scheduler::start`] reads the registry to seed a new
//! scheduler, so most programs keep one registry for their whole lifetime
//! and pass it by reference.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::roller::{Roller, RollerHandle};

/// Thread-safe map from output gauge name to roller.
///
/// Registering a second roller under a name that is already taken replaces
/// the first; a warning is logged when that happens.
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
/// Roller::counter(Counter::new("a_total", "A")?, RollerConfig::new(), &metrics, &rollers)?;
/// Roller::counter(Counter::new("b_total", "B")?, RollerConfig::new(), &metrics, &rollers)?;
///
/// assert_eq!(rollers.names(), vec!["a_total_sum_rolled", "b_total_sum_rolled"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RollerRegistry {
    rollers: Mutex<BTreeMap<String, RollerHandle>>,
}

impl RollerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `roller` in a handle and stores it under its name.
    pub fn insert(&self, roller: Roller) -> RollerHandle {
        let handle = RollerHandle::new(roller);
        self.insert_handle(handle.clone());
        handle
    }

    /// Stores an existing handle under its name.
    pub fn insert_handle(&self, handle: RollerHandle) {
        let name = handle.name().to_string();
        if self.lock().insert(name.clone(), handle).is_some() {
            tracing::warn!(roller = %name, "replaced roller registered under the same name");
        }
    }

    /// Looks up a roller by output gauge name.
    pub fn get(&self, name: &str) -> Option<RollerHandle> {
        self.lock().get(name).cloned()
    }

    /// Removes a roller by name, returning it if it was present.
    ///
    /// The roller keeps its output gauge; call
    /// [`Roller::unregister`] to drop that too.
    pub fn remove(&self, name: &str) -> Option<RollerHandle> {
        let removed = self.lock().remove(name);
        if removed.is_some() {
            tracing::debug!(roller = %name, "removed roller from registry");
        }
        removed
    }

    /// Snapshot of every registered roller, ordered by name.
    pub fn handles(&self) -> Vec<RollerHandle> {
        self.lock().values().cloned().collect()
    }

    /// Names of every registered roller, sorted.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of registered rollers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no rollers are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RollerHandle>> {
        self.rollers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
