//! Event type to cache invalidation mapping.
//!
//! Each event type names the local caches whose contents it makes stale.
//! Types missing from the table are ignored, so the server can introduce
//! new event types before clients know about them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Identifies one locally cached query result, e.g. `rescue.list`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Receives invalidation requests for cached data.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn invalidate(&self, key: &CacheKey) {
        self(key)
    }
}

/// Fixed mapping from event type to the cache keys it invalidates.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<String, Vec<CacheKey>>,
}

impl DispatchTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table covering the coordination domain's event types.
    pub fn standard() -> Self {
        const EMERGENCY_CALLS: &[&str] = &["emergency_call.list", "emergency_call.stats"];
        const RESCUES: &[&str] = &["rescue.list", "rescue.stats"];
        const SHELTERS: &[&str] = &["shelter.list", "shelter.stats"];
        const SUPPLIES: &[&str] = &["supply.list", "supply.stats"];
        const TASKS: &[&str] = &["task.list", "task.stats"];

        Self::empty()
            .with("emergency_call.created", EMERGENCY_CALLS)
            .with("emergency_call.updated", EMERGENCY_CALLS)
            .with("emergency_call.closed", EMERGENCY_CALLS)
            .with("rescue.created", RESCUES)
            .with("rescue.status_changed", RESCUES)
            .with("rescue.assigned", &["rescue.list", "task.list"])
            .with("shelter.created", SHELTERS)
            .with("shelter.updated", &["shelter.list"])
            .with("shelter.capacity_changed", SHELTERS)
            .with(
                "displaced_person.registered",
                &["displaced_person.list", "shelter.stats"],
            )
            .with(
                "displaced_person.relocated",
                &["displaced_person.list", "shelter.list", "shelter.stats"],
            )
            .with("supply.requested", SUPPLIES)
            .with("supply.approved", SUPPLIES)
            .with("supply.delivered", &["supply.list", "supply.stats", "shelter.list"])
            .with("task.created", TASKS)
            .with("task.assigned", TASKS)
            .with("task.completed", TASKS)
            .with("organization.updated", &["organization.list"])
    }

    /// Adds or replaces the keys for `event_type`.
    pub fn with(mut self, event_type: &str, keys: &[&str]) -> Self {
        self.insert(event_type, keys.iter().copied().map(CacheKey::from).collect());
        self
    }

    pub fn insert(&mut self, event_type: impl Into<String>, keys: Vec<CacheKey>) {
        self.entries.insert(event_type.into(), keys);
    }

    /// Keys invalidated by `event_type`; empty for unknown types.
    pub fn keys_for(&self, event_type: &str) -> &[CacheKey] {
        self.entries
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every key the table can invalidate, sorted and deduplicated.
    pub fn all_keys(&self) -> BTreeSet<CacheKey> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Invalidates the keys for `event_type` and returns how many there were.
    pub fn dispatch(&self, event_type: &str, invalidator: &dyn CacheInvalidator) -> usize {
        let keys = self.keys_for(event_type);
        for key in keys {
            invalidator.invalidate(key);
        }
        keys.len()
    }

    /// Invalidates every key once.
    pub fn invalidate_all(&self, invalidator: &dyn CacheInvalidator) -> usize {
        let keys = self.all_keys();
        for key in &keys {
            invalidator.invalidate(key);
        }
        keys.len()
    }
}
