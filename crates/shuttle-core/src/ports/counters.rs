//! Counters port - named counters incremented on queue transitions.
//!
//! Queues call it but never depend on it for correctness.

use std::collections::HashMap;
use std::sync::Mutex;

pub trait CounterSink: Send + Sync {
    fn increment(&self, name: &str, value: u64);

    fn increment_one(&self, name: &str) {
        self.increment(name, 1);
    }
}

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCounters;

impl CounterSink for NullCounters {
    fn increment(&self, _name: &str, _value: u64) {}
}

/// Keeps totals in memory (tests, CLI summary).
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    values: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> u64 {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(name).copied().unwrap_or(0)
    }

    /// Sorted `(name, value)` pairs.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshot: Vec<_> = values.iter().map(|(k, v)| (k.clone(), *v)).collect();
        snapshot.sort();
        snapshot
    }
}

impl CounterSink for InMemoryCounters {
    fn increment(&self, name: &str, value: u64) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        *values.entry(name.to_string()).or_default() += value;
    }
}
