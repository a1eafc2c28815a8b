//! Statistics - named counters, averages and timers of an exploration
//!
//! Coroutine threads and the controller update the same maps, so the
//! storage is a `DashMap` per kind:
//!
//! ```text
//! Statistics
//!   ├─ counters: DashMap<&'static str, u64>
//!   ├─ averages: DashMap<&'static str, (sum, samples)>
//!   └─ timers:   DashMap<&'static str, Duration>
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Counter names used by the engine.
pub mod names {
    /// Completed runs
    pub const RUNS: &str = "runs";
    /// Forall paths that passed
    pub const PATHS: &str = "paths";
    /// Forall paths whose schedule was kept
    pub const KEPT_PATHS: &str = "kept_paths";
    /// Backtracks performed
    pub const BACKTRACKS: &str = "backtracks";
    /// Immediate races seen by the tracker
    pub const RACES: &str = "races";
    /// Handoffs of control
    pub const TRANSFERS: &str = "transfers";
    /// Nodes in the execution tree at the end
    pub const TREE_NODES: &str = "tree_nodes";
    /// End-semaphore waits that timed out
    pub const TIMEOUTS: &str = "timeouts";
    /// Schedule points per run
    pub const POINTS_PER_RUN: &str = "points_per_run";
    /// Wall time of the exploration
    pub const EXPLORE_TIME: &str = "explore";
}

/// Mean of a series of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Average {
    /// Sum of the samples
    pub sum: f64,
    /// Number of samples
    pub samples: u64,
}

impl Average {
    /// Mean, or zero without samples.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Live statistics of one scenario.
#[derive(Debug, Default)]
pub struct Statistics {
    counters: DashMap<&'static str, u64>,
    averages: DashMap<&'static str, Average>,
    timers: DashMap<&'static str, Duration>,
}

impl Statistics {
    /// Empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `by` to a counter.
    pub fn increment(&self, name: &'static str, by: u64) {
        *self.counters.entry(name).or_insert(0) += by;
    }

    /// Overwrite a counter.
    pub fn set(&self, name: &'static str, value: u64) {
        self.counters.insert(name, value);
    }

    /// Current counter value (zero when never touched).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |v| *v)
    }

    /// Record one sample of an average.
    pub fn sample(&self, name: &'static str, value: f64) {
        let mut avg = self.averages.entry(name).or_default();
        avg.sum += value;
        avg.samples += 1;
    }

    /// Add `elapsed` to a timer.
    pub fn add_time(&self, name: &'static str, elapsed: Duration) {
        *self.timers.entry(name).or_default() += elapsed;
    }

    /// Start timing; the time is added when the guard drops.
    pub fn time(&self, name: &'static str) -> TimerGuard<'_> {
        TimerGuard { stats: self, name, started: Instant::now() }
    }

    /// Serializable copy of every value.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            counters: self.counters.iter().map(|e| ((*e.key()).to_string(), *e.value())).collect(),
            averages: self.averages.iter().map(|e| ((*e.key()).to_string(), *e.value())).collect(),
            timers_ms: self
                .timers
                .iter()
                .map(|e| ((*e.key()).to_string(), e.value().as_secs_f64() * 1e3))
                .collect(),
        }
    }
}

/// Adds the time it was alive to a timer.
#[derive(Debug)]
pub struct TimerGuard<'a> {
    stats: &'a Statistics,
    name: &'static str,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.stats.add_time(self.name, self.started.elapsed());
    }
}

/// Frozen statistics, ordered by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Counters
    pub counters: BTreeMap<String, u64>,
    /// Averages
    pub averages: BTreeMap<String, Average>,
    /// Timers in milliseconds
    pub timers_ms: BTreeMap<String, f64>,
}

impl StatsSnapshot {
    /// Counter value (zero when absent).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.counters {
            writeln!(f, "  {name:<18} {value}")?;
        }
        for (name, avg) in &self.averages {
            writeln!(f, "  {name:<18} avg {:.2} over {}", avg.mean(), avg.samples)?;
        }
        for (name, ms) in &self.timers_ms {
            writeln!(f, "  {name:<18} {ms:.3} ms")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_from_many_threads() {
        let stats = Arc::new(Statistics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.increment(names::TRANSFERS, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.counter(names::TRANSFERS), 400);
        assert_eq!(stats.counter(names::RACES), 0);
    }

    #[test]
    fn test_average_and_timer() {
        let stats = Statistics::new();
        stats.sample(names::POINTS_PER_RUN, 2.0);
        stats.sample(names::POINTS_PER_RUN, 4.0);
        {
            let _t = stats.time(names::EXPLORE_TIME);
        }
        let snap = stats.snapshot();
        assert!((snap.averages[names::POINTS_PER_RUN].mean() - 3.0).abs() < f64::EPSILON);
        assert!(snap.timers_ms.contains_key(names::EXPLORE_TIME));
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = Statistics::new();
        stats.set(names::PATHS, 7);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let back: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.counter(names::PATHS), 7);
        assert!(back.to_string().contains("paths"));
    }
}
