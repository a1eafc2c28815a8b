//! Engine configuration
//!
//! # Precedence
//!
//! 1. values set on [`EngineConfig`] in code
//! 2. `WEFT_*` environment variables, applied by [`EngineConfig::from_env`]
//! 3. [`EngineConfig::default`]
//!
//! | Variable | Type | Field |
//! |----------|------|-------|
//! | `WEFT_MAX_WAIT_MS` | `u64` | `max_wait_ms` |
//! | `WEFT_TREE_TIMEOUT_MS` | `u64` | `tree_acquire_timeout_ms` |
//! | `WEFT_DPOR` | `bool` | `dpor` |
//! | `WEFT_SEARCH` | `schedule` \| `tree` | `search` |
//! | `WEFT_MAX_RUNS` | `u64` | `max_runs` |
//! | `WEFT_KEEP_ALL` | `bool` | `keep_all_schedules` |
//! | `WEFT_MAX_TIMEOUTS` | `u32` | `max_timeouts_before_deadlock` |
//! | `WEFT_PRUNE_TREE` | `bool` | `delete_covered_subtrees` |
//! | `WEFT_SAVE_SCHEDULE` | path | `save_failing_schedule` |
//! | `WEFT_UNCONTROLLED` | `bool` | `run_uncontrolled` |

use crate::domain::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable for the handoff wait bound.
pub const ENV_MAX_WAIT_MS: &str = "WEFT_MAX_WAIT_MS";
/// Environment variable for the tree acquire timeout.
pub const ENV_TREE_TIMEOUT_MS: &str = "WEFT_TREE_TIMEOUT_MS";
/// Environment variable toggling DPOR.
pub const ENV_DPOR: &str = "WEFT_DPOR";
/// Environment variable selecting the search strategy.
pub const ENV_SEARCH: &str = "WEFT_SEARCH";
/// Environment variable bounding the number of runs.
pub const ENV_MAX_RUNS: &str = "WEFT_MAX_RUNS";
/// Environment variable keeping every forall schedule.
pub const ENV_KEEP_ALL: &str = "WEFT_KEEP_ALL";
/// Environment variable for end-wait timeouts tolerated before DEADLOCK.
pub const ENV_MAX_TIMEOUTS: &str = "WEFT_MAX_TIMEOUTS";
/// Environment variable toggling pruning of covered subtrees.
pub const ENV_PRUNE_TREE: &str = "WEFT_PRUNE_TREE";
/// Environment variable naming the failing-schedule dump file.
pub const ENV_SAVE_SCHEDULE: &str = "WEFT_SAVE_SCHEDULE";
/// Environment variable for the uncontrolled smoke run.
pub const ENV_UNCONTROLLED: &str = "WEFT_UNCONTROLLED";

/// How alternatives are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Backtrack over the recorded schedule
    #[default]
    Schedule,
    /// Depth-first over the shared execution tree
    Tree,
}

/// Settings of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on every handoff wait and every end wait, in milliseconds
    pub max_wait_ms: u64,
    /// Bound on spinning for the execution-tree slot, in milliseconds
    pub tree_acquire_timeout_ms: Option<u64>,
    /// Restrict alternative targets to DPOR backtrack sets
    pub dpor: bool,
    /// Schedule backtracking or execution tree
    pub search: SearchStrategy,
    /// Stop after this many runs
    pub max_runs: Option<u64>,
    /// Keep every forall schedule, not only those adding coverage
    pub keep_all_schedules: bool,
    /// End waits that may time out before DEADLOCK is reported
    pub max_timeouts_before_deadlock: u32,
    /// Free covered subtrees of the execution tree
    pub delete_covered_subtrees: bool,
    /// Where to write the schedule of a failing run
    pub save_failing_schedule: Option<PathBuf>,
    /// Run the test once with every yield passing through
    pub run_uncontrolled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 10_000,
            tree_acquire_timeout_ms: Some(5_000),
            dpor: false,
            search: SearchStrategy::Schedule,
            max_runs: None,
            keep_all_schedules: false,
            max_timeouts_before_deadlock: 0,
            delete_covered_subtrees: false,
            save_failing_schedule: None,
            run_uncontrolled: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the `WEFT_*` environment.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply every override `lookup` knows about.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), EngineError> {
        if let Some(val) = lookup(ENV_MAX_WAIT_MS) {
            self.max_wait_ms = parse_u64(ENV_MAX_WAIT_MS, &val)?;
        }
        if let Some(val) = lookup(ENV_TREE_TIMEOUT_MS) {
            self.tree_acquire_timeout_ms = match val.trim() {
                "" | "none" => None,
                other => Some(parse_u64(ENV_TREE_TIMEOUT_MS, other)?),
            };
        }
        if let Some(val) = lookup(ENV_DPOR) {
            self.dpor = parse_bool(ENV_DPOR, &val)?;
        }
        if let Some(val) = lookup(ENV_SEARCH) {
            self.search = match val.trim().to_ascii_lowercase().as_str() {
                "schedule" => SearchStrategy::Schedule,
                "tree" => SearchStrategy::Tree,
                other => {
                    return Err(EngineError::Config(format!(
                        "invalid value for {ENV_SEARCH}: expected schedule or tree, got {other:?}"
                    )))
                }
            };
        }
        if let Some(val) = lookup(ENV_MAX_RUNS) {
            self.max_runs = Some(parse_u64(ENV_MAX_RUNS, &val)?);
        }
        if let Some(val) = lookup(ENV_KEEP_ALL) {
            self.keep_all_schedules = parse_bool(ENV_KEEP_ALL, &val)?;
        }
        if let Some(val) = lookup(ENV_MAX_TIMEOUTS) {
            self.max_timeouts_before_deadlock = val.trim().parse::<u32>().map_err(|e| {
                EngineError::Config(format!("invalid value for {ENV_MAX_TIMEOUTS}: got {val:?} ({e})"))
            })?;
        }
        if let Some(val) = lookup(ENV_PRUNE_TREE) {
            self.delete_covered_subtrees = parse_bool(ENV_PRUNE_TREE, &val)?;
        }
        if let Some(val) = lookup(ENV_SAVE_SCHEDULE) {
            self.save_failing_schedule = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup(ENV_UNCONTROLLED) {
            self.run_uncontrolled = parse_bool(ENV_UNCONTROLLED, &val)?;
        }
        self.validate()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_wait_ms == 0 {
            return Err(EngineError::Config("max_wait_ms must be positive".into()));
        }
        if self.max_runs == Some(0) {
            return Err(EngineError::Config("max_runs must be positive".into()));
        }
        Ok(())
    }

    /// Handoff and end-wait bound
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Tree slot spinning bound
    pub fn tree_acquire_timeout(&self) -> Option<Duration> {
        self.tree_acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Builder-style DPOR toggle
    #[must_use]
    pub fn with_dpor(mut self, dpor: bool) -> Self {
        self.dpor = dpor;
        self
    }

    /// Builder-style strategy selection
    #[must_use]
    pub fn with_search(mut self, search: SearchStrategy) -> Self {
        self.search = search;
        self
    }

    /// Builder-style run bound
    #[must_use]
    pub fn with_max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Builder-style wait bound
    #[must_use]
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, EngineError> {
    val.trim().parse::<u64>().map_err(|e| {
        EngineError::Config(format!("invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, EngineError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::Config(format!("invalid value for {var_name}: expected boolean, got {val:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search, SearchStrategy::Schedule);
        assert_eq!(config.max_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(env(&[
                (ENV_DPOR, "true"),
                (ENV_SEARCH, "Tree"),
                (ENV_MAX_RUNS, "50"),
                (ENV_TREE_TIMEOUT_MS, "none"),
                (ENV_SAVE_SCHEDULE, "/tmp/fail.sched"),
            ]))
            .unwrap();
        assert!(config.dpor);
        assert_eq!(config.search, SearchStrategy::Tree);
        assert_eq!(config.max_runs, Some(50));
        assert_eq!(config.tree_acquire_timeout(), None);
        assert_eq!(config.save_failing_schedule, Some(PathBuf::from("/tmp/fail.sched")));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        for (var, val) in [(ENV_MAX_WAIT_MS, "soon"), (ENV_DPOR, "maybe"), (ENV_SEARCH, "bfs"), (ENV_MAX_RUNS, "0")] {
            let mut config = EngineConfig::default();
            let err = config.apply_overrides(env(&[(var, val)])).unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{var}={val}");
        }
    }

    #[test]
    fn test_serde_roundtrip_with_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"dpor": true, "search": "tree"}"#).unwrap();
        assert!(config.dpor);
        assert_eq!(config.search, SearchStrategy::Tree);
        assert_eq!(config.max_wait_ms, EngineConfig::default().max_wait_ms);
    }
}
