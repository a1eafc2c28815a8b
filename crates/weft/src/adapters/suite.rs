//! Suite - a list of scenarios run in order

use crate::domain::error::EngineError;
use crate::domain::scenario::{ExploreResult, Scenario, TestCase};
use tracing::{error, info};

type Entry = (Scenario, Box<dyn TestCase>);

/// Scenarios with the test each one explores.
#[derive(Default)]
pub struct Suite {
    entries: Vec<Entry>,
}

impl Suite {
    /// Empty suite
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `scenario`, exploring `test`.
    pub fn add(&mut self, scenario: Scenario, test: impl TestCase + 'static) -> &mut Self {
        self.entries.push((scenario, Box::new(test)));
        self
    }

    /// Drop the scenario called `name`. Returns whether one was found.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(s, _)| s.name() != name);
        self.entries.len() != before
    }

    /// Number of scenarios.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the suite has no scenario.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Explore every scenario in order.
    pub fn run(&mut self) -> SuiteResults {
        let mut results = Vec::with_capacity(self.entries.len());
        for (scenario, test) in &mut self.entries {
            info!(scenario = scenario.name(), "running scenario");
            let result = scenario.explore(test.as_mut());
            match &result {
                Ok(r) => info!(scenario = scenario.name(), success = r.is_success(), "scenario done"),
                Err(e) => error!(scenario = scenario.name(), error = %e, "scenario aborted"),
            }
            results.push((scenario.name().to_string(), result));
        }
        SuiteResults { results }
    }
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|(s, _)| s.name()).collect();
        f.debug_struct("Suite").field("scenarios", &names).finish()
    }
}

/// Results of [`Suite::run`], in suite order.
#[derive(Debug)]
pub struct SuiteResults {
    /// Scenario name and its result, or the engine error that aborted it
    pub results: Vec<(String, Result<ExploreResult, EngineError>)>,
}

impl SuiteResults {
    /// Whether every scenario ran and passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|(_, r)| r.as_ref().is_ok_and(ExploreResult::is_success))
    }

    /// Result of the scenario called `name`.
    pub fn get(&self, name: &str) -> Option<&Result<ExploreResult, EngineError>> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Names of the scenarios that failed or aborted.
    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| !r.as_ref().is_ok_and(ExploreResult::is_success))
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ControlResult;
    use crate::domain::scenario::Controller;
    use crate::infrastructure::config::EngineConfig;

    fn scenario(name: &str) -> Scenario {
        Scenario::new(name, EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_suite_runs_in_order() {
        let mut suite = Suite::new();
        suite
            .add(scenario("passes"), |ctl: &mut Controller| -> ControlResult {
                ctl.check_exists();
                Ok(())
            })
            .add(scenario("fails"), |ctl: &mut Controller| -> ControlResult { ctl.check(false, "nope") });
        assert_eq!(suite.len(), 2);

        let results = suite.run();
        assert!(!results.all_passed());
        assert_eq!(results.failed(), vec!["fails"]);
        assert!(results.get("passes").is_some_and(|r| r.as_ref().is_ok_and(ExploreResult::is_success)));
        assert_eq!(results.results[0].0, "passes");
    }

    #[test]
    fn test_remove() {
        let mut suite = Suite::new();
        suite.add(scenario("a"), |_: &mut Controller| -> ControlResult { Ok(()) });
        assert!(suite.remove("a"));
        assert!(!suite.remove("a"));
        assert!(suite.is_empty());
        assert!(suite.run().all_passed());
    }
}
