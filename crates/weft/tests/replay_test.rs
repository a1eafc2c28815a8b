//! Integration Test: failing schedules are saved and replayed
//!
//! A lost update found by the search is written to a schedule file. Loading
//! that file, either through `Scenario::replay` or from inside the test
//! with `run_saved_schedule`, must fail again on the very first run.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft::infrastructure::schedule_file;
use weft::{Address, Controller, ControlResult, EngineConfig, ExploreResult, Outcome, Scenario, Schedule};

fn racy_test(counter: Arc<AtomicU64>, saved: Option<&Path>) -> impl FnMut(&mut Controller) -> ControlResult {
    let saved = saved.map(Path::to_path_buf);
    move |ctl: &mut Controller| -> ControlResult {
        counter.store(0, Ordering::SeqCst);
        if let Some(path) = &saved {
            ctl.run_saved_schedule(path)?;
        }
        for i in 0..2 {
            let c = Arc::clone(&counter);
            ctl.create_thread(&format!("inc{i}"), move |cx| {
                cx.read(Address::of(&*c))?;
                let v = c.load(Ordering::SeqCst);
                cx.write(Address::of(&*c))?;
                c.store(v + 1, Ordering::SeqCst);
                Ok(())
            })?;
        }
        ctl.context_bounded_search(2)?;
        ctl.check(counter.load(Ordering::SeqCst) == 2, "lost update")
    }
}

fn failing_schedule(result: &ExploreResult) -> Schedule {
    match &result.outcome {
        Outcome::AssertionViolation { schedule, .. } => schedule.clone(),
        other => panic!("expected a lost update, got {other}"),
    }
}

fn explore_and_save(path: &Path) -> Schedule {
    let mut config = EngineConfig::default();
    config.save_failing_schedule = Some(path.to_path_buf());
    let scenario = Scenario::new("racy counter", config).unwrap();
    let result = scenario.explore(&mut racy_test(Arc::new(AtomicU64::new(0)), None)).unwrap();
    failing_schedule(&result)
}

#[test]
fn test_failing_schedule_is_saved() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lost_update.sched");

    let failing = explore_and_save(&path);

    assert!(path.exists());
    let loaded = schedule_file::load(&path)?;
    assert_eq!(loaded.transitions().len(), failing.transitions().len());
    assert!(!loaded.is_resolved());
    Ok(())
}

#[test]
fn test_replay_from_file_fails_again() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lost_update.sched");
    let failing = explore_and_save(&path);
    let loaded = schedule_file::load(&path).unwrap();

    let scenario = Scenario::new("racy counter replay", EngineConfig::default()).unwrap();
    let replayed = scenario.replay(&mut racy_test(Arc::new(AtomicU64::new(0)), None), &loaded).unwrap();

    assert_eq!(replayed.runs, 1);
    let schedule = failing_schedule(&replayed);
    assert_eq!(schedule.transitions(), failing.transitions());
}

#[test]
fn test_replay_is_deterministic() {
    let scenario = Scenario::new("racy counter", EngineConfig::default()).unwrap();
    let result = scenario.explore(&mut racy_test(Arc::new(AtomicU64::new(0)), None)).unwrap();
    let failing = failing_schedule(&result);

    for _ in 0..3 {
        let again = Scenario::new("racy counter replay", EngineConfig::default()).unwrap();
        let replayed = again.replay(&mut racy_test(Arc::new(AtomicU64::new(0)), None), &failing).unwrap();
        assert_eq!(failing_schedule(&replayed).transitions(), failing.transitions());
    }
}

#[test]
fn test_run_saved_schedule_fails_on_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lost_update.sched");
    explore_and_save(&path);

    let scenario = Scenario::new("racy counter from file", EngineConfig::default()).unwrap();
    let result = scenario.explore(&mut racy_test(Arc::new(AtomicU64::new(0)), Some(&path))).unwrap();

    assert_eq!(result.runs, 1);
    failing_schedule(&result);
}

#[test]
fn test_missing_schedule_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.sched");
    assert!(schedule_file::load(&missing).is_err());
}
