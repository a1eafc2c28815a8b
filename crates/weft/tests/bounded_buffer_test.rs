//! Integration Test: bounded buffer under the execution-tree search
//!
//! Two producers and two consumers share a buffer of capacity one. The
//! tree search must terminate, never deadlock, and reach every leaf at
//! most once: the observable trace of each passing run (main's picks
//! interleaved with what the threads did) is unique.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use weft::{Controller, ControlResult, EngineConfig, Outcome, Scenario, SearchStrategy, ThreadId};

const CAPACITY: usize = 1;

type Log = Arc<Mutex<Vec<String>>>;
type Buffer = Arc<Mutex<VecDeque<usize>>>;

fn spawn_producer(ctl: &mut Controller, name: &str, item: usize, buf: &Buffer, log: &Log) -> ControlResult<ThreadId> {
    let (buf, log, label) = (Arc::clone(buf), Arc::clone(log), name.to_string());
    ctl.create_thread(name, move |cx| {
        let ready = Arc::clone(&buf);
        cx.wait_until("put", move || ready.lock().len() < CAPACITY)?;
        buf.lock().push_back(item);
        log.lock().push(format!("{label} put {item}"));
        Ok(())
    })
}

fn spawn_consumer(ctl: &mut Controller, name: &str, buf: &Buffer, log: &Log) -> ControlResult<ThreadId> {
    let (buf, log, label) = (Arc::clone(buf), Arc::clone(log), name.to_string());
    ctl.create_thread(name, move |cx| {
        let ready = Arc::clone(&buf);
        cx.wait_until("take", move || !ready.lock().is_empty())?;
        let item = buf.lock().pop_front();
        cx.assert_that(item.is_some(), "took from an empty buffer")?;
        log.lock().push(format!("{label} took {item:?}"));
        Ok(())
    })
}

#[test]
fn test_every_leaf_is_reached_once() {
    let buf: Buffer = Arc::new(Mutex::new(VecDeque::new()));
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut traces: Vec<Vec<String>> = Vec::new();

    let config = EngineConfig::default().with_search(SearchStrategy::Tree);
    let scenario = Scenario::new("bounded buffer", config).unwrap();

    let result = scenario
        .explore(&mut |ctl: &mut Controller| -> ControlResult {
            buf.lock().clear();
            log.lock().clear();
            ctl.check_forall();

            spawn_producer(ctl, "p1", 1, &buf, &log)?;
            spawn_producer(ctl, "p2", 2, &buf, &log)?;
            spawn_consumer(ctl, "c1", &buf, &log)?;
            spawn_consumer(ctl, "c2", &buf, &log)?;

            while !ctl.all_ended() {
                let picked = ctl.until_star().transfer_star()?;
                log.lock().push(format!("pick {picked}"));
            }
            ctl.check(buf.lock().is_empty(), "items left in the buffer")?;
            traces.push(log.lock().clone());
            Ok(())
        })
        .unwrap();

    let num_paths = match result.outcome {
        Outcome::Forall { num_paths, .. } => num_paths,
        ref other => panic!("expected every path to pass, got {other}"),
    };
    assert!(num_paths > 1);
    assert_eq!(traces.len() as u64, num_paths);

    let unique: HashSet<&Vec<String>> = traces.iter().collect();
    assert_eq!(unique.len(), traces.len(), "a leaf of the execution tree was reached twice");
}

#[test]
fn test_single_producer_consumer_pair() {
    let buf: Buffer = Arc::new(Mutex::new(VecDeque::new()));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let config = EngineConfig::default().with_search(SearchStrategy::Tree);
    let scenario = Scenario::new("one pair", config).unwrap();

    let result = scenario
        .explore(&mut |ctl: &mut Controller| -> ControlResult {
            buf.lock().clear();
            spawn_producer(ctl, "p", 7, &buf, &log)?;
            spawn_consumer(ctl, "c", &buf, &log)?;
            ctl.exhaustive_search()?;
            ctl.check(buf.lock().is_empty(), "items left in the buffer")
        })
        .unwrap();

    assert!(result.is_success());
    assert!(result.stats.counter(weft::domain::scenario::stat_names::TREE_NODES) > 2);
}
