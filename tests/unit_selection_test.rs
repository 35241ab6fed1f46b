// tests/unit_selection_test.rs

//! Replica selection: filtering and the (priority, offset, run ID) ranking.

mod common;

use common::{add_slave, master_config, test_global, MockFactory};
use std::sync::Arc;
use tokio::time::Instant;
use vigil::monitor::failover;

#[tokio::test]
async fn test_select_slave_prefers_lowest_priority() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let (low, _) = add_slave(&factory, &master, "10.0.0.2", 6379);
    let (high, _) = add_slave(&factory, &master, "10.0.0.3", 6379);
    low.lock().priority = 1;
    low.lock().repl_offset = 10;
    high.lock().priority = 100;
    high.lock().repl_offset = 999;

    let selected = failover::select_slave(&master).unwrap();
    assert!(Arc::ptr_eq(&selected, &low));
}

#[tokio::test]
async fn test_select_slave_prefers_highest_offset_at_equal_priority() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let (behind, _) = add_slave(&factory, &master, "10.0.0.2", 6379);
    let (ahead, _) = add_slave(&factory, &master, "10.0.0.3", 6379);
    behind.lock().repl_offset = 100;
    ahead.lock().repl_offset = 200;

    let selected = failover::select_slave(&master).unwrap();
    assert!(Arc::ptr_eq(&selected, &ahead));
}

#[tokio::test]
async fn test_select_slave_breaks_full_ties_by_run_id() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let (first, _) = add_slave(&factory, &master, "10.0.0.2", 6379);
    let (second, _) = add_slave(&factory, &master, "10.0.0.3", 6379);
    first.lock().run_id = "aaa".to_string();
    second.lock().run_id = "bbb".to_string();

    let selected = failover::select_slave(&master).unwrap();
    assert!(Arc::ptr_eq(&selected, &first));
}

#[tokio::test]
async fn test_select_slave_skips_down_replicas() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let (down, _) = add_slave(&factory, &master, "10.0.0.2", 6379);
    let (up, _) = add_slave(&factory, &master, "10.0.0.3", 6379);
    // The down replica would otherwise win on offset.
    down.lock().repl_offset = 1000;
    down.lock().down_since = Some(Instant::now());
    up.lock().repl_offset = 10;

    let selected = failover::select_slave(&master).unwrap();
    assert!(Arc::ptr_eq(&selected, &up));
}

#[tokio::test]
async fn test_select_slave_returns_none_without_candidates() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    assert!(failover::select_slave(&master).is_none());

    let (only, _) = add_slave(&factory, &master, "10.0.0.2", 6379);
    only.lock().down_since = Some(Instant::now());
    assert!(failover::select_slave(&master).is_none());
}
