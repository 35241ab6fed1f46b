// tests/unit_detector_test.rs

//! Failure detector timing tests, driven with a paused clock.

mod common;

use common::{master_config, master_monitor, settle, test_global, MockFactory};
use std::time::Duration;
use vigil::monitor::detector;
use vigil::monitor::state::MasterStatus;

#[tokio::test(start_paused = true)]
async fn test_subjective_down_after_down_after_elapses() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();
    let node = factory.node("10.0.0.1", 6379);
    node.set_ping_ok(false);

    let mon = master_monitor(&global, &master);
    tokio::spawn(detector::run(mon));
    settle().await;

    // At exactly DownAfter the strict inequality keeps the master up.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    settle().await;
    assert_eq!(master.lock().status, MasterStatus::Up);

    // One more failing ping past the boundary flips it.
    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    {
        let m = master.lock();
        assert_eq!(m.status, MasterStatus::Sdown);
        assert!(m.down_since.is_some());
    }

    // The subjective-down channel carries exactly one signal.
    let mut rx = master.lock().subj_down_rx.take().unwrap();
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_successful_ping_revives_a_down_master() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();
    let node = factory.node("10.0.0.1", 6379);
    node.set_ping_ok(false);

    let mon = master_monitor(&global, &master);
    tokio::spawn(detector::run(mon));

    tokio::time::sleep(Duration::from_millis(4500)).await;
    settle().await;
    assert_eq!(master.lock().status, MasterStatus::Sdown);

    node.set_ping_ok(true);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    settle().await;
    {
        let m = master.lock();
        assert_eq!(m.status, MasterStatus::Up);
        assert!(m.down_since.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_healthy_master_never_transitions() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let mon = master_monitor(&global, &master);
    tokio::spawn(detector::run(mon));

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    let m = master.lock();
    assert_eq!(m.status, MasterStatus::Up);
    assert!(m.down_since.is_none());
}
