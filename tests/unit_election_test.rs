// tests/unit_election_test.rs

//! Leader election: the one-vote-per-epoch invariant, tallying, and the
//! election-status FSM step.

mod common;

use common::{add_peer, master_config, test_global, MockFactory, MockPeerClient};
use std::time::Duration;
use tokio::time::Instant;
use vigil::monitor::election::{self, ElectionStatus};
use vigil::monitor::state::{FailoverState, MasterStatus};

#[tokio::test]
async fn test_vote_leader_grants_at_most_one_vote_per_epoch() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    let (epoch, voted) = election::vote_leader(&global, &master, 5, "candidate-a");
    assert_eq!((epoch, voted.as_str()), (5, "candidate-a"));

    // A second request in the same epoch returns the prior vote unchanged.
    let (epoch, voted) = election::vote_leader(&global, &master, 5, "candidate-b");
    assert_eq!((epoch, voted.as_str()), (5, "candidate-a"));

    // Repeating the original request is idempotent.
    let (epoch, voted) = election::vote_leader(&global, &master, 5, "candidate-a");
    assert_eq!((epoch, voted.as_str()), (5, "candidate-a"));

    // A newer epoch may change the vote.
    let (epoch, voted) = election::vote_leader(&global, &master, 6, "candidate-b");
    assert_eq!((epoch, voted.as_str()), (6, "candidate-b"));

    // A stale epoch cannot rewind it.
    let (epoch, voted) = election::vote_leader(&global, &master, 4, "candidate-c");
    assert_eq!((epoch, voted.as_str()), (6, "candidate-b"));
}

#[tokio::test]
async fn test_vote_leader_ratchets_the_current_epoch() {
    let factory = MockFactory::new();
    let global = test_global("self-run-id", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    assert_eq!(global.current_epoch(), 0);
    election::vote_leader(&global, &master, 9, "candidate-a");
    assert_eq!(global.current_epoch(), 9);

    // Never downward.
    election::vote_leader(&global, &master, 3, "candidate-b");
    assert_eq!(global.current_epoch(), 9);
}

/// Three monitors, quorum 2: peer A votes for us, peer B votes for itself.
/// With our own ballot the tally is self: 2, B: 1, and we win the term.
#[tokio::test]
async fn test_three_monitor_election_confirms_this_monitor() {
    let factory = MockFactory::new();
    // "sentinel-z" outranks "sentinel-b" on the deterministic tie-break.
    let global = test_global("sentinel-z", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    global.ratchet_epoch(8);
    {
        let mut m = master.lock();
        m.status = MasterStatus::Odown;
        m.failover_state = FailoverState::WaitLeaderElection;
        m.failover_epoch = 8;
        m.failover_start_time = Some(Instant::now());
    }

    let peer_a = MockPeerClient::new();
    let peer_b = MockPeerClient::new();
    let record_a = add_peer(&master, "sentinel-a", peer_a);
    let record_b = add_peer(&master, "sentinel-b", peer_b);
    record_a.lock().leader_id = "sentinel-z".to_string();
    record_a.lock().leader_epoch = 8;
    record_b.lock().leader_id = "sentinel-b".to_string();
    record_b.lock().leader_epoch = 8;

    let (winner, epoch) = election::check_who_is_leader(&global, &master);
    assert_eq!(winner.as_deref(), Some("sentinel-z"));
    assert_eq!(epoch, 8);

    // The status check advances the FSM into slave selection.
    let status = election::check_election_status(&global, &master).await;
    assert_eq!(status, ElectionStatus::Won);
    assert_eq!(master.lock().failover_state, FailoverState::SelectSlave);
}

#[tokio::test]
async fn test_lone_vote_below_quorum_confirms_nobody() {
    let factory = MockFactory::new();
    let global = test_global("sentinel-z", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    global.ratchet_epoch(8);
    {
        let mut m = master.lock();
        m.failover_epoch = 8;
    }
    // Two peers exist but neither has voted: our own ballot is 1 of 3.
    add_peer(&master, "sentinel-a", MockPeerClient::new());
    add_peer(&master, "sentinel-b", MockPeerClient::new());

    let (winner, _) = election::check_who_is_leader(&global, &master);
    assert_eq!(winner, None);
}

#[tokio::test]
async fn test_stale_epoch_votes_are_not_tallied() {
    let factory = MockFactory::new();
    let global = test_global("sentinel-z", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    global.ratchet_epoch(8);
    master.lock().failover_epoch = 8;

    let record_a = add_peer(&master, "sentinel-a", MockPeerClient::new());
    let record_b = add_peer(&master, "sentinel-b", MockPeerClient::new());
    // Votes from an older term do not count toward epoch 8.
    record_a.lock().leader_id = "sentinel-z".to_string();
    record_a.lock().leader_epoch = 7;
    record_b.lock().leader_id = "sentinel-z".to_string();
    record_b.lock().leader_epoch = 7;

    let (winner, _) = election::check_who_is_leader(&global, &master);
    assert_eq!(winner, None);
}

#[tokio::test(start_paused = true)]
async fn test_election_aborts_after_failover_timeout() {
    let factory = MockFactory::new();
    let global = test_global("sentinel-z", factory.clone());
    let master = global
        .add_master(master_config("mymaster", "10.0.0.1", 6379, 2))
        .unwrap();

    global.ratchet_epoch(8);
    {
        let mut m = master.lock();
        m.status = MasterStatus::Odown;
        m.failover_state = FailoverState::WaitLeaderElection;
        m.failover_epoch = 8;
        m.failover_start_time = Some(Instant::now());
    }
    // A peer voted for someone else, so we never win.
    let record = add_peer(&master, "sentinel-a", MockPeerClient::new());
    record.lock().leader_id = "sentinel-a".to_string();
    record.lock().leader_epoch = 8;

    // Before the timeout the election stays pending.
    let status = election::check_election_status(&global, &master).await;
    assert_eq!(status, ElectionStatus::Pending);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let status = election::check_election_status(&global, &master).await;
    assert_eq!(status, ElectionStatus::Aborted);
    assert_eq!(master.lock().failover_state, FailoverState::None);
}
