// src/monitor/failover.rs

//! The failover FSM transitions: the 2x-timeout gate before a new election,
//! replica selection, promotion, and abort.

use super::state::{
    FailoverState, MasterState, SlaveState, LOG_EVENT_FAILOVER_STATE_CHANGED,
    LOG_EVENT_SELECTED_SLAVE, LOG_EVENT_SLAVE_PROMOTED,
};
use super::GlobalMonitorState;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Gates the start of a new failover attempt: a fresh election may only begin
/// once `2 * FailoverTimeout` has passed since the previous start. When the
/// gate is open, bumps the epoch, enters `wait_leader_election`, and sleeps a
/// random desync delay so concurrent monitors do not split the vote. When the
/// gate is closed, waits it out and reports `false` so the caller can
/// re-check the master state.
pub async fn check_if_should_failover(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) -> bool {
    let (failover_timeout, started) = {
        let m = master.lock();
        (m.config.failover_timeout, m.failover_start_time)
    };
    let gate = failover_timeout * 2;
    let remaining = match started {
        None => Duration::ZERO,
        Some(t) => gate.saturating_sub(t.elapsed()),
    };
    if !remaining.is_zero() {
        time::sleep(remaining).await;
        return false;
    }

    let epoch = global.bump_epoch();
    {
        let mut m = master.lock();
        if m.failover_state != FailoverState::WaitLeaderElection {
            debug!(
                event = LOG_EVENT_FAILOVER_STATE_CHANGED,
                new_state = %FailoverState::WaitLeaderElection,
                epoch,
            );
        }
        m.failover_state = FailoverState::WaitLeaderElection;
        m.failover_start_time = Some(Instant::now());
        m.failover_state_change_time = Some(Instant::now());
        m.failover_epoch = epoch;
    }

    // Most monitors reach obj-down together and would all request votes at
    // once; a small random delay prevents split votes.
    let desync = rand::thread_rng().gen_range(0..super::election::MAX_DESYNC_MS);
    time::sleep(Duration::from_millis(desync)).await;
    true
}

/// Selects the best replica for promotion: candidates that are not
/// subjectively down, ranked by priority ascending, replication offset
/// descending, then run ID ascending.
pub fn select_slave(master: &Arc<Mutex<MasterState>>) -> Option<Arc<Mutex<SlaveState>>> {
    let m = master.lock();
    let mut candidates: Vec<(u32, u64, String, Arc<Mutex<SlaveState>>)> = Vec::new();
    for slave in m.slaves.values() {
        let s = slave.lock();
        if s.down_since.is_some() {
            continue;
        }
        candidates.push((s.priority, s.repl_offset, s.run_id.clone(), slave.clone()));
    }
    candidates.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    candidates.into_iter().next().map(|(_, _, _, slave)| slave)
}

/// Records the promotion candidate, advances the FSM to `promote_slave`, and
/// issues the SLAVEOF NO ONE equivalent to it. The promotion is confirmed
/// later by the candidate's own INFO poller observing the role flip.
pub async fn promote_slave(master: &Arc<Mutex<MasterState>>, slave: Arc<Mutex<SlaveState>>) {
    let (epoch, slave_addr, slave_id, client) = {
        let mut m = master.lock();
        m.promoted_slave = Some(slave.clone());
        m.failover_state = FailoverState::PromoteSlave;
        m.failover_state_change_time = Some(Instant::now());
        let s = slave.lock();
        (m.failover_epoch, s.addr.clone(), s.run_id.clone(), s.client.clone())
    };
    debug!(
        event = LOG_EVENT_SELECTED_SLAVE,
        slave_addr = %slave_addr,
        slave_id = %slave_id,
        epoch,
    );
    debug!(
        event = LOG_EVENT_FAILOVER_STATE_CHANGED,
        new_state = %FailoverState::PromoteSlave,
        epoch,
    );

    if let Err(e) = client.slave_of_no_one().await {
        // The promotion wait below will time out and abort the failover.
        warn!(
            slave_addr = %slave_addr,
            error = %e,
            "failed to issue SLAVEOF NO ONE to promotion candidate"
        );
    }
}

/// Waits for the promoted replica to be observed as a master, bounded by the
/// failover timeout. On success, advances to `reconfig_slave`, raises the
/// published config epoch to the failover epoch, and flushes it to stable
/// storage before any reconfiguration derived from it is externalized.
pub async fn wait_promotion(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) -> bool {
    let (failover_timeout, promoted) = {
        let m = master.lock();
        (m.config.failover_timeout, m.promoted_slave.clone())
    };
    let Some(promoted) = promoted else {
        return false;
    };
    let Some(mut rx) = promoted.lock().role_switch_rx.take() else {
        return false;
    };

    let switched = matches!(
        time::timeout(failover_timeout, rx.recv()).await,
        Ok(Some(()))
    );
    promoted.lock().role_switch_rx = Some(rx);

    if !switched {
        return false;
    }

    let (name, epoch, run_id) = {
        let mut m = master.lock();
        m.failover_state = FailoverState::ReconfigSlave;
        m.failover_state_change_time = Some(Instant::now());
        m.config_epoch = m.config_epoch.max(m.failover_epoch);
        (m.name.clone(), m.failover_epoch, promoted.lock().run_id.clone())
    };
    debug!(
        event = LOG_EVENT_SLAVE_PROMOTED,
        run_id = %run_id,
        epoch,
    );
    debug!(
        event = LOG_EVENT_FAILOVER_STATE_CHANGED,
        new_state = %FailoverState::ReconfigSlave,
        epoch,
    );

    let config_epoch = master.lock().config_epoch;
    if let Err(e) = global.epoch_store.persist(&name, config_epoch).await {
        warn!(
            master = %name,
            config_epoch,
            error = %e,
            "failed to persist config epoch"
        );
    }
    true
}

/// Aborts an in-flight failover: the FSM returns to `none`, preserving the
/// right to restart once the 2x-timeout gate elapses.
pub fn abort_failover(master: &Arc<Mutex<MasterState>>) {
    let epoch = {
        let mut m = master.lock();
        m.failover_state = FailoverState::None;
        m.failover_state_change_time = Some(Instant::now());
        m.failover_epoch
    };
    debug!(
        event = LOG_EVENT_FAILOVER_STATE_CHANGED,
        new_state = %FailoverState::None,
        epoch,
    );
}
