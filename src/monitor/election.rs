// src/monitor/election.rs

//! Epoch-scoped leader election among peer monitors: at most one leader per
//! epoch, winner confirmed only by a majority-or-quorum vote count.

use super::state::{
    FailoverState, MasterState, LOG_EVENT_BECAME_TERM_LEADER, LOG_EVENT_FAILOVER_STATE_CHANGED,
};
use super::GlobalMonitorState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;

/// Upper bound of the random delay before starting a fresh election, to
/// avoid split votes when several monitors observe obj-down together.
pub const MAX_DESYNC_MS: u64 = 1000;

/// The outcome of one election-status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStatus {
    /// This monitor won the term; the FSM advanced to slave selection.
    Won,
    /// No confirmed winner yet; the caller should keep waiting.
    Pending,
    /// The election took longer than the failover timeout; aborted.
    Aborted,
}

/// Records this monitor's own vote. The vote is granted only when the
/// requested epoch is newer than any epoch already voted in; otherwise the
/// prior vote is returned unchanged. The global epoch ratchets up to the
/// requested epoch so it never falls behind a peer.
pub fn vote_leader(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
    req_epoch: u64,
    candidate: &str,
) -> (u64, String) {
    global.ratchet_epoch(req_epoch);
    let mut m = master.lock();
    if !candidate.is_empty() && req_epoch > m.leader_epoch {
        m.leader_epoch = req_epoch;
        m.leader_id = candidate.to_string();
        debug!(
            master = %m.name,
            epoch = req_epoch,
            candidate,
            "granted leadership vote"
        );
    }
    (m.leader_epoch, m.leader_id.clone())
}

/// Tallies the votes reported by peers for the current epoch, casts this
/// monitor's own ballot (for the front-runner, or for itself when nobody has
/// voted yet), and returns the confirmed winner, if any, together with the
/// epoch the tally was made in.
///
/// A winner is confirmed only with `votes >= max(peers/2 + 1, quorum)`.
/// Equal-vote candidates resolve deterministically to the greatest run ID.
pub fn check_who_is_leader(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) -> (Option<String>, u64) {
    let current_epoch = global.current_epoch();
    let (mut votes, total_monitors, quorum, failover_epoch) = {
        let m = master.lock();
        let mut votes: HashMap<String, usize> = HashMap::new();
        for peer in m.sentinels.values() {
            let p = peer.lock();
            if !p.leader_id.is_empty() && p.leader_epoch == current_epoch {
                *votes.entry(p.leader_id.clone()).or_default() += 1;
            }
        }
        (
            votes,
            m.sentinels.len() + 1,
            m.config.quorum,
            m.failover_epoch,
        )
    };

    let front_runner = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(id, _)| id.clone());

    // Vote for the most-voted candidate, or for ourselves when the field is
    // still empty.
    let ballot = front_runner
        .clone()
        .unwrap_or_else(|| global.my_run_id.clone());
    let (voted_epoch, voted_by_me) = vote_leader(global, master, failover_epoch, &ballot);
    if !voted_by_me.is_empty() && voted_epoch == failover_epoch {
        *votes.entry(voted_by_me).or_default() += 1;
    }

    let (winner, max_votes) = match votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
    {
        Some((id, count)) => (Some(id.clone()), *count),
        None => (None, 0),
    };

    let majority = total_monitors / 2 + 1;
    if winner.is_some() && (max_votes < majority || max_votes < quorum) {
        return (None, current_epoch);
    }
    (winner, current_epoch)
}

/// One step of the wait-leader-election FSM state: advances to slave
/// selection when this monitor is the confirmed winner, waits a second when
/// undecided, and aborts once the failover timeout has elapsed.
pub async fn check_election_status(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) -> ElectionStatus {
    let (leader, epoch) = check_who_is_leader(global, master);
    let is_leader = leader.as_deref() == Some(global.my_run_id.as_str());

    if !is_leader {
        time::sleep(Duration::from_secs(1)).await;

        let (start, failover_timeout) = {
            let m = master.lock();
            (m.failover_start_time, m.config.failover_timeout)
        };
        let timed_out = start.map(|t| t.elapsed() > failover_timeout).unwrap_or(false);
        if timed_out {
            super::failover::abort_failover(master);
            return ElectionStatus::Aborted;
        }
        return ElectionStatus::Pending;
    }

    debug!(
        event = LOG_EVENT_BECAME_TERM_LEADER,
        run_id = %global.my_run_id,
        epoch,
    );

    {
        let mut m = master.lock();
        m.failover_state = FailoverState::SelectSlave;
        m.failover_state_change_time = Some(Instant::now());
    }
    debug!(
        event = LOG_EVENT_FAILOVER_STATE_CHANGED,
        new_state = %FailoverState::SelectSlave,
        epoch,
    );
    ElectionStatus::Won
}
