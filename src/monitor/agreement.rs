// src/monitor/agreement.rs

//! Objective-down agreement: polls peer monitors for their subjective view of
//! the master and counts agreement against the configured quorum. Also hosts
//! the per-peer vote pollers that run for the duration of a failover.

use super::state::{
    FailoverState, MasterState, MasterStatus, PeerState, LOG_EVENT_NEIGHBOR_VOTED_FOR,
};
use super::GlobalMonitorState;
use crate::client::IsMasterDownByAddrArgs;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PEER_POLL_PERIOD: Duration = Duration::from_secs(1);

fn snapshot_identity(master: &Arc<Mutex<MasterState>>) -> (String, String, u16) {
    let m = master.lock();
    (m.name.clone(), m.host.clone(), m.port)
}

fn snapshot_peers(master: &Arc<Mutex<MasterState>>) -> Vec<Arc<Mutex<PeerState>>> {
    master.lock().sentinels.values().cloned().collect()
}

/// While the master is subjectively down, asks every known peer for its
/// opinion, at most once per second per peer. Diagnostic only: `self_id` is
/// empty, so no vote is requested.
pub fn ask_peers_if_master_down(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) {
    let current_epoch = global.current_epoch();
    let (name, ip, port) = snapshot_identity(master);

    for peer in snapshot_peers(master) {
        let master = master.clone();
        let name = name.clone();
        let ip = ip.clone();
        tokio::spawn(async move {
            let (client, last_reply) = {
                let p = peer.lock();
                (p.client.clone(), p.last_master_down_reply)
            };
            if let Some(t) = last_reply {
                if t.elapsed() < PEER_POLL_PERIOD {
                    return;
                }
            }
            if master.lock().status != MasterStatus::Sdown {
                return;
            }
            let args = IsMasterDownByAddrArgs {
                name,
                ip,
                port,
                current_epoch,
                self_id: String::new(),
            };
            match client.is_master_down_by_addr(args).await {
                Ok(reply) => {
                    let mut p = peer.lock();
                    p.last_master_down_reply = Some(Instant::now());
                    p.sdown = reply.master_down;
                }
                Err(e) => {
                    debug!(error = %e, "is-master-down poll to peer failed");
                }
            }
        });
    }
}

/// Counts this monitor plus every peer reporting subjective-down against the
/// quorum, transitioning to objectively down when met. A quorum larger than
/// the number of reachable monitors is an unrecoverable configuration error.
pub fn check_objectively_down(master: &Arc<Mutex<MasterState>>) -> Result<()> {
    let mut m = master.lock();
    let quorum = m.config.quorum;
    let total = m.sentinels.len() + 1;
    if total < quorum {
        bail!(
            "quorum for master '{}' is {} but only {} monitor(s) are known",
            m.name,
            quorum,
            total
        );
    }

    let mut down = 1;
    for peer in m.sentinels.values() {
        if peer.lock().sdown {
            down += 1;
        }
    }
    if down >= quorum && m.status == MasterStatus::Sdown {
        warn!(
            master = %m.name,
            agreeing = down,
            quorum,
            "master is objectively down"
        );
        m.status = MasterStatus::Odown;
    }
    Ok(())
}

/// Spawns one polling task per known peer for the duration of a failover.
/// Each task calls the peer every second, asking for a vote once this monitor
/// has started its own failover, and records the peer's opinion and vote.
/// All tasks exit at their next suspension point once `cancel` fires or the
/// master is no longer down.
pub fn spawn_vote_pollers(
    global: Arc<GlobalMonitorState>,
    master: Arc<Mutex<MasterState>>,
    cancel: CancellationToken,
) {
    let (name, ip, port) = snapshot_identity(&master);

    for peer in snapshot_peers(&master) {
        let global = global.clone();
        let master = master.clone();
        let cancel = cancel.clone();
        let name = name.clone();
        let ip = ip.clone();
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                if master.lock().status < MasterStatus::Sdown {
                    return;
                }

                let current_epoch = global.current_epoch();
                // Do not ask for a vote before our own failover has started.
                let self_id = if master.lock().failover_state == FailoverState::None {
                    String::new()
                } else {
                    global.my_run_id.clone()
                };
                let client = peer.lock().client.clone();
                let args = IsMasterDownByAddrArgs {
                    name: name.clone(),
                    ip: ip.clone(),
                    port,
                    current_epoch,
                    self_id,
                };
                match client.is_master_down_by_addr(args).await {
                    Ok(reply) => {
                        let mut p = peer.lock();
                        p.last_master_down_reply = Some(Instant::now());
                        p.sdown = reply.master_down;
                        if !reply.voted_leader_id.is_empty() {
                            debug!(
                                event = LOG_EVENT_NEIGHBOR_VOTED_FOR,
                                neighbor_id = %p.run_id,
                                voted_for = %reply.voted_leader_id,
                                epoch = reply.leader_epoch,
                            );
                            p.leader_epoch = reply.leader_epoch;
                            p.leader_id = reply.voted_leader_id;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "is-master-down vote poll to peer failed");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = time::sleep(PEER_POLL_PERIOD) => {}
                }
            }
        });
    }
}
