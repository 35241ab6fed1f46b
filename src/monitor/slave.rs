// src/monitor/slave.rs

//! The per-replica routine: a 1 s ping loop feeding the selection filter,
//! and an INFO poller that observes role flips and reconfiguration progress.
//! INFO polling accelerates to once per second while the master is down.

use super::info::{parse_replication_info, InstanceRole};
use super::state::{MasterState, ReconfigFlags, SlaveState};
use super::GlobalMonitorState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const PING_PERIOD: Duration = Duration::from_secs(1);
const INFO_PERIOD: Duration = Duration::from_secs(10);
const INFO_PERIOD_MASTER_DOWN: Duration = Duration::from_secs(1);

/// Drives one replica of one master.
#[derive(Clone)]
pub struct SlaveMonitor {
    pub global: Arc<GlobalMonitorState>,
    pub master: Arc<Mutex<MasterState>>,
    pub slave: Arc<Mutex<SlaveState>>,
}

impl SlaveMonitor {
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    fn killed(&self) -> bool {
        if self.master.lock().is_killed {
            return true;
        }
        self.slave.lock().killed
    }

    pub async fn run(self) {
        let kill = { self.master.lock().kill_token.clone() };
        let Some(mut master_down_rx) = self.slave.lock().master_down_rx.take() else {
            warn!("slave routine started twice; exiting");
            return;
        };

        let mut ping_timer = time::interval(PING_PERIOD);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut info_timer = time::interval(INFO_PERIOD);
        info_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.killed() {
                return;
            }
            tokio::select! {
                _ = kill.cancelled() => return,
                _ = ping_timer.tick() => self.ping_slave().await,
                _ = info_timer.tick() => self.poll_info().await,
                Some(_) = master_down_rx.recv() => {
                    // The master is objectively down: watch this replica
                    // closely so a role flip or reconfiguration is seen fast.
                    info_timer = time::interval(INFO_PERIOD_MASTER_DOWN);
                    info_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
        }
    }

    async fn ping_slave(&self) {
        let (client, down_after, addr) = {
            let m = self.master.lock();
            let s = self.slave.lock();
            (s.client.clone(), m.config.down_after, s.addr.clone())
        };
        match client.ping().await {
            Ok(()) => {
                let mut s = self.slave.lock();
                s.last_successful_ping = Instant::now();
                if s.down_since.is_some() {
                    info!(replica = %addr, "replica is back online");
                    s.down_since = None;
                }
            }
            Err(e) => {
                let mut s = self.slave.lock();
                if s.down_since.is_none() && s.last_successful_ping.elapsed() > down_after {
                    warn!(replica = %addr, error = %e, "replica is down");
                    s.down_since = Some(Instant::now());
                }
            }
        }
    }

    async fn poll_info(&self) {
        let client = { self.slave.lock().client.clone() };
        let text = match client.info().await {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "INFO poll to replica failed");
                return;
            }
        };
        let parsed = parse_replication_info(&text);

        // Snapshot the promotion target first; the lock order is always
        // master before slave.
        let promoted = {
            let m = self.master.lock();
            m.promoted_slave.as_ref().map(|p| {
                let p = p.lock();
                (p.addr.clone(), p.host.clone(), p.port)
            })
        };

        let mut s = self.slave.lock();
        if let Some(run_id) = parsed.run_id {
            s.run_id = run_id;
        }
        if let Some(priority) = parsed.slave_priority {
            s.priority = priority;
        }
        if let Some(offset) = parsed.slave_repl_offset {
            s.repl_offset = offset;
        }

        match parsed.role {
            Some(InstanceRole::Master) => {
                // The promotion candidate has switched roles; deliver the
                // signal the failover FSM is waiting on, exactly once.
                let is_promoted = promoted
                    .as_ref()
                    .map(|(addr, _, _)| *addr == s.addr)
                    .unwrap_or(false);
                if is_promoted && !s.role_switch_sent {
                    s.role_switch_sent = true;
                    info!(replica = %s.addr, "observed promotion to master role");
                    let _ = s.role_switch_tx.try_send(());
                }
            }
            Some(InstanceRole::Slave) => {
                if let Some(host) = parsed.master_host {
                    s.master_host = host;
                }
                if let Some(port) = parsed.master_port {
                    s.master_port = port;
                }
                // Reconfiguration observer: once SLAVEOF was sent, watch the
                // replica adopt the new primary.
                if s.reconfig_flags.contains(ReconfigFlags::SENT) {
                    if let Some((_, new_host, new_port)) = promoted {
                        if s.master_host == new_host && s.master_port == new_port {
                            let link_up = parsed
                                .master_link_status
                                .map(|l| l == "up")
                                .unwrap_or(false);
                            if link_up {
                                s.reconfig_flags |= ReconfigFlags::DONE;
                            } else {
                                s.reconfig_flags |= ReconfigFlags::INPROG;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
