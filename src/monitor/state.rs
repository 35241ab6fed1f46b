// src/monitor/state.rs

//! Defines all data structures used to track the monitored masters, their
//! replicas, the peer monitors, and the failover process.

use crate::client::{NodeClient, PeerClient};
use crate::config::MasterConfig;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// Structured log event names for failover observability.
pub const LOG_EVENT_FAILOVER_STATE_CHANGED: &str = "failover_state_changed";
pub const LOG_EVENT_SELECTED_SLAVE: &str = "selected_slave";
pub const LOG_EVENT_SLAVE_PROMOTED: &str = "slave_promoted";
pub const LOG_EVENT_NEIGHBOR_VOTED_FOR: &str = "neighbor_voted_for";
pub const LOG_EVENT_BECAME_TERM_LEADER: &str = "became_term_leader";

/// The perceived status of a master. The ordering matters: "down at all"
/// checks are written as `status >= Sdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MasterStatus {
    /// The master is healthy and responding.
    Up,
    /// Subjective Down: this monitor believes the master is down.
    Sdown,
    /// Objective Down: a quorum of monitors agrees the master is down.
    Odown,
}

/// The stages of an automated failover, advanced only by the per-master
/// state loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    None,
    WaitLeaderElection,
    SelectSlave,
    PromoteSlave,
    ReconfigSlave,
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailoverState::None => "none",
            FailoverState::WaitLeaderElection => "wait_leader_election",
            FailoverState::SelectSlave => "select_slave",
            FailoverState::PromoteSlave => "promote_slave",
            FailoverState::ReconfigSlave => "reconfig_slave",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Progress of a replica's reconfiguration toward the new primary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReconfigFlags: u8 {
        /// SLAVEOF was issued to the replica.
        const SENT = 1 << 0;
        /// The replica reports the new primary but the link is not yet up.
        const INPROG = 1 << 1;
        /// The replica reports the new primary with an established link.
        const DONE = 1 << 2;
    }
}

/// Holds all dynamic state for a single monitored master. Protected by a
/// `parking_lot::Mutex`; guards are never held across a network call.
pub struct MasterState {
    pub config: MasterConfig,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// The run ID observed on the last INFO.
    pub run_id: String,
    /// The epoch of the cluster configuration this monitor publishes.
    /// Monotonically non-decreasing.
    pub config_epoch: u64,

    pub status: MasterStatus,
    pub last_successful_ping: Instant,
    pub down_since: Option<Instant>,

    pub failover_state: FailoverState,
    pub failover_epoch: u64,
    pub failover_start_time: Option<Instant>,
    pub failover_state_change_time: Option<Instant>,

    /// This monitor's own vote: at most one candidate per epoch.
    pub leader_epoch: u64,
    pub leader_id: String,

    pub promoted_slave: Option<Arc<Mutex<SlaveState>>>,
    /// Replicas keyed by address. Append-only during this record's lifetime;
    /// rebuilt wholesale at failover replacement.
    pub slaves: HashMap<String, Arc<Mutex<SlaveState>>>,
    /// Peer monitors keyed by run ID. Append-only during this record's
    /// lifetime.
    pub sentinels: HashMap<String, Arc<Mutex<PeerState>>>,

    pub client: Arc<dyn NodeClient>,

    pub is_killed: bool,
    /// Cancels the whole task tree of this record when it is replaced.
    pub kill_token: CancellationToken,

    pub subj_down_tx: mpsc::Sender<()>,
    /// Taken once by the state loop.
    pub subj_down_rx: Option<mpsc::Receiver<()>>,
}

impl MasterState {
    pub fn new(config: MasterConfig, host: String, port: u16, client: Arc<dyn NodeClient>) -> Self {
        let (subj_down_tx, subj_down_rx) = mpsc::channel(1);
        Self {
            name: config.name.clone(),
            config,
            host,
            port,
            run_id: String::new(),
            config_epoch: 0,
            status: MasterStatus::Up,
            last_successful_ping: Instant::now(),
            down_since: None,
            failover_state: FailoverState::None,
            failover_epoch: 0,
            failover_start_time: None,
            failover_state_change_time: None,
            leader_epoch: 0,
            leader_id: String::new(),
            promoted_slave: None,
            slaves: HashMap::new(),
            sentinels: HashMap::new(),
            client,
            is_killed: false,
            kill_token: CancellationToken::new(),
            subj_down_tx,
            subj_down_rx: Some(subj_down_rx),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Marks the record dead and cancels its task tree.
    pub fn kill(&mut self) {
        self.is_killed = true;
        self.kill_token.cancel();
    }
}

/// The dynamic state of a single replica of a monitored master.
pub struct SlaveState {
    pub host: String,
    pub port: u16,
    pub addr: String,
    pub run_id: String,

    pub master_host: String,
    pub master_port: u16,

    pub repl_offset: u64,
    pub priority: u32,

    pub last_successful_ping: Instant,
    pub down_since: Option<Instant>,

    pub reconfig_flags: ReconfigFlags,

    pub client: Arc<dyn NodeClient>,

    pub killed: bool,

    pub master_down_tx: mpsc::Sender<()>,
    /// Taken once by the slave routine.
    pub master_down_rx: Option<mpsc::Receiver<()>>,

    pub role_switch_tx: mpsc::Sender<()>,
    /// Taken by the failover FSM while waiting for the promotion, and put
    /// back when the wait ends.
    pub role_switch_rx: Option<mpsc::Receiver<()>>,
    /// Latch so the role-switch signal fires at most once.
    pub role_switch_sent: bool,
}

impl SlaveState {
    pub fn new(
        host: String,
        port: u16,
        master_host: String,
        master_port: u16,
        client: Arc<dyn NodeClient>,
    ) -> Self {
        let (master_down_tx, master_down_rx) = mpsc::channel(1);
        let (role_switch_tx, role_switch_rx) = mpsc::channel(1);
        let addr = format!("{host}:{port}");
        Self {
            host,
            port,
            addr,
            run_id: String::new(),
            master_host,
            master_port,
            repl_offset: 0,
            priority: 100,
            last_successful_ping: Instant::now(),
            down_since: None,
            reconfig_flags: ReconfigFlags::empty(),
            client,
            killed: false,
            master_down_tx,
            master_down_rx: Some(master_down_rx),
            role_switch_tx,
            role_switch_rx: Some(role_switch_rx),
            role_switch_sent: false,
        }
    }
}

/// What this monitor knows about a peer monitor watching the same master.
pub struct PeerState {
    pub run_id: String,
    pub client: Arc<dyn PeerClient>,

    /// The peer's most recent report of the master's subjective-down status.
    pub sdown: bool,

    /// The peer's most recent vote.
    pub leader_id: String,
    pub leader_epoch: u64,

    pub last_master_down_reply: Option<Instant>,
}

impl PeerState {
    pub fn new(run_id: String, client: Arc<dyn PeerClient>) -> Self {
        Self {
            run_id,
            client,
            sdown: false,
            leader_id: String::new(),
            leader_epoch: 0,
            last_master_down_reply: None,
        }
    }
}
