// src/monitor/mod.rs

//! The monitor core: global state, the per-master supervision tree, and the
//! state loop driving failure detection, agreement, election, and failover.
//!
//! Each monitored master hosts a ping task, a hello publisher/subscriber, a
//! state loop, per-replica routines, and, while the master is down, a fan-out
//! of peer pollers. All of them coordinate through per-record mutexes and
//! capacity-1 signal channels; no lock is held across a network call.

pub mod agreement;
pub mod detector;
pub mod election;
pub mod failover;
pub mod hello;
pub mod info;
pub mod listener;
pub mod persistence;
pub mod reconfig;
pub mod slave;
pub mod state;
pub mod supervisor;

use crate::client::{ClientFactory, TcpClientFactory};
use crate::config::{MasterConfig, MonitorConfig};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::election::ElectionStatus;
use self::info::{parse_replication_info, InstanceRole};
use self::persistence::{EpochStore, FileEpochStore, NullEpochStore};
use self::slave::SlaveMonitor;
use self::state::{FailoverState, MasterState, MasterStatus, SlaveState};

const MASTER_INFO_PERIOD: Duration = Duration::from_secs(10);
const SDOWN_POLL_PERIOD: Duration = Duration::from_secs(1);

/// The top-level, globally shared state of the monitor process.
pub struct GlobalMonitorState {
    /// The stable identity of this monitor, advertised in hello messages and
    /// used as the ballot in elections.
    pub my_run_id: String,
    /// The address advertised to peers.
    pub announce_ip: String,
    pub port: u16,
    /// The current election term. Monotonically non-decreasing.
    current_epoch: AtomicU64,
    /// Monitored masters keyed by `host:port`. A completed failover removes
    /// the old address and inserts the promoted one.
    pub masters: DashMap<String, Arc<Mutex<MasterState>>>,
    pub factory: Arc<dyn ClientFactory>,
    pub epoch_store: Arc<dyn EpochStore>,
}

impl GlobalMonitorState {
    pub fn new(
        my_run_id: String,
        announce_ip: String,
        port: u16,
        factory: Arc<dyn ClientFactory>,
        epoch_store: Arc<dyn EpochStore>,
    ) -> Self {
        Self {
            my_run_id,
            announce_ip,
            port,
            current_epoch: AtomicU64::new(0),
            masters: DashMap::new(),
            factory,
            epoch_store,
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Starts a new term. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raises the epoch to at least `epoch`; never lowers it.
    pub fn ratchet_epoch(&self, epoch: u64) {
        self.current_epoch.fetch_max(epoch, Ordering::SeqCst);
    }

    pub fn find_master_by_name(&self, name: &str) -> Option<Arc<Mutex<MasterState>>> {
        self.masters
            .iter()
            .find(|entry| entry.value().lock().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Registers a master from its configuration and returns the record.
    pub fn add_master(&self, config: MasterConfig) -> Result<Arc<Mutex<MasterState>>> {
        let client = self.factory.node_client(&config.ip, config.port)?;
        let host = config.ip.clone();
        let port = config.port;
        let master = Arc::new(Mutex::new(MasterState::new(config, host, port, client)));
        let addr = master.lock().addr();
        self.masters.insert(addr, master.clone());
        Ok(master)
    }
}

/// The main entry point for running the monitor with production transports.
pub async fn run(config: MonitorConfig) -> Result<()> {
    let factory: Arc<dyn ClientFactory> = Arc::new(TcpClientFactory);
    let epoch_store: Arc<dyn EpochStore> = match &config.epoch_file {
        Some(path) => Arc::new(FileEpochStore::open(path.clone()).await?),
        None => Arc::new(NullEpochStore),
    };
    run_with(config, factory, epoch_store).await
}

/// Runs the monitor with injected transports; the seam the tests drive.
pub async fn run_with(
    config: MonitorConfig,
    factory: Arc<dyn ClientFactory>,
    epoch_store: Arc<dyn EpochStore>,
) -> Result<()> {
    let my_run_id = match &config.run_id {
        Some(id) => id.clone(),
        None => {
            let mut runid_bytes = [0u8; 20];
            getrandom::fill(&mut runid_bytes)
                .map_err(|e| anyhow!("failed to generate a run ID: {e}"))?;
            hex::encode(runid_bytes)
        }
    };
    info!("monitor run ID: {}", my_run_id);

    let announce_ip = config
        .announce_ip
        .clone()
        .unwrap_or_else(|| config.host.clone());
    let global = Arc::new(GlobalMonitorState::new(
        my_run_id,
        announce_ip,
        config.port,
        factory,
        epoch_store,
    ));

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for master_config in config.masters {
        info!(
            "initializing monitor for master '{}' at {}:{}",
            master_config.name, master_config.ip, master_config.port
        );
        let master = global.add_master(master_config)?;
        tasks.spawn(
            MasterMonitor {
                global: global.clone(),
                master,
            }
            .run(),
        );
    }

    tasks.spawn(listener::run_listener(config.port, global.clone()));

    // In normal operation none of these tasks returns. An error from any of
    // them (a fatal quorum misconfiguration, a dead listener socket) takes
    // the whole monitor down.
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {
                debug!("a monitor task completed");
            }
            Ok(Err(e)) => {
                error!("a monitor task failed: {e}");
                return Err(e);
            }
            Err(e) => {
                error!("a monitor task panicked: {e}");
                return Err(anyhow!("monitor task panicked: {e}"));
            }
        }
    }
    Err(anyhow!("all monitor tasks have terminated"))
}

/// Drives the monitoring of a single master record.
#[derive(Clone)]
pub struct MasterMonitor {
    pub global: Arc<GlobalMonitorState>,
    pub master: Arc<Mutex<MasterState>>,
}

impl MasterMonitor {
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    pub fn master_name(&self) -> String {
        self.master.lock().name.clone()
    }

    pub fn killed(&self) -> bool {
        self.master.lock().is_killed
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.master.lock().kill_token.clone()
    }

    fn status(&self) -> MasterStatus {
        self.master.lock().status
    }

    fn failover_state(&self) -> FailoverState {
        self.master.lock().failover_state
    }

    /// Spawns the subtree for this record and runs the state loop until the
    /// record dies or a fatal error surfaces.
    pub async fn run(self) -> Result<()> {
        let subj_down_rx = self
            .master
            .lock()
            .subj_down_rx
            .take()
            .ok_or_else(|| anyhow!("master state loop started twice"))?;

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(detector::run(self.clone()));
        tasks.spawn(hello::run(self.clone()));

        let result = self.state_loop(subj_down_rx).await;
        // Dropping the JoinSet aborts the detector and hello loops; they are
        // also gated on the kill token.
        drop(tasks);
        result
    }

    /// The per-master state loop: dispatches on the master status and, once
    /// objectively down, advances the failover FSM as its single advancer.
    async fn state_loop(&self, mut subj_down_rx: mpsc::Receiver<()>) -> Result<()> {
        let kill = self.kill_token();
        let mut info_timer = time::interval(MASTER_INFO_PERIOD);
        info_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        while !self.killed() {
            match self.status() {
                MasterStatus::Up => {
                    tokio::select! {
                        _ = kill.cancelled() => return Ok(()),
                        // The detector signalled subjective down; loop back
                        // and dispatch on the new status immediately.
                        _ = subj_down_rx.recv() => {}
                        _ = info_timer.tick() => self.poll_master_info().await,
                    }
                }
                MasterStatus::Sdown => loop {
                    if self.killed() {
                        return Ok(());
                    }
                    match self.status() {
                        MasterStatus::Sdown => {
                            agreement::ask_peers_if_master_down(&self.global, &self.master);
                            agreement::check_objectively_down(&self.master)?;
                            if self.status() == MasterStatus::Odown {
                                self.notify_master_down_to_slaves();
                                break;
                            }
                        }
                        _ => break,
                    }
                    tokio::select! {
                        _ = kill.cancelled() => return Ok(()),
                        _ = time::sleep(SDOWN_POLL_PERIOD) => {}
                    }
                },
                MasterStatus::Odown => {
                    if self.run_failover().await? {
                        // The record was replaced; this loop is done.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// One objectively-down episode: spawn the peer vote pollers, wait out
    /// the failover gate, then advance the FSM until the failover completes,
    /// aborts, or the master recovers. Returns `true` when the record was
    /// replaced by the supervisor.
    async fn run_failover(&self) -> Result<bool> {
        let cancel = CancellationToken::new();
        agreement::spawn_vote_pollers(
            self.global.clone(),
            self.master.clone(),
            cancel.clone(),
        );

        // Completing or aborting the FSM cancels the scope on every exit
        // path below, which unwinds the pollers at their next suspension.
        let mut entered = false;
        while self.status() == MasterStatus::Odown && !self.killed() {
            if failover::check_if_should_failover(&self.global, &self.master).await {
                entered = true;
                break;
            }
        }
        if !entered {
            cancel.cancel();
            return Ok(false);
        }

        loop {
            if self.killed() {
                cancel.cancel();
                return Ok(false);
            }
            match self.failover_state() {
                FailoverState::WaitLeaderElection => {
                    if election::check_election_status(&self.global, &self.master).await
                        == ElectionStatus::Aborted
                    {
                        cancel.cancel();
                        return Ok(false);
                    }
                }
                FailoverState::SelectSlave => match failover::select_slave(&self.master) {
                    Some(slave) => failover::promote_slave(&self.master, slave).await,
                    None => {
                        warn!(
                            master = %self.master_name(),
                            "no suitable replica to promote; aborting failover"
                        );
                        failover::abort_failover(&self.master);
                        cancel.cancel();
                        return Ok(false);
                    }
                },
                FailoverState::PromoteSlave => {
                    if !failover::wait_promotion(&self.global, &self.master).await {
                        warn!(
                            master = %self.master_name(),
                            "promoted replica did not switch roles in time; aborting failover"
                        );
                        failover::abort_failover(&self.master);
                        cancel.cancel();
                        return Ok(false);
                    }
                }
                FailoverState::ReconfigSlave => {
                    if let Err(e) =
                        reconfig::reconfig_remote_slaves(&self.master, cancel.clone()).await
                    {
                        warn!(
                            master = %self.master_name(),
                            error = %e,
                            "replica reconfiguration finished with errors"
                        );
                    }
                    supervisor::reset_master_state(&self.global, &self.master).await;
                    cancel.cancel();
                    return Ok(true);
                }
                FailoverState::None => {
                    cancel.cancel();
                    return Ok(false);
                }
            }
        }
    }

    fn notify_master_down_to_slaves(&self) {
        let m = self.master.lock();
        for slave in m.slaves.values() {
            let _ = slave.lock().master_down_tx.try_send(());
        }
    }

    /// Polls the master's replication INFO: refreshes its run ID, discovers
    /// replicas, and reacts to the master itself reporting a replica role.
    pub async fn poll_master_info(&self) {
        let client = { self.master.lock().client.clone() };
        let text = match client.info().await {
            Ok(text) => text,
            Err(e) => {
                debug!(master = %self.master_name(), error = %e, "INFO poll failed");
                return;
            }
        };
        self.apply_master_info(&text);
    }

    /// Applies a parsed INFO payload to the master record, spawning routines
    /// for newly discovered replicas.
    pub fn apply_master_info(&self, text: &str) {
        let parsed = parse_replication_info(text);

        if parsed.role == Some(InstanceRole::Slave) {
            // The monitored master now claims to be a replica: someone else
            // reconfigured the cluster under us. Treat it as subjectively
            // down so agreement and failover re-establish a primary.
            let mut m = self.master.lock();
            if m.status == MasterStatus::Up {
                warn!(
                    master = %m.name,
                    "monitored master reports a replica role; treating as subjectively down"
                );
                m.status = MasterStatus::Sdown;
                m.down_since = Some(Instant::now());
                let _ = m.subj_down_tx.try_send(());
            }
            return;
        }

        let mut new_monitors = Vec::new();
        {
            let mut m = self.master.lock();
            if let Some(run_id) = parsed.run_id {
                m.run_id = run_id;
            }
            let (master_host, master_port) = (m.host.clone(), m.port);
            for line in parsed.slaves {
                let addr = format!("{}:{}", line.ip, line.port);
                if let Some(existing) = m.slaves.get(&addr) {
                    existing.lock().repl_offset = line.offset;
                    continue;
                }
                match self.global.factory.node_client(&line.ip, line.port) {
                    Ok(client) => {
                        info!(master = %m.name, replica = %addr, "discovered new replica");
                        let mut slave = SlaveState::new(
                            line.ip.clone(),
                            line.port,
                            master_host.clone(),
                            master_port,
                            client,
                        );
                        slave.repl_offset = line.offset;
                        let slave = Arc::new(Mutex::new(slave));
                        m.slaves.insert(addr, slave.clone());
                        new_monitors.push(SlaveMonitor {
                            global: self.global.clone(),
                            master: self.master.clone(),
                            slave,
                        });
                    }
                    Err(e) => {
                        warn!(replica = %addr, error = %e, "cannot create client to new replica");
                    }
                }
            }
        }
        for monitor in new_monitors {
            monitor.spawn();
        }
    }
}
