// src/monitor/hello.rs

//! Hello gossip: publishes this monitor's identity and its current view of
//! the master on the node's broadcast channel, and consumes peers'
//! announcements to discover new peer monitors.

use super::state::PeerState;
use super::MasterMonitor;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

const HELLO_PERIOD: Duration = Duration::from_secs(1);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// The number of comma-separated fields in a hello record.
pub const HELLO_FIELDS: usize = 8;

/// One announcement on the hello channel:
/// `bindAddr,port,selfID,currentEpoch,masterName,masterIP,masterPort,configEpoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub ip: String,
    pub port: u16,
    pub run_id: String,
    pub current_epoch: u64,
    pub master_name: String,
    pub master_ip: String,
    pub master_port: u16,
    pub master_config_epoch: u64,
}

impl HelloMessage {
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.ip,
            self.port,
            self.run_id,
            self.current_epoch,
            self.master_name,
            self.master_ip,
            self.master_port,
            self.master_config_epoch
        )
    }

    /// Parses a raw hello record. Returns `None` for anything that does not
    /// carry exactly eight well-formed fields.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != HELLO_FIELDS {
            return None;
        }
        Some(Self {
            ip: parts[0].to_string(),
            port: parts[1].parse().ok()?,
            run_id: parts[2].to_string(),
            current_epoch: parts[3].parse().ok()?,
            master_name: parts[4].to_string(),
            master_ip: parts[5].to_string(),
            master_port: parts[6].parse().ok()?,
            master_config_epoch: parts[7].parse().ok()?,
        })
    }
}

/// The hello loop for one master: subscribes on its node, publishes every
/// second, and reconnects with exponential backoff when the channel drops.
pub async fn run(mon: MasterMonitor) -> Result<()> {
    let kill = mon.kill_token();
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

    while !mon.killed() {
        let client = { mon.master.lock().client.clone() };
        match client.subscribe_hello().await {
            Ok((publisher, receiver)) => {
                reconnect_delay = INITIAL_RECONNECT_DELAY;
                if let Err(e) = exchange(&mon, publisher, receiver).await {
                    warn!(
                        master = %mon.master_name(),
                        error = %e,
                        "hello channel lost; reconnecting"
                    );
                } else {
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(
                    master = %mon.master_name(),
                    error = %e,
                    "failed to subscribe to hello channel; retrying in {:?}",
                    reconnect_delay
                );
            }
        }

        tokio::select! {
            _ = kill.cancelled() => return Ok(()),
            _ = time::sleep(reconnect_delay) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
    }
    Ok(())
}

/// Publishes and consumes hello records on an established subscription until
/// the connection fails or the record is killed.
async fn exchange(
    mon: &MasterMonitor,
    publisher: Box<dyn crate::client::HelloPublisher>,
    mut receiver: Box<dyn crate::client::HelloReceiver>,
) -> Result<()> {
    let kill = mon.kill_token();
    let mut hello_timer = time::interval(HELLO_PERIOD);

    loop {
        tokio::select! {
            _ = kill.cancelled() => return Ok(()),
            _ = hello_timer.tick() => {
                let message = compose_hello(mon).encode();
                publisher.publish(&message).await?;
            }
            raw = receiver.receive() => {
                process_hello(mon, &raw?);
            }
        }
    }
}

fn compose_hello(mon: &MasterMonitor) -> HelloMessage {
    let (master_name, master_ip, master_port, master_config_epoch) = {
        let m = mon.master.lock();
        (m.name.clone(), m.host.clone(), m.port, m.config_epoch)
    };
    HelloMessage {
        ip: mon.global.announce_ip.clone(),
        port: mon.global.port,
        run_id: mon.global.my_run_id.clone(),
        current_epoch: mon.global.current_epoch(),
        master_name,
        master_ip,
        master_port,
        master_config_epoch,
    }
}

/// Handles one received hello record: drops malformed input, ignores our own
/// announcements and duplicates, and registers newly discovered peers.
pub fn process_hello(mon: &MasterMonitor, raw: &str) {
    let Some(hello) = HelloMessage::parse(raw) else {
        warn!(message = raw, "dropping malformed hello message");
        return;
    };
    if hello.run_id == mon.global.my_run_id {
        return;
    }
    if hello.master_name != mon.master_name() {
        return;
    }

    let mut m = mon.master.lock();
    if m.sentinels.contains_key(&hello.run_id) {
        debug!(peer = %hello.run_id, "hello from already-known peer");
        return;
    }
    match mon.global.factory.peer_client(&hello.ip, hello.port) {
        Ok(client) => {
            info!(
                master = %m.name,
                peer = %hello.run_id,
                addr = %format!("{}:{}", hello.ip, hello.port),
                "discovered new peer monitor"
            );
            m.sentinels.insert(
                hello.run_id.clone(),
                Arc::new(Mutex::new(PeerState::new(hello.run_id, client))),
            );
        }
        Err(e) => {
            warn!(
                peer = %hello.run_id,
                error = %e,
                "cannot create client to newly announced peer monitor"
            );
        }
    }
}
