// src/monitor/supervisor.rs

//! Post-failover record replacement: kills the old master record, builds a
//! fresh one around the promoted node, swaps the registry entry, and respawns
//! the monitoring subtree.

use super::slave::SlaveMonitor;
use super::state::{MasterState, SlaveState};
use super::{GlobalMonitorState, MasterMonitor};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Replaces a master record after a completed failover. The old record is
/// killed (its whole task tree unwinds), the new record takes the promoted
/// node's address and the published config epoch, and the slave map is
/// rebuilt: every previous replica except the promoted one, plus the deposed
/// primary entered as a replica at offset zero. The registry swap is atomic
/// from the point of view of address lookups: old address removed, new
/// address inserted.
pub async fn reset_master_state(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) {
    let (old_addr, old_host, old_port, name, config, config_epoch, promoted) = {
        let mut m = master.lock();
        m.kill();
        (
            m.addr(),
            m.host.clone(),
            m.port,
            m.name.clone(),
            m.config.clone(),
            m.config_epoch,
            m.promoted_slave.clone(),
        )
    };
    let Some(promoted) = promoted else {
        warn!(master = %name, "replacement requested without a promoted slave");
        return;
    };
    let (new_host, new_port, new_run_id, promoted_addr) = {
        let p = promoted.lock();
        (p.host.clone(), p.port, p.run_id.clone(), p.addr.clone())
    };

    let client = match global.factory.node_client(&new_host, new_port) {
        Ok(client) => client,
        Err(e) => {
            error!(
                master = %name,
                addr = %format!("{new_host}:{new_port}"),
                error = %e,
                "cannot create client to promoted primary; master record lost"
            );
            return;
        }
    };

    let mut fresh = MasterState::new(config, new_host.clone(), new_port, client);
    fresh.run_id = new_run_id;
    fresh.config_epoch = config_epoch;
    let new_master = Arc::new(Mutex::new(fresh));

    {
        let old = master.lock();
        let mut fresh = new_master.lock();
        for (addr, slave) in &old.slaves {
            let mut s = slave.lock();
            // The old routines die with the old record.
            s.killed = true;
            if *addr == promoted_addr {
                continue;
            }
            match global.factory.node_client(&s.host, s.port) {
                Ok(client) => {
                    let mut ns = SlaveState::new(
                        s.host.clone(),
                        s.port,
                        new_host.clone(),
                        new_port,
                        client,
                    );
                    ns.run_id = s.run_id.clone();
                    ns.priority = s.priority;
                    ns.repl_offset = s.repl_offset;
                    fresh.slaves.insert(addr.clone(), Arc::new(Mutex::new(ns)));
                }
                Err(e) => {
                    warn!(replica = %addr, error = %e, "cannot carry replica over to new master record");
                }
            }
        }
        // The deposed primary joins as a replica; its offset is unknown
        // until it reports in.
        match global.factory.node_client(&old_host, old_port) {
            Ok(client) => {
                fresh.slaves.insert(
                    old_addr.clone(),
                    Arc::new(Mutex::new(SlaveState::new(
                        old_host,
                        old_port,
                        new_host.clone(),
                        new_port,
                        client,
                    ))),
                );
            }
            Err(e) => {
                warn!(replica = %old_addr, error = %e, "cannot enter old primary as a replica");
            }
        }
    }

    let new_addr = new_master.lock().addr();
    global.masters.remove(&old_addr);
    global.masters.insert(new_addr.clone(), new_master.clone());
    info!(
        master = %name,
        old_addr = %old_addr,
        new_addr = %new_addr,
        "failover complete; monitoring the promoted primary"
    );

    let slaves: Vec<_> = new_master.lock().slaves.values().cloned().collect();
    for slave in slaves {
        SlaveMonitor {
            global: global.clone(),
            master: new_master.clone(),
            slave,
        }
        .spawn();
    }
    MasterMonitor {
        global: global.clone(),
        master: new_master,
    }
    .spawn();
}
