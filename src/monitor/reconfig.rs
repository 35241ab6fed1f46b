// src/monitor/reconfig.rs

//! Post-promotion replica reconfiguration: instructs every replica other than
//! the promoted one to follow the new primary, with bounded parallelism and
//! an overall deadline.

use super::state::{MasterState, ReconfigFlags, SlaveState};
use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const RETRY_DELAY: Duration = Duration::from_millis(100);
const DONE_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Fans SLAVEOF out to the non-promoted replicas, at most `parallel_syncs`
/// in flight at once, all bounded by the reconfiguration timeout. The first
/// error is reported, but every task runs to completion and every semaphore
/// slot is released.
pub async fn reconfig_remote_slaves(
    master: &Arc<Mutex<MasterState>>,
    cancel: CancellationToken,
) -> Result<()> {
    let (slaves, parallel_syncs, reconfig_timeout, new_host, new_port, promoted_addr) = {
        let m = master.lock();
        let promoted = m
            .promoted_slave
            .as_ref()
            .ok_or_else(|| anyhow!("reconfiguration requires a promoted slave"))?;
        let p = promoted.lock();
        (
            m.slaves.values().cloned().collect::<Vec<_>>(),
            m.config.parallel_syncs,
            m.config.reconfig_timeout,
            p.host.clone(),
            p.port,
            p.addr.clone(),
        )
    };

    let semaphore = Arc::new(Semaphore::new(parallel_syncs));
    let deadline = Instant::now() + reconfig_timeout;
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for slave in slaves {
        if slave.lock().addr == promoted_addr {
            continue;
        }
        tasks.spawn(reconfig_one_slave(
            slave,
            new_host.clone(),
            new_port,
            semaphore.clone(),
            deadline,
            cancel.clone(),
        ));
    }

    let mut first_error = None;
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!("reconfiguration task failed: {e}"));
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Reconfigures a single replica: acquire a slot, issue SLAVEOF with 100 ms
/// retries, then hold the slot until the INFO observer marks the replica
/// done, the deadline passes, or the scope is cancelled.
async fn reconfig_one_slave(
    slave: Arc<Mutex<SlaveState>>,
    new_host: String,
    new_port: u16,
    semaphore: Arc<Semaphore>,
    deadline: Instant,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = slave.lock().addr.clone();
    loop {
        let permit = match time::timeout_at(deadline, semaphore.clone().acquire_owned()).await {
            Err(_) => bail!("reconfiguration deadline reached for replica {addr}"),
            Ok(acquired) => acquired.map_err(|e| anyhow!("semaphore closed: {e}"))?,
        };
        if cancel.is_cancelled() {
            bail!("reconfiguration cancelled for replica {addr}");
        }

        let client = slave.lock().client.clone();
        if let Err(e) = client.slave_of(&new_host, new_port).await {
            debug!(replica = %addr, error = %e, "SLAVEOF failed; retrying");
            drop(permit);
            if Instant::now() + RETRY_DELAY >= deadline {
                bail!("reconfiguration deadline reached for replica {addr}");
            }
            time::sleep(RETRY_DELAY).await;
            continue;
        }

        slave.lock().reconfig_flags |= ReconfigFlags::SENT;
        info!(replica = %addr, "issued SLAVEOF toward the new primary");

        // Hold the slot until the replica is confirmed to follow the new
        // primary; the DONE bit is set by its INFO poller.
        loop {
            if slave.lock().reconfig_flags.contains(ReconfigFlags::DONE) {
                drop(permit);
                return Ok(());
            }
            if cancel.is_cancelled() {
                bail!("reconfiguration cancelled for replica {addr}");
            }
            if Instant::now() >= deadline {
                bail!("reconfiguration deadline reached for replica {addr}");
            }
            time::sleep(DONE_POLL_PERIOD).await;
        }
    }
}
