// src/monitor/detector.rs

//! The per-master failure detector: a steady 1 s ping loop maintaining the
//! subjective-down state from local observation.

use super::state::MasterStatus;
use super::MasterMonitor;
use anyhow::Result;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

const PING_PERIOD: Duration = Duration::from_secs(1);

pub async fn run(mon: MasterMonitor) -> Result<()> {
    let kill = mon.kill_token();
    let mut ticker = time::interval(PING_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = kill.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if mon.killed() {
            return Ok(());
        }

        let (client, down_after, name) = {
            let m = mon.master.lock();
            (m.client.clone(), m.config.down_after, m.name.clone())
        };

        match client.ping().await {
            Ok(()) => {
                let mut m = mon.master.lock();
                let was = m.status;
                m.last_successful_ping = Instant::now();
                if was != MasterStatus::Up {
                    info!(master = %name, "master answered a ping; resetting to up");
                    m.status = MasterStatus::Up;
                    m.down_since = None;
                }
            }
            Err(e) => {
                let mut m = mon.master.lock();
                // Strictly greater than: a ping failing exactly at the
                // DownAfter boundary does not transition.
                if m.status == MasterStatus::Up
                    && m.last_successful_ping.elapsed() > down_after
                {
                    m.status = MasterStatus::Sdown;
                    m.down_since = Some(Instant::now());
                    warn!(master = %name, error = %e, "master is subjectively down");
                    let _ = m.subj_down_tx.try_send(());
                }
            }
        }
    }
}
