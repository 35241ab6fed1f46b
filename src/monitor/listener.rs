// src/monitor/listener.rs

//! The TCP command listener: lets clients ask for the current master address
//! and lets peer monitors run the down-agreement and voting protocol against
//! this monitor.

use super::election;
use super::state::MasterStatus;
use super::GlobalMonitorState;
use crate::protocol::{RespFrame, RespFrameCodec};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// The main TCP accept loop for the monitor command API.
pub async fn run_listener(port: u16, global: Arc<GlobalMonitorState>) -> Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("listening for monitor commands on port {}", port);

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let global = global.clone();
                tokio::spawn(async move {
                    debug!("accepted monitor connection from {}", addr);
                    if let Err(e) = handle_connection(socket, global).await {
                        warn!("error handling monitor connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                warn!("failed to accept monitor connection: {}", e);
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, global: Arc<GlobalMonitorState>) -> Result<()> {
    let mut framed = Framed::new(socket, RespFrameCodec);

    while let Some(result) = framed.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("error decoding frame from monitor client: {}", e);
                break;
            }
        };

        let response = match frame {
            RespFrame::Array(args) => process_command(&args, &global),
            _ => RespFrame::Error(
                "ERR invalid command format. Commands must be RESP arrays.".to_string(),
            ),
        };
        if let Err(e) = framed.send(response).await {
            warn!("error sending response to monitor client: {}", e);
            break;
        }
    }
    Ok(())
}

fn process_command(args: &[RespFrame], global: &Arc<GlobalMonitorState>) -> RespFrame {
    let Some(cmd) = args.first().and_then(|f| f.text()) else {
        return RespFrame::Error("ERR invalid command format".to_string());
    };

    if cmd.eq_ignore_ascii_case("ping") {
        return RespFrame::SimpleString("PONG".to_string());
    }

    if cmd.eq_ignore_ascii_case("sentinel") {
        let Some(subcmd) = args.get(1).and_then(|f| f.text()) else {
            return RespFrame::Error("ERR unknown sentinel subcommand".to_string());
        };

        if subcmd.eq_ignore_ascii_case("get-master-addr-by-name") {
            let Some(name) = args.get(2).and_then(|f| f.text()) else {
                return RespFrame::Error(
                    "ERR wrong number of arguments for 'sentinel get-master-addr-by-name'"
                        .to_string(),
                );
            };
            return match global.find_master_by_name(&name) {
                Some(master) => {
                    let m = master.lock();
                    RespFrame::Array(vec![
                        RespFrame::bulk(m.host.clone()),
                        RespFrame::Integer(m.port as i64),
                    ])
                }
                None => RespFrame::Null,
            };
        }

        if subcmd.eq_ignore_ascii_case("is-master-down-by-addr") {
            return is_master_down_by_addr(args, global);
        }
    }

    RespFrame::Error(format!("ERR Unknown command '{cmd}'"))
}

/// `SENTINEL IS-MASTER-DOWN-BY-ADDR <name> <ip> <port> <epoch> <self-id>`.
///
/// Replies `[down, voted-leader-id, leader-epoch]`. A non-empty `self-id`
/// requests a vote for the given epoch; the reply carries the vote actually
/// recorded, which may be for another candidate when this monitor has voted
/// already.
fn is_master_down_by_addr(args: &[RespFrame], global: &Arc<GlobalMonitorState>) -> RespFrame {
    let fields: Vec<String> = args
        .iter()
        .skip(2)
        .filter_map(|f| f.text())
        .collect();
    if fields.len() != 5 {
        return RespFrame::Error(
            "ERR wrong number of arguments for 'sentinel is-master-down-by-addr'".to_string(),
        );
    }
    let name = &fields[0];
    let ip = &fields[1];
    let (Ok(port), Ok(epoch)) = (fields[2].parse::<u16>(), fields[3].parse::<u64>()) else {
        return RespFrame::Error("ERR invalid port or epoch".to_string());
    };
    let self_id = &fields[4];

    let addr = format!("{ip}:{port}");
    let master = global
        .masters
        .get(&addr)
        .map(|entry| entry.value().clone())
        .filter(|m| m.lock().name == *name);

    let Some(master) = master else {
        // Not a master we monitor: report it as not down, grant nothing.
        return RespFrame::Array(vec![
            RespFrame::Integer(0),
            RespFrame::bulk(""),
            RespFrame::Integer(0),
        ]);
    };

    let down = master.lock().status >= MasterStatus::Sdown;
    let (leader_epoch, voted_leader) = if self_id.is_empty() {
        (0, String::new())
    } else {
        election::vote_leader(global, &master, epoch, self_id)
    };

    RespFrame::Array(vec![
        RespFrame::Integer(down as i64),
        RespFrame::bulk(voted_leader),
        RespFrame::Integer(leader_epoch as i64),
    ])
}
