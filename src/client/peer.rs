// src/client/peer.rs

//! The TCP implementation of [`PeerClient`], speaking the monitor command API
//! served by `monitor::listener`.

use super::node::{reject_error, Connection};
use super::{IsMasterDownByAddrArgs, IsMasterDownByAddrReply, PeerClient};
use crate::protocol::RespFrame;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// A [`PeerClient`] that opens a short-lived TCP connection per call.
#[derive(Debug)]
pub struct TcpPeerClient {
    host: String,
    port: u16,
}

impl TcpPeerClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn is_master_down_by_addr(
        &self,
        args: IsMasterDownByAddrArgs,
    ) -> Result<IsMasterDownByAddrReply> {
        let mut conn = Connection::connect(&self.host, self.port).await?;
        let cmd = RespFrame::command([
            "SENTINEL".to_string(),
            "IS-MASTER-DOWN-BY-ADDR".to_string(),
            args.name,
            args.ip,
            args.port.to_string(),
            args.current_epoch.to_string(),
            args.self_id,
        ]);
        let reply = reject_error(conn.send_and_receive(cmd).await?)?;

        // The reply is [down_flag, voted_leader_id, leader_epoch].
        let RespFrame::Array(parts) = reply else {
            return Err(anyhow!("unexpected IS-MASTER-DOWN-BY-ADDR reply shape"));
        };
        if parts.len() != 3 {
            return Err(anyhow!(
                "IS-MASTER-DOWN-BY-ADDR reply has {} elements, expected 3",
                parts.len()
            ));
        }
        let RespFrame::Integer(down) = parts[0] else {
            return Err(anyhow!("missing down flag in IS-MASTER-DOWN-BY-ADDR reply"));
        };
        let voted_leader_id = parts[1].text().unwrap_or_default();
        let RespFrame::Integer(leader_epoch) = parts[2] else {
            return Err(anyhow!(
                "missing leader epoch in IS-MASTER-DOWN-BY-ADDR reply"
            ));
        };
        Ok(IsMasterDownByAddrReply {
            master_down: down != 0,
            voted_leader_id,
            leader_epoch: leader_epoch.max(0) as u64,
        })
    }
}
