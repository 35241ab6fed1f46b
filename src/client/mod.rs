// src/client/mod.rs

//! The client-side interfaces the monitor core consumes.
//!
//! The core never talks to a socket directly: it drives a monitored node
//! through [`NodeClient`] and a peer monitor through [`PeerClient`]. The TCP
//! implementations live in the `node` and `peer` submodules; tests substitute
//! in-memory mocks through the same traits.

pub mod node;
pub mod peer;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use node::TcpNodeClient;
pub use peer::TcpPeerClient;

/// The Pub/Sub channel on the monitored node used for peer monitor discovery.
pub const HELLO_CHANNEL: &str = "__vigil__:hello";

/// Arguments of the `IS-MASTER-DOWN-BY-ADDR` call to a peer monitor.
///
/// An empty `self_id` makes the call diagnostic: the callee reports its
/// subjective view of the master but is not asked to grant a vote.
#[derive(Debug, Clone)]
pub struct IsMasterDownByAddrArgs {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub current_epoch: u64,
    pub self_id: String,
}

/// The peer's answer: its subjective-down opinion and the vote it has
/// recorded for the current epoch (which may be for another candidate if it
/// already voted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsMasterDownByAddrReply {
    pub master_down: bool,
    pub voted_leader_id: String,
    pub leader_epoch: u64,
}

/// The publishing half of a hello channel subscription.
#[async_trait]
pub trait HelloPublisher: Send + Sync {
    async fn publish(&self, message: &str) -> Result<()>;
}

/// The receiving half of a hello channel subscription.
#[async_trait]
pub trait HelloReceiver: Send {
    async fn receive(&mut self) -> Result<String>;
}

/// Operations against a monitored data-store node (the primary or a replica).
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Returns the textual replication section used to detect role flips and
    /// replica offsets.
    async fn info(&self) -> Result<String>;

    async fn slave_of(&self, host: &str, port: u16) -> Result<()>;

    async fn slave_of_no_one(&self) -> Result<()>;

    /// Subscribes to the hello broadcast channel on this node, returning the
    /// publish/receive pair.
    async fn subscribe_hello(&self)
        -> Result<(Box<dyn HelloPublisher>, Box<dyn HelloReceiver>)>;
}

/// Operations against a peer monitor.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn is_master_down_by_addr(
        &self,
        args: IsMasterDownByAddrArgs,
    ) -> Result<IsMasterDownByAddrReply>;
}

/// Constructs clients for newly discovered instances: replicas reported by
/// INFO, the promoted primary after a failover, and peer monitors announced
/// on the hello channel.
pub trait ClientFactory: Send + Sync {
    fn node_client(&self, host: &str, port: u16) -> Result<Arc<dyn NodeClient>>;
    fn peer_client(&self, host: &str, port: u16) -> Result<Arc<dyn PeerClient>>;
}

/// The production factory producing TCP clients.
#[derive(Debug, Default)]
pub struct TcpClientFactory;

impl ClientFactory for TcpClientFactory {
    fn node_client(&self, host: &str, port: u16) -> Result<Arc<dyn NodeClient>> {
        Ok(Arc::new(TcpNodeClient::new(host, port)))
    }

    fn peer_client(&self, host: &str, port: u16) -> Result<Arc<dyn PeerClient>> {
        Ok(Arc::new(TcpPeerClient::new(host, port)))
    }
}
