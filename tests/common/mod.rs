// tests/common/mod.rs

//! Shared test fixtures: in-memory mock clients driving the monitor core
//! without any real sockets.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use vigil::client::{
    ClientFactory, HelloPublisher, HelloReceiver, IsMasterDownByAddrArgs,
    IsMasterDownByAddrReply, NodeClient, PeerClient,
};
use vigil::config::MasterConfig;
use vigil::monitor::persistence::NullEpochStore;
use vigil::monitor::state::{MasterState, PeerState, SlaveState};
use vigil::monitor::{GlobalMonitorState, MasterMonitor};

/// A scriptable in-memory node. Hello messages published to it loop back to
/// every subscriber, like a real pub/sub channel on the node.
pub struct MockNodeClient {
    pub ping_ok: AtomicBool,
    pub info_text: Mutex<String>,
    pub slave_of_calls: Mutex<Vec<(String, u16)>>,
    pub slave_of_no_one_calls: AtomicUsize,
    pub slave_of_fails: AtomicBool,
    pub slave_of_delay: Mutex<Duration>,
    pub on_slave_of: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    hello_tx: broadcast::Sender<String>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockNodeClient {
    fn new(in_flight: Arc<AtomicUsize>, max_in_flight: Arc<AtomicUsize>) -> Self {
        let (hello_tx, _) = broadcast::channel(64);
        Self {
            ping_ok: AtomicBool::new(true),
            info_text: Mutex::new(String::new()),
            slave_of_calls: Mutex::new(Vec::new()),
            slave_of_no_one_calls: AtomicUsize::new(0),
            slave_of_fails: AtomicBool::new(false),
            slave_of_delay: Mutex::new(Duration::ZERO),
            on_slave_of: Mutex::new(None),
            hello_tx,
            in_flight,
            max_in_flight,
        }
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_info(&self, text: &str) {
        *self.info_text.lock() = text.to_string();
    }

    pub fn set_on_slave_of(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_slave_of.lock() = Some(Box::new(hook));
    }

    /// Injects a raw hello message as if a peer had published it.
    pub fn inject_hello(&self, raw: &str) {
        let _ = self.hello_tx.send(raw.to_string());
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn ping(&self) -> Result<()> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }

    async fn info(&self) -> Result<String> {
        let text = self.info_text.lock().clone();
        if text.is_empty() {
            Err(anyhow!("no reply"))
        } else {
            Ok(text)
        }
    }

    async fn slave_of(&self, host: &str, port: u16) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.slave_of_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.slave_of_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        self.slave_of_calls.lock().push((host.to_string(), port));
        if let Some(hook) = self.on_slave_of.lock().as_ref() {
            hook();
        }
        Ok(())
    }

    async fn slave_of_no_one(&self) -> Result<()> {
        self.slave_of_no_one_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_hello(
        &self,
    ) -> Result<(Box<dyn HelloPublisher>, Box<dyn HelloReceiver>)> {
        let publisher = MockHelloPublisher {
            tx: self.hello_tx.clone(),
        };
        let receiver = MockHelloReceiver {
            rx: self.hello_tx.subscribe(),
        };
        Ok((Box::new(publisher), Box::new(receiver)))
    }
}

pub struct MockHelloPublisher {
    tx: broadcast::Sender<String>,
}

#[async_trait]
impl HelloPublisher for MockHelloPublisher {
    async fn publish(&self, message: &str) -> Result<()> {
        let _ = self.tx.send(message.to_string());
        Ok(())
    }
}

pub struct MockHelloReceiver {
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl HelloReceiver for MockHelloReceiver {
    async fn receive(&mut self) -> Result<String> {
        self.rx.recv().await.map_err(|e| anyhow!("hello channel closed: {e}"))
    }
}

/// A peer monitor answering with a fixed, test-controlled reply.
pub struct MockPeerClient {
    pub reply: Mutex<IsMasterDownByAddrReply>,
    pub calls: Mutex<Vec<IsMasterDownByAddrArgs>>,
    pub fail: AtomicBool,
}

impl MockPeerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(IsMasterDownByAddrReply::default()),
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_reply(&self, master_down: bool, voted_leader_id: &str, leader_epoch: u64) {
        *self.reply.lock() = IsMasterDownByAddrReply {
            master_down,
            voted_leader_id: voted_leader_id.to_string(),
            leader_epoch,
        };
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn is_master_down_by_addr(
        &self,
        args: IsMasterDownByAddrArgs,
    ) -> Result<IsMasterDownByAddrReply> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        self.calls.lock().push(args);
        Ok(self.reply.lock().clone())
    }
}

/// Hands out one mock client per address, shared between the monitor and the
/// test body. SLAVEOF in-flight gauges are shared across all node clients so
/// parallelism bounds can be asserted globally.
pub struct MockFactory {
    nodes: Mutex<HashMap<String, Arc<MockNodeClient>>>,
    peers: Mutex<HashMap<String, Arc<MockPeerClient>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn node(&self, host: &str, port: u16) -> Arc<MockNodeClient> {
        self.nodes
            .lock()
            .entry(format!("{host}:{port}"))
            .or_insert_with(|| {
                Arc::new(MockNodeClient::new(
                    self.in_flight.clone(),
                    self.max_in_flight.clone(),
                ))
            })
            .clone()
    }

    pub fn peer(&self, host: &str, port: u16) -> Arc<MockPeerClient> {
        self.peers
            .lock()
            .entry(format!("{host}:{port}"))
            .or_insert_with(MockPeerClient::new)
            .clone()
    }
}

impl ClientFactory for MockFactory {
    fn node_client(&self, host: &str, port: u16) -> Result<Arc<dyn NodeClient>> {
        Ok(self.node(host, port))
    }

    fn peer_client(&self, host: &str, port: u16) -> Result<Arc<dyn PeerClient>> {
        Ok(self.peer(host, port))
    }
}

/// A master configuration with short, test-friendly timers.
pub fn master_config(name: &str, ip: &str, port: u16, quorum: usize) -> MasterConfig {
    MasterConfig {
        name: name.to_string(),
        ip: ip.to_string(),
        port,
        quorum,
        down_after: Duration::from_secs(3),
        failover_timeout: Duration::from_secs(30),
        reconfig_timeout: Duration::from_secs(60),
        parallel_syncs: 1,
    }
}

pub fn test_global(run_id: &str, factory: Arc<MockFactory>) -> Arc<GlobalMonitorState> {
    Arc::new(GlobalMonitorState::new(
        run_id.to_string(),
        "127.0.0.1".to_string(),
        26379,
        factory,
        Arc::new(NullEpochStore),
    ))
}

pub fn master_monitor(
    global: &Arc<GlobalMonitorState>,
    master: &Arc<Mutex<MasterState>>,
) -> MasterMonitor {
    MasterMonitor {
        global: global.clone(),
        master: master.clone(),
    }
}

/// Registers a peer monitor on a master record, bypassing hello discovery.
pub fn add_peer(
    master: &Arc<Mutex<MasterState>>,
    run_id: &str,
    client: Arc<MockPeerClient>,
) -> Arc<Mutex<PeerState>> {
    let peer = Arc::new(Mutex::new(PeerState::new(run_id.to_string(), client)));
    master
        .lock()
        .sentinels
        .insert(run_id.to_string(), peer.clone());
    peer
}

/// Registers a replica on a master record, bypassing INFO discovery.
pub fn add_slave(
    factory: &Arc<MockFactory>,
    master: &Arc<Mutex<MasterState>>,
    ip: &str,
    port: u16,
) -> (Arc<Mutex<SlaveState>>, Arc<MockNodeClient>) {
    let client = factory.node(ip, port);
    let (master_host, master_port) = {
        let m = master.lock();
        (m.host.clone(), m.port)
    };
    let slave = Arc::new(Mutex::new(SlaveState::new(
        ip.to_string(),
        port,
        master_host,
        master_port,
        client.clone(),
    )));
    let addr = format!("{ip}:{port}");
    master.lock().slaves.insert(addr, slave.clone());
    (slave, client)
}

/// Yields a few times so freshly spawned tasks get to run under paused time.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
