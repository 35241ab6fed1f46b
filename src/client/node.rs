// src/client/node.rs

//! The TCP implementation of [`NodeClient`], a small asynchronous client for
//! the monitored data-store instances.

use super::{HelloPublisher, HelloReceiver, NodeClient, HELLO_CHANNEL};
use crate::protocol::{RespFrame, RespFrameCodec};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A single connection to a node. Commands are request/reply; the hello
/// subscription keeps one open for pushed messages.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    codec: RespFrameCodec,
    read_buf: BytesMut,
}

impl Connection {
    pub(crate) async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream =
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await??;
        Ok(Self {
            stream,
            codec: RespFrameCodec,
            read_buf: BytesMut::with_capacity(4096),
        })
    }

    pub(crate) async fn send(&mut self, frame: RespFrame) -> Result<()> {
        let mut write_buf = BytesMut::new();
        self.codec.encode(frame, &mut write_buf)?;
        self.stream.write_all(&write_buf).await?;
        Ok(())
    }

    /// Reads the next complete frame, waiting as long as it takes. Used by
    /// the hello subscription, where silence is normal.
    pub(crate) async fn receive(&mut self) -> Result<RespFrame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(anyhow!("connection closed by peer"));
            }
        }
    }

    /// Sends a command frame and waits for a single reply frame, bounded by
    /// the read timeout.
    pub(crate) async fn send_and_receive(&mut self, frame: RespFrame) -> Result<RespFrame> {
        self.send(frame).await?;
        match tokio::time::timeout(READ_TIMEOUT, self.receive()).await {
            Ok(reply) => reply,
            Err(_) => Err(anyhow!("read timeout while waiting for reply")),
        }
    }
}

/// Checks a reply frame for a server-side error before interpreting it.
pub(crate) fn reject_error(reply: RespFrame) -> Result<RespFrame> {
    match reply {
        RespFrame::Error(msg) => Err(anyhow!("server error: {msg}")),
        other => Ok(other),
    }
}

/// A [`NodeClient`] that opens a short-lived TCP connection per command.
#[derive(Debug)]
pub struct TcpNodeClient {
    host: String,
    port: u16,
}

impl TcpNodeClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    async fn request(&self, frame: RespFrame) -> Result<RespFrame> {
        let mut conn = Connection::connect(&self.host, self.port).await?;
        let reply = conn.send_and_receive(frame).await?;
        reject_error(reply)
    }
}

#[async_trait]
impl NodeClient for TcpNodeClient {
    async fn ping(&self) -> Result<()> {
        let reply = self.request(RespFrame::command(["PING"])).await?;
        match reply {
            RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("pong") => Ok(()),
            other => Err(anyhow!("unexpected PING reply: {other:?}")),
        }
    }

    async fn info(&self) -> Result<String> {
        let reply = self
            .request(RespFrame::command(["INFO", "replication"]))
            .await?;
        match reply {
            RespFrame::BulkString(b) => Ok(String::from_utf8_lossy(&b).to_string()),
            other => Err(anyhow!("unexpected INFO reply: {other:?}")),
        }
    }

    async fn slave_of(&self, host: &str, port: u16) -> Result<()> {
        self.request(RespFrame::command(["SLAVEOF", host, &port.to_string()]))
            .await?;
        Ok(())
    }

    async fn slave_of_no_one(&self) -> Result<()> {
        self.request(RespFrame::command(["SLAVEOF", "NO", "ONE"]))
            .await?;
        Ok(())
    }

    async fn subscribe_hello(
        &self,
    ) -> Result<(Box<dyn HelloPublisher>, Box<dyn HelloReceiver>)> {
        let mut conn = Connection::connect(&self.host, self.port).await?;
        conn.send_and_receive(RespFrame::command(["SUBSCRIBE", HELLO_CHANNEL]))
            .await?;
        let publisher = TcpHelloPublisher {
            host: self.host.clone(),
            port: self.port,
        };
        let receiver = TcpHelloReceiver { conn };
        Ok((Box::new(publisher), Box::new(receiver)))
    }
}

/// Publishes hello messages through short-lived connections, leaving the
/// subscription connection free for pushed messages.
struct TcpHelloPublisher {
    host: String,
    port: u16,
}

#[async_trait]
impl HelloPublisher for TcpHelloPublisher {
    async fn publish(&self, message: &str) -> Result<()> {
        let mut conn = Connection::connect(&self.host, self.port).await?;
        let reply = conn
            .send_and_receive(RespFrame::command(["PUBLISH", HELLO_CHANNEL, message]))
            .await?;
        reject_error(reply)?;
        Ok(())
    }
}

struct TcpHelloReceiver {
    conn: Connection,
}

#[async_trait]
impl HelloReceiver for TcpHelloReceiver {
    async fn receive(&mut self) -> Result<String> {
        loop {
            let frame = self.conn.receive().await?;
            // Pushed messages arrive as ["message", channel, payload].
            if let RespFrame::Array(parts) = frame {
                if parts.len() == 3 {
                    let kind = parts[0].text().unwrap_or_default();
                    if kind.eq_ignore_ascii_case("message") {
                        if let Some(payload) = parts[2].text() {
                            return Ok(payload);
                        }
                    }
                }
            }
        }
    }
}
