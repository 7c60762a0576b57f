//! Channel, name-registry and connection primitives.
//!
//! The [`Transport`] trait is the narrow interface the connector and the
//! dispatcher are written against. Two substrates implement it:
//!
//! - [`UnixTransport`]: one Unix stream socket per channel plus a
//!   file-backed [`NameRegistry`], for separate processes on one host.
//! - [`MemoryTransport`]: an in-process table of channels and names.
//!
//! ```text
//!  Connector                 Transport                 Dispatcher
//!  ─────────                 ─────────                 ──────────
//!  connect_by_* ───────────▶ session ◀─── accept ───── create_channel
//!  send(msg) ──────────────▶ inbox ──────────────────▶ receive()
//!      (suspended)                                      ...
//!  ◀─────────────────────── SenderToken ◀───────────── reply(token, msg)
//! ```

pub mod codec;
pub mod memory;
pub mod registry;
pub mod unix;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::BoxFuture;
use crate::message::Message;

pub use memory::MemoryTransport;
pub use registry::{NameRegistry, Registration};
pub use unix::UnixTransport;

/// Errors raised by transport primitives.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("failed to create channel at {path}: {source}")]
    CreateChannel {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid service name {0:?}")]
    InvalidName(String),

    #[error("service name {name:?} is already registered to live channel {address}")]
    NameTaken { name: String, address: Address },

    #[error("service name {0:?} is not registered")]
    NameNotRegistered(String),

    #[error("registry entry for {name:?} is unreadable: {reason}")]
    CorruptEntry { name: String, reason: String },

    #[error("no channel reachable at {address}: {source}")]
    Unreachable {
        address: Address,
        source: std::io::Error,
    },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("connection already released")]
    Disconnected,

    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of a channel: owning process id plus channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub pid: u32,
    pub chid: u32,
}

impl Address {
    pub fn new(pid: u32, chid: u32) -> Self {
        Self { pid, chid }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} chid {}", self.pid, self.chid)
    }
}

/// A received request whose sender is suspended until [`SenderToken::reply`]
/// completes. Dropping the token without replying releases the sender with a
/// transport failure.
#[derive(Debug)]
pub struct SenderToken {
    rcvid: u64,
    reply_tx: oneshot::Sender<Delivery>,
}

impl SenderToken {
    pub(crate) fn new(rcvid: u64, reply_tx: oneshot::Sender<Delivery>) -> Self {
        Self { rcvid, reply_tx }
    }

    /// Receive id, unique per channel. Only meaningful in logs.
    pub fn rcvid(&self) -> u64 {
        self.rcvid
    }

    /// Complete the pending receive.
    ///
    /// Resolves once the reply has been handed to the sender, so the channel
    /// may be destroyed as soon as this returns.
    pub async fn reply(self, msg: Message) -> Result<(), IpcError> {
        let (written, confirmed) = oneshot::channel();
        self.reply_tx
            .send(Delivery { msg, written })
            .map_err(|_| IpcError::PeerClosed)?;
        confirmed.await.map_err(|_| IpcError::PeerClosed)
    }
}

/// A reply on its way back to the sender. `written` is signalled once the
/// record has left the channel.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub msg: Message,
    pub written: oneshot::Sender<()>,
}

/// A request travelling from a session to the channel inbox.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub token: SenderToken,
    pub msg: Message,
}

/// Await the reply slot of a request that has been handed to a channel.
pub(crate) async fn await_reply(
    reply_rx: oneshot::Receiver<Delivery>,
) -> Result<Delivery, IpcError> {
    reply_rx.await.map_err(|_| IpcError::PeerClosed)
}

/// Connection-oriented, address-based request/reply primitives.
///
/// `receive` and `send` suspend without a timeout. Teardown operations
/// consume their handle so each can run at most once per handle.
pub trait Transport: Send + Sync + 'static {
    /// Server-side receiving endpoint.
    type Channel: Send + Sync;
    /// Binding of a service name to a channel.
    type Registration: Send + Sync;
    /// Client-side attachment to a channel.
    type Connection: Send + Sync;

    fn create_channel(&self) -> BoxFuture<'_, Result<Self::Channel, IpcError>>;

    /// Address clients can use to reach `channel`.
    fn channel_address(&self, channel: &Self::Channel) -> Address;

    fn register_name<'a>(
        &'a self,
        channel: &'a Self::Channel,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Self::Registration, IpcError>>;

    fn unregister_name(&self, registration: Self::Registration);

    /// Destroy the channel. Pending and future senders observe a failure.
    fn destroy_channel(&self, channel: Self::Channel);

    fn connect_by_address(
        &self,
        address: Address,
    ) -> BoxFuture<'_, Result<Self::Connection, IpcError>>;

    fn connect_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Self::Connection, IpcError>>;

    fn disconnect(&self, connection: Self::Connection);

    /// Wait for the next request on `channel`.
    fn receive<'a>(
        &'a self,
        channel: &'a mut Self::Channel,
    ) -> BoxFuture<'a, Result<(SenderToken, Message), IpcError>>;

    /// Reply to a request obtained from [`Transport::receive`]. Resolves once
    /// the reply has been delivered to the sender.
    fn reply(&self, token: SenderToken, msg: Message) -> BoxFuture<'_, Result<(), IpcError>> {
        Box::pin(token.reply(msg))
    }

    /// Send `msg` and wait for the reply.
    fn send<'a>(
        &'a self,
        connection: &'a mut Self::Connection,
        msg: Message,
    ) -> BoxFuture<'a, Result<Message, IpcError>>;
}
