//! In-process substrate.
//!
//! Clones of a [`MemoryTransport`] share one table of channels and names, so
//! a connector and a dispatcher running as tasks in the same runtime can
//! reach each other without touching the filesystem.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{Address, Inbound, IpcError, SenderToken, Transport, await_reply};
use crate::BoxFuture;
use crate::message::Message;

const INBOX_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct Table {
    next_chid: u32,
    channels: HashMap<Address, Endpoint>,
    names: HashMap<String, Address>,
}

#[derive(Debug, Clone)]
struct Endpoint {
    inbox: mpsc::Sender<Inbound>,
    rcvids: Arc<AtomicU64>,
}

/// Shared in-memory channel and name table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    table: Arc<Mutex<Table>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.table.lock().map(|t| t.channels.len()).unwrap_or(0)
    }

    /// Address currently bound to `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Address> {
        self.table.lock().ok()?.names.get(name).copied()
    }
}

fn poisoned() -> IpcError {
    IpcError::Io(io::Error::other("memory transport table poisoned"))
}

/// Receiving endpoint; removed from the table when dropped.
#[derive(Debug)]
pub struct MemoryChannel {
    address: Address,
    inbox: mpsc::Receiver<Inbound>,
    table: Arc<Mutex<Table>>,
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            table.channels.remove(&self.address);
        }
    }
}

/// Name binding; removed from the table when dropped.
#[derive(Debug)]
pub struct MemoryRegistration {
    name: String,
    address: Address,
    table: Arc<Mutex<Table>>,
}

impl Drop for MemoryRegistration {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock()
            && table.names.get(&self.name) == Some(&self.address)
        {
            table.names.remove(&self.name);
        }
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    address: Address,
    endpoint: Endpoint,
}

impl Transport for MemoryTransport {
    type Channel = MemoryChannel;
    type Registration = MemoryRegistration;
    type Connection = MemoryConnection;

    fn create_channel(&self) -> BoxFuture<'_, Result<MemoryChannel, IpcError>> {
        Box::pin(async move {
            let mut table = self.table.lock().map_err(|_| poisoned())?;
            table.next_chid += 1;
            let address = Address::new(std::process::id(), table.next_chid);
            let (inbox_tx, inbox) = mpsc::channel(INBOX_DEPTH);
            table.channels.insert(
                address,
                Endpoint {
                    inbox: inbox_tx,
                    rcvids: Arc::new(AtomicU64::new(1)),
                },
            );
            debug!(%address, "memory channel created");
            Ok(MemoryChannel {
                address,
                inbox,
                table: Arc::clone(&self.table),
            })
        })
    }

    fn channel_address(&self, channel: &MemoryChannel) -> Address {
        channel.address
    }

    fn register_name<'a>(
        &'a self,
        channel: &'a MemoryChannel,
        name: &'a str,
    ) -> BoxFuture<'a, Result<MemoryRegistration, IpcError>> {
        Box::pin(async move {
            if !msgpass_config::is_valid_service_name(name) {
                return Err(IpcError::InvalidName(name.to_string()));
            }
            let mut table = self.table.lock().map_err(|_| poisoned())?;
            if let Some(&holder) = table.names.get(name)
                && table.channels.contains_key(&holder)
            {
                return Err(IpcError::NameTaken {
                    name: name.to_string(),
                    address: holder,
                });
            }
            table.names.insert(name.to_string(), channel.address);
            Ok(MemoryRegistration {
                name: name.to_string(),
                address: channel.address,
                table: Arc::clone(&self.table),
            })
        })
    }

    fn unregister_name(&self, registration: MemoryRegistration) {
        drop(registration);
    }

    fn destroy_channel(&self, channel: MemoryChannel) {
        debug!(address = %channel.address, "memory channel destroyed");
        drop(channel);
    }

    fn connect_by_address(
        &self,
        address: Address,
    ) -> BoxFuture<'_, Result<MemoryConnection, IpcError>> {
        Box::pin(async move {
            let table = self.table.lock().map_err(|_| poisoned())?;
            let endpoint = table
                .channels
                .get(&address)
                .cloned()
                .ok_or_else(|| IpcError::Unreachable {
                    address,
                    source: io::Error::new(io::ErrorKind::NotFound, "no such channel"),
                })?;
            Ok(MemoryConnection { address, endpoint })
        })
    }

    fn connect_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<MemoryConnection, IpcError>> {
        Box::pin(async move {
            let address = self
                .lookup(name)
                .ok_or_else(|| IpcError::NameNotRegistered(name.to_string()))?;
            self.connect_by_address(address).await
        })
    }

    fn disconnect(&self, connection: MemoryConnection) {
        debug!(address = %connection.address, "memory connection released");
        drop(connection);
    }

    fn receive<'a>(
        &'a self,
        channel: &'a mut MemoryChannel,
    ) -> BoxFuture<'a, Result<(SenderToken, Message), IpcError>> {
        Box::pin(async move {
            let inbound = channel.inbox.recv().await.ok_or(IpcError::ChannelClosed)?;
            Ok((inbound.token, inbound.msg))
        })
    }

    fn send<'a>(
        &'a self,
        connection: &'a mut MemoryConnection,
        msg: Message,
    ) -> BoxFuture<'a, Result<Message, IpcError>> {
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            let rcvid = connection.endpoint.rcvids.fetch_add(1, Ordering::Relaxed);
            connection
                .endpoint
                .inbox
                .send(Inbound {
                    token: SenderToken::new(rcvid, reply_tx),
                    msg,
                })
                .await
                .map_err(|_| IpcError::PeerClosed)?;
            let delivery = await_reply(reply_rx).await?;
            // In-process delivery is complete once the reply is in hand.
            let _ = delivery.written.send(());
            Ok(delivery.msg)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let transport = MemoryTransport::new();
        let mut channel = transport.create_channel().await.unwrap();
        let mut conn = transport
            .connect_by_address(transport.channel_address(&channel))
            .await
            .unwrap();

        let client = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&mut conn, Message::new("hi")).await })
        };
        let (token, msg) = transport.receive(&mut channel).await.unwrap();
        transport.reply(token, msg.reply("ack")).await.unwrap();
        assert!(client.await.unwrap().unwrap().is("ack"));
    }

    #[tokio::test]
    async fn test_name_binding_follows_registration() {
        let transport = MemoryTransport::new();
        let channel = transport.create_channel().await.unwrap();
        let reg = transport.register_name(&channel, "svc").await.unwrap();
        assert_eq!(transport.lookup("svc"), Some(transport.channel_address(&channel)));

        transport.unregister_name(reg);
        assert_eq!(transport.lookup("svc"), None);
        assert!(matches!(
            transport.connect_by_name("svc").await,
            Err(IpcError::NameNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_live_name_cannot_be_taken() {
        let transport = MemoryTransport::new();
        let first = transport.create_channel().await.unwrap();
        let second = transport.create_channel().await.unwrap();
        let _reg = transport.register_name(&first, "svc").await.unwrap();
        assert!(matches!(
            transport.register_name(&second, "svc").await,
            Err(IpcError::NameTaken { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroyed_channel_rejects_senders() {
        let transport = MemoryTransport::new();
        let channel = transport.create_channel().await.unwrap();
        let address = transport.channel_address(&channel);
        let mut conn = transport.connect_by_address(address).await.unwrap();

        transport.destroy_channel(channel);
        assert_eq!(transport.channel_count(), 0);
        assert!(matches!(
            transport.send(&mut conn, Message::new("late")).await,
            Err(IpcError::PeerClosed)
        ));
        assert!(matches!(
            transport.connect_by_address(address).await,
            Err(IpcError::Unreachable { .. })
        ));
    }
}
