//! Unix-socket substrate.
//!
//! A channel is a stream socket at `<runtime_dir>/chan-<pid>-<chid>.sock`.
//! An accept task owns one session per attached connection; a session
//! forwards each request record into the channel inbox together with a reply
//! slot, and blocks until the dispatcher fills it. A reply counts as
//! delivered only after the session has written it, so destroying the channel
//! right after the last reply cannot lose it. Aborting the accept task
//! (channel destroyed) aborts every session, so suspended senders observe
//! EOF.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use msgpass_config::TransportConfig;

use super::codec::{read_record, write_record};
use super::registry::{NameRegistry, Registration};
use super::{Address, Inbound, IpcError, SenderToken, Transport, await_reply};
use crate::BoxFuture;
use crate::message::Message;

/// Channel ids are unique per process, starting at 1.
static NEXT_CHID: AtomicU32 = AtomicU32::new(1);

/// Requests queued per channel before sessions are back-pressured.
const INBOX_DEPTH: usize = 64;

/// First pause after an accept failure caused by resource exhaustion.
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);

/// Longest pause between accept attempts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Socket path of the channel at `address`.
pub(crate) fn socket_path(runtime_dir: &Path, address: Address) -> PathBuf {
    runtime_dir.join(format!("chan-{}-{}.sock", address.pid, address.chid))
}

/// Transport over Unix stream sockets rooted at a runtime directory.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    runtime_dir: PathBuf,
    registry: NameRegistry,
}

impl UnixTransport {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            registry: NameRegistry::new(runtime_dir.clone()),
            runtime_dir,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.runtime_dir.clone())
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    async fn bind(&self, path: &Path) -> io::Result<UnixListener> {
        tokio::fs::create_dir_all(&self.runtime_dir).await?;
        // Left behind by an earlier process that had the same pid.
        match tokio::fs::remove_file(path).await {
            Ok(()) => warn!(path = %path.display(), "removed stale channel socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        UnixListener::bind(path)
    }
}

/// Receiving endpoint backed by a listening socket.
#[derive(Debug)]
pub struct UnixChannel {
    address: Address,
    path: PathBuf,
    inbox: mpsc::Receiver<Inbound>,
    acceptor: JoinHandle<()>,
}

impl UnixChannel {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixChannel {
    fn drop(&mut self) {
        self.acceptor.abort();
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove channel socket");
        }
    }
}

/// Client attachment to a channel socket.
#[derive(Debug)]
pub struct UnixConnection {
    address: Address,
    stream: UnixStream,
}

impl UnixConnection {
    pub fn address(&self) -> Address {
        self.address
    }
}

/// Map stream failures that mean "the other side is gone" to [`IpcError::PeerClosed`].
fn peer_error(e: io::Error) -> IpcError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => IpcError::PeerClosed,
        _ => IpcError::Io(e),
    }
}

/// How the accept loop reacts to a failed `accept()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The pending connection went away before it was accepted.
    Retry,
    /// The process or system is short of resources (e.g. `EMFILE`).
    Backoff,
    /// The listener itself is unusable.
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::Retry,
        io::ErrorKind::InvalidInput => AcceptFailure::Fatal,
        _ => AcceptFailure::Backoff,
    }
}

/// Pause to take after `current`, doubling up to [`ACCEPT_BACKOFF_MAX`].
fn next_backoff(current: Option<Duration>) -> Duration {
    match current {
        None => ACCEPT_BACKOFF_START,
        Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

async fn accept_loop(listener: UnixListener, inbox: mpsc::Sender<Inbound>, address: Address) {
    let rcvids = Arc::new(AtomicU64::new(1));
    let mut sessions = JoinSet::new();
    let mut backoff = None;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    backoff = None;
                    debug!(%address, active = sessions.len() + 1, "connection attached");
                    sessions.spawn(run_session(stream, inbox.clone(), Arc::clone(&rcvids)));
                }
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Retry => {
                        debug!(%address, error = %e, "connection dropped before accept");
                    }
                    AcceptFailure::Backoff => {
                        let pause = next_backoff(backoff);
                        backoff = Some(pause);
                        warn!(%address, error = %e, ?pause, "accept failed, retrying");
                        tokio::time::sleep(pause).await;
                    }
                    AcceptFailure::Fatal => {
                        error!(%address, error = %e, "listener unusable, closing channel");
                        break;
                    }
                },
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!(%address, "session task panicked");
                }
            }
        }
    }
}

async fn run_session(
    mut stream: UnixStream,
    inbox: mpsc::Sender<Inbound>,
    rcvids: Arc<AtomicU64>,
) {
    loop {
        let msg = match read_record(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("connection detached");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping connection after bad read");
                return;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let token = SenderToken::new(rcvids.fetch_add(1, Ordering::Relaxed), reply_tx);
        if inbox.send(Inbound { token, msg }).await.is_err() {
            return;
        }

        let delivery = match await_reply(reply_rx).await {
            Ok(delivery) => delivery,
            Err(_) => {
                debug!("request released without a reply, dropping connection");
                return;
            }
        };
        if let Err(e) = write_record(&mut stream, &delivery.msg).await {
            warn!(error = %e, "failed to deliver reply");
            return;
        }
        let _ = delivery.written.send(());
    }
}

impl Transport for UnixTransport {
    type Channel = UnixChannel;
    type Registration = Registration;
    type Connection = UnixConnection;

    fn create_channel(&self) -> BoxFuture<'_, Result<UnixChannel, IpcError>> {
        Box::pin(async move {
            let chid = NEXT_CHID.fetch_add(1, Ordering::Relaxed);
            let address = Address::new(std::process::id(), chid);
            let path = socket_path(&self.runtime_dir, address);
            let listener = self
                .bind(&path)
                .await
                .map_err(|source| IpcError::CreateChannel {
                    path: path.clone(),
                    source,
                })?;

            let (inbox_tx, inbox) = mpsc::channel(INBOX_DEPTH);
            let acceptor = tokio::spawn(accept_loop(listener, inbox_tx, address));
            info!(%address, path = %path.display(), "channel created");

            Ok(UnixChannel {
                address,
                path,
                inbox,
                acceptor,
            })
        })
    }

    fn channel_address(&self, channel: &UnixChannel) -> Address {
        channel.address
    }

    fn register_name<'a>(
        &'a self,
        channel: &'a UnixChannel,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Registration, IpcError>> {
        Box::pin(self.registry.register(name, channel.address))
    }

    fn unregister_name(&self, mut registration: Registration) {
        registration.unregister();
    }

    fn destroy_channel(&self, channel: UnixChannel) {
        info!(address = %channel.address, "channel destroyed");
        drop(channel);
    }

    fn connect_by_address(
        &self,
        address: Address,
    ) -> BoxFuture<'_, Result<UnixConnection, IpcError>> {
        Box::pin(async move {
            let stream = UnixStream::connect(socket_path(&self.runtime_dir, address))
                .await
                .map_err(|source| IpcError::Unreachable { address, source })?;
            debug!(%address, "attached to channel");
            Ok(UnixConnection { address, stream })
        })
    }

    fn connect_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<UnixConnection, IpcError>> {
        Box::pin(async move {
            let address = self.registry.resolve(name).await?;
            debug!(name, %address, "service name resolved");
            self.connect_by_address(address).await
        })
    }

    fn disconnect(&self, connection: UnixConnection) {
        debug!(address = %connection.address, "detached from channel");
        drop(connection);
    }

    fn receive<'a>(
        &'a self,
        channel: &'a mut UnixChannel,
    ) -> BoxFuture<'a, Result<(SenderToken, Message), IpcError>> {
        Box::pin(async move {
            let inbound = channel.inbox.recv().await.ok_or(IpcError::ChannelClosed)?;
            Ok((inbound.token, inbound.msg))
        })
    }

    fn send<'a>(
        &'a self,
        connection: &'a mut UnixConnection,
        msg: Message,
    ) -> BoxFuture<'a, Result<Message, IpcError>> {
        Box::pin(async move {
            write_record(&mut connection.stream, &msg)
                .await
                .map_err(peer_error)?;
            read_record(&mut connection.stream)
                .await
                .map_err(peer_error)?
                .ok_or(IpcError::PeerClosed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_channel_lifecycle_manages_socket_file() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let channel = transport.create_channel().await.unwrap();
        let path = channel.socket_path().to_path_buf();
        assert!(path.exists());
        assert_eq!(channel.address().pid, std::process::id());

        transport.destroy_channel(channel);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_channel_ids_are_unique() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let a = transport.create_channel().await.unwrap();
        let b = transport.create_channel().await.unwrap();
        assert_ne!(a.address().chid, b.address().chid);
    }

    #[tokio::test]
    async fn test_send_receive_reply() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let mut channel = transport.create_channel().await.unwrap();
        let mut conn = transport
            .connect_by_address(channel.address())
            .await
            .unwrap();

        let client = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&mut conn, Message::new("ping")).await })
        };

        let (token, msg) = transport.receive(&mut channel).await.unwrap();
        assert!(msg.is("ping"));
        transport.reply(token, msg.reply("pong")).await.unwrap();

        let reply = client.await.unwrap().unwrap();
        assert!(reply.is("pong"));
    }

    #[tokio::test]
    async fn test_connect_to_missing_channel_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let err = transport
            .connect_by_address(Address::new(999_999, 77))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_connect_by_name_resolves_registry() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let channel = transport.create_channel().await.unwrap();
        let _reg = transport.register_name(&channel, "svc").await.unwrap();

        let conn = transport.connect_by_name("svc").await.unwrap();
        assert_eq!(conn.address(), channel.address());
    }

    #[tokio::test]
    async fn test_unreplied_request_fails_sender() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        let mut channel = transport.create_channel().await.unwrap();
        let mut conn = transport
            .connect_by_address(channel.address())
            .await
            .unwrap();

        let client = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&mut conn, Message::new("hello")).await })
        };

        let (token, _msg) = transport.receive(&mut channel).await.unwrap();
        drop(token);
        assert!(matches!(client.await.unwrap(), Err(IpcError::PeerClosed)));
    }

    #[test]
    fn test_transient_accept_errors_do_not_close_channel() {
        let emfile = io::Error::from_raw_os_error(24);
        let enfile = io::Error::from_raw_os_error(23);
        assert_eq!(classify_accept_error(&emfile), AcceptFailure::Backoff);
        assert_eq!(classify_accept_error(&enfile), AcceptFailure::Backoff);
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(classify_accept_error(&io::Error::from(kind)), AcceptFailure::Retry);
        }
        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)),
            AcceptFailure::Fatal
        );
    }

    #[test]
    fn test_accept_backoff_doubles_up_to_cap() {
        let mut pause = None;
        let mut seen = Vec::new();
        for _ in 0..10 {
            let next = next_backoff(pause);
            seen.push(next);
            pause = Some(next);
        }
        assert_eq!(seen[0], ACCEPT_BACKOFF_START);
        assert_eq!(seen[1], ACCEPT_BACKOFF_START * 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), ACCEPT_BACKOFF_MAX);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reply_is_written_before_channel_is_destroyed() {
        let tmp = TempDir::new().unwrap();
        let transport = UnixTransport::new(tmp.path());
        for round in 0..20 {
            let mut channel = transport.create_channel().await.unwrap();
            let mut conn = transport
                .connect_by_address(channel.address())
                .await
                .unwrap();
            let client = {
                let transport = transport.clone();
                tokio::spawn(async move { transport.send(&mut conn, Message::new("bye")).await })
            };

            let (token, msg) = transport.receive(&mut channel).await.unwrap();
            transport.reply(token, msg.reply("terminate")).await.unwrap();
            transport.destroy_channel(channel);

            let reply = client.await.unwrap();
            assert!(
                matches!(&reply, Ok(m) if m.is("terminate")),
                "round {round}: {reply:?}"
            );
        }
    }
}
