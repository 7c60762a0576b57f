//! Client side: attach to a dispatcher and exchange messages.
//!
//! One exchange is in flight per connector: [`Connector::exchange`] takes
//! `&mut self` and does not return until the reply arrives, the transport
//! fails, or the optional timeout expires.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::message::{Message, Payload, TERMINATE_REPLY};
use crate::transport::{Address, IpcError, Transport};

/// How to locate the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    ByAddress(Address),
    ByName(String),
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByAddress(address) => write!(f, "address ({address})"),
            Self::ByName(name) => write!(f, "name {name:?}"),
        }
    }
}

/// How an interactive session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The dispatcher replied with the termination token.
    Terminated,
    /// Input reached end of file.
    InputClosed,
}

/// The client component. Owns its connection exclusively.
pub struct Connector<T: Transport> {
    transport: T,
    mode: ConnectMode,
    connection: Option<T::Connection>,
    exchange_timeout: Option<Duration>,
}

impl<T: Transport> Connector<T> {
    /// Attach to the dispatcher located by `mode`.
    pub async fn connect(transport: T, mode: ConnectMode) -> Result<Self, Error> {
        let connection = match &mode {
            ConnectMode::ByAddress(address) => transport.connect_by_address(*address).await,
            ConnectMode::ByName(name) => transport.connect_by_name(name).await,
        }
        .map_err(Error::Connection)?;
        info!(%mode, "connected");

        Ok(Self {
            transport,
            mode,
            connection: Some(connection),
            exchange_timeout: None,
        })
    }

    /// Bound every exchange by `timeout`; `None` waits indefinitely.
    pub fn with_exchange_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn mode(&self) -> &ConnectMode {
        &self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send `outgoing` (truncated to capacity) and return the reply text.
    ///
    /// A failed exchange leaves the connection unusable, so it is released
    /// before the error is returned.
    pub async fn exchange(&mut self, outgoing: &str) -> Result<String, Error> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::Transport(IpcError::Disconnected));
        };

        let request = Message::new(outgoing);
        if request.payload.len() < outgoing.len() {
            debug!(
                kept = request.payload.len(),
                limit = Payload::MAX_LEN,
                "outgoing text truncated"
            );
        }

        let pending = self.transport.send(connection, request);
        let result = match self.exchange_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .unwrap_or(Err(IpcError::TimedOut(limit))),
            None => pending.await,
        };

        match result {
            Ok(reply) => {
                debug!(reply = %reply.payload, "exchange complete");
                Ok(reply.payload.as_str().to_string())
            }
            Err(e) => {
                warn!(error = %e, "exchange failed");
                self.disconnect();
                Err(Error::Transport(e))
            }
        }
    }

    /// Release the connection. Later calls do nothing.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.transport.disconnect(connection);
            info!(mode = %self.mode, "disconnected");
        }
    }

    /// Read lines from `input`, exchange each one, and write the replies to
    /// `output` until the dispatcher says terminate or input ends.
    ///
    /// The connection is released on every exit path.
    pub async fn run_session<R, W>(
        &mut self,
        input: R,
        mut output: W,
        prompt: &str,
    ) -> Result<SessionEnd, Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.drive(input, &mut output, prompt).await;
        self.disconnect();
        result
    }

    async fn drive<R, W>(
        &mut self,
        mut input: R,
        output: &mut W,
        prompt: &str,
    ) -> Result<SessionEnd, Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut raw = Vec::new();
        loop {
            output.write_all(prompt.as_bytes()).await?;
            output.flush().await?;

            raw.clear();
            if input.read_until(b'\n', &mut raw).await? == 0 {
                info!("input closed, ending session");
                return Ok(SessionEnd::InputClosed);
            }

            let reply = self.exchange(&decode_line(&raw)).await?;
            output.write_all(format!("reply: {reply}\n").as_bytes()).await?;

            if reply == TERMINATE_REPLY {
                output.write_all(b"server requested termination\n").await?;
                output.flush().await?;
                return Ok(SessionEnd::Terminated);
            }
        }
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

impl<T: Transport> Drop for Connector<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, ServeOutcome};
    use crate::message::ACK_REPLY;
    use crate::transport::MemoryTransport;
    use pretty_assertions::assert_eq;

    /// Start a dispatcher named "svc" serving in the background.
    async fn spawn_dispatcher(
        transport: &MemoryTransport,
    ) -> (Address, tokio::task::JoinHandle<ServeOutcome>) {
        let mut dispatcher = Dispatcher::startup(transport.clone(), "svc").await.unwrap();
        let address = dispatcher.address();
        (address, tokio::spawn(async move { dispatcher.run().await }))
    }

    #[tokio::test]
    async fn test_exchange_by_name() {
        let transport = MemoryTransport::new();
        let (_, server) = spawn_dispatcher(&transport).await;

        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();
        assert_eq!(connector.exchange("hello").await.unwrap(), ACK_REPLY);
        assert_eq!(connector.exchange("shutdown").await.unwrap(), TERMINATE_REPLY);
        assert!(matches!(server.await.unwrap(), ServeOutcome::ShutdownRequested));
    }

    #[tokio::test]
    async fn test_exchange_by_address_behaves_the_same() {
        let transport = MemoryTransport::new();
        let (address, server) = spawn_dispatcher(&transport).await;

        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByAddress(address))
            .await
            .unwrap();
        assert_eq!(connector.exchange("hello").await.unwrap(), ACK_REPLY);
        assert_eq!(connector.exchange("").await.unwrap(), ACK_REPLY);
        assert_eq!(connector.exchange("shutdown").await.unwrap(), TERMINATE_REPLY);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_overlong_shutdown_prefix_is_not_a_command() {
        let transport = MemoryTransport::new();
        let (_, server) = spawn_dispatcher(&transport).await;
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();

        let long = format!("shutdown{}", "!".repeat(400));
        assert_eq!(connector.exchange(&long).await.unwrap(), ACK_REPLY);
        connector.exchange("shutdown").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_unknown_name_fails() {
        let transport = MemoryTransport::new();
        let result = Connector::connect(transport, ConnectMode::ByName("missing".into())).await;
        assert!(matches!(
            result.err().unwrap(),
            Error::Connection(IpcError::NameNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unknown_address_fails() {
        let transport = MemoryTransport::new();
        let mode = ConnectMode::ByAddress(Address::new(1, 99));
        let result = Connector::connect(transport, mode).await;
        assert!(matches!(
            result.err().unwrap(),
            Error::Connection(IpcError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = MemoryTransport::new();
        let (_address, _server) = spawn_dispatcher(&transport).await;
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();

        connector.disconnect();
        connector.disconnect();
        assert!(!connector.is_connected());
        assert!(matches!(
            connector.exchange("hello").await,
            Err(Error::Transport(IpcError::Disconnected))
        ));
    }

    #[tokio::test]
    async fn test_exchange_timeout_releases_connection() {
        let transport = MemoryTransport::new();
        // A registered channel nobody serves.
        let _silent = Dispatcher::startup(transport.clone(), "svc").await.unwrap();
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap()
            .with_exchange_timeout(Some(Duration::from_millis(50)));

        let err = connector.exchange("hello").await.unwrap_err();
        assert!(matches!(err, Error::Transport(IpcError::TimedOut(_))));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_session_stops_on_terminate() {
        let transport = MemoryTransport::new();
        let (_, server) = spawn_dispatcher(&transport).await;
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();

        let input: &[u8] = b"hello\n\nshutdown\nnever sent\n";
        let mut output = Vec::new();
        let end = connector.run_session(input, &mut output, "> ").await.unwrap();

        assert_eq!(end, SessionEnd::Terminated);
        assert!(!connector.is_connected());
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "> reply: ack\n> reply: ack\n> reply: terminate\nserver requested termination\n"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_ends_when_input_closes() {
        let transport = MemoryTransport::new();
        let (_, server) = spawn_dispatcher(&transport).await;
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();

        let input: &[u8] = b"one\r\ntwo";
        let mut output = Vec::new();
        let end = connector.run_session(input, &mut output, "").await.unwrap();
        assert_eq!(end, SessionEnd::InputClosed);
        assert!(!connector.is_connected());
        assert_eq!(String::from_utf8(output).unwrap(), "reply: ack\nreply: ack\n");

        server.abort();
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn test_session_survives_invalid_utf8_input() {
        let transport = MemoryTransport::new();
        let (_, server) = spawn_dispatcher(&transport).await;
        let mut connector = Connector::connect(transport.clone(), ConnectMode::ByName("svc".into()))
            .await
            .unwrap();

        let input: &[u8] = b"caf\xe9\n\xff\xfe\nshutdown\n";
        let mut output = Vec::new();
        let end = connector.run_session(input, &mut output, "").await.unwrap();

        assert_eq!(end, SessionEnd::Terminated);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "reply: ack\nreply: ack\nreply: terminate\nserver requested termination\n"
        );
        assert!(matches!(server.await.unwrap(), ServeOutcome::ShutdownRequested));
    }
}
