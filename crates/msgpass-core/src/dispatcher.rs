//! Server side: owns the channel, answers requests one at a time.
//!
//! ```text
//! Created ─▶ Registered ─▶ Serving ─┬─▶ ShutdownRequested ─┬─▶ Destroyed
//!                                   └─▶ ReceiveFailed ─────┘
//! ```
//!
//! The next request is not received until the current one has been replied
//! to, so only one sender is serviced at any instant. No state is kept about
//! which connector sent what.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::message::{ACK_REPLY, Message, SHUTDOWN_COMMAND, TERMINATE_REPLY};
use crate::transport::{Address, IpcError, Transport};

/// Lifecycle of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Registered,
    Serving,
    ShutdownRequested,
    ReceiveFailed,
    Destroyed,
}

/// Why [`Dispatcher::serve`] returned.
#[derive(Debug)]
pub enum ServeOutcome {
    /// A connector sent the shutdown command and was told to terminate.
    ShutdownRequested,
    /// The process asked the dispatcher to stop (e.g. Ctrl-C).
    Interrupted,
    /// The channel itself failed.
    ReceiveFailed(IpcError),
}

/// What to do after replying to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop,
}

/// Out-of-band stop request delivered to a serving dispatcher.
#[derive(Debug, Clone)]
pub struct Interrupt;

/// Build the reply to `request`.
pub fn interpret(request: &Message) -> (Message, Verdict) {
    if request.is(SHUTDOWN_COMMAND) {
        (request.reply(TERMINATE_REPLY), Verdict::Stop)
    } else {
        (request.reply(ACK_REPLY), Verdict::Continue)
    }
}

/// The server component.
pub struct Dispatcher<T: Transport> {
    transport: T,
    name: String,
    address: Address,
    channel: Option<T::Channel>,
    registration: Option<T::Registration>,
    state: DispatcherState,
    served: u64,
    interrupt_tx: broadcast::Sender<Interrupt>,
    interrupt_rx: broadcast::Receiver<Interrupt>,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a channel and register it under `name`.
    ///
    /// Either failure is fatal; a channel created before a failed
    /// registration is destroyed again.
    pub async fn startup(transport: T, name: &str) -> Result<Self, Error> {
        let channel = transport
            .create_channel()
            .await
            .map_err(Error::FatalStartup)?;
        let address = transport.channel_address(&channel);
        debug!(%address, state = ?DispatcherState::Created, "channel ready");

        let registration = match transport.register_name(&channel, name).await {
            Ok(registration) => registration,
            Err(e) => {
                transport.destroy_channel(channel);
                return Err(Error::FatalStartup(e));
            }
        };
        info!(%address, name, "dispatcher registered");

        let (interrupt_tx, interrupt_rx) = broadcast::channel(1);
        Ok(Self {
            transport,
            name: name.to_string(),
            address,
            channel: Some(channel),
            registration: Some(registration),
            state: DispatcherState::Registered,
            served: 0,
            interrupt_tx,
            interrupt_rx,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Requests replied to so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Sender that makes a running [`Dispatcher::serve`] return
    /// [`ServeOutcome::Interrupted`].
    pub fn interrupt_handle(&self) -> broadcast::Sender<Interrupt> {
        self.interrupt_tx.clone()
    }

    /// Receive and answer requests until shutdown, interrupt or failure.
    pub async fn serve(&mut self) -> ServeOutcome {
        let Some(channel) = self.channel.as_mut() else {
            return ServeOutcome::ReceiveFailed(IpcError::ChannelClosed);
        };
        self.state = DispatcherState::Serving;
        info!(address = %self.address, name = %self.name, "serving");

        loop {
            let received = tokio::select! {
                received = self.transport.receive(channel) => received,
                _ = self.interrupt_rx.recv() => {
                    warn!("interrupted, shutting down");
                    self.state = DispatcherState::ShutdownRequested;
                    return ServeOutcome::Interrupted;
                }
            };

            let (token, request) = match received {
                Ok(pending) => pending,
                Err(e) => {
                    error!(error = %e, "receive failed");
                    self.state = DispatcherState::ReceiveFailed;
                    return ServeOutcome::ReceiveFailed(e);
                }
            };

            let rcvid = token.rcvid();
            info!(rcvid, payload = %request.payload, "received");
            let (reply, verdict) = interpret(&request);
            match self.transport.reply(token, reply).await {
                Ok(()) => self.served += 1,
                Err(e) => warn!(rcvid, error = %e, "reply not delivered"),
            }

            if verdict == Verdict::Stop {
                info!(rcvid, "shutdown command received");
                self.state = DispatcherState::ShutdownRequested;
                return ServeOutcome::ShutdownRequested;
            }
        }
    }

    /// Unregister the name and destroy the channel. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.transport.unregister_name(registration);
        }
        if let Some(channel) = self.channel.take() {
            self.transport.destroy_channel(channel);
        }
        if self.state != DispatcherState::Destroyed {
            self.state = DispatcherState::Destroyed;
            info!(served = self.served, "dispatcher stopped");
        }
    }

    /// [`Dispatcher::serve`] followed by [`Dispatcher::shutdown`].
    pub async fn run(&mut self) -> ServeOutcome {
        let outcome = self.serve().await;
        self.shutdown();
        outcome
    }
}

impl<T: Transport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
