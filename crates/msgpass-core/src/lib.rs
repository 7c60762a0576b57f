#![deny(unsafe_code)]

//! msgpass core: synchronous request/reply messaging between one dispatcher
//! and any number of connectors.
//!
//! A [`Connector`] attaches to a channel by address or by service name and
//! performs blocking exchanges of fixed-size [`Message`] records. A
//! [`Dispatcher`] owns the channel, answers every request with `"ack"`, and
//! answers `"shutdown"` with `"terminate"` before tearing the channel down.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, used as the return type of
/// [`transport::Transport`] methods so substrates stay interchangeable.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git revision, profile).
pub mod build_info;
/// Client side: connect, exchange, interactive session.
pub mod connector;
/// Server side: startup, serve loop, teardown.
pub mod dispatcher;
/// Component-level error categories.
pub mod error;
/// The fixed-size message record.
pub mod message;
/// Channel, registry and connection substrates.
pub mod transport;

pub use connector::{ConnectMode, Connector, SessionEnd};
pub use dispatcher::{Dispatcher, DispatcherState, ServeOutcome};
pub use error::Error;
pub use message::{Message, Payload};
pub use transport::{Address, IpcError, MemoryTransport, Transport, UnixTransport};
