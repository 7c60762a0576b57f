//! Component-level failures.
//!
//! Each transport variant records where a failure surfaced; the underlying
//! [`IpcError`] is kept as the source.

use crate::transport::IpcError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting by address or by name failed. Nothing was exchanged.
    #[error("connection error: {0}")]
    Connection(#[source] IpcError),

    /// A send, receive or reply failed mid-session.
    #[error("transport error: {0}")]
    Transport(#[source] IpcError),

    /// The dispatcher could not create or register its channel.
    #[error("fatal startup error: {0}")]
    FatalStartup(#[source] IpcError),

    /// Reading input or writing replies on the console failed.
    #[error("console I/O error: {0}")]
    Console(#[from] std::io::Error),
}

impl Error {
    /// The transport failure behind this error, if it came from the transport.
    pub fn ipc(&self) -> Option<&IpcError> {
        match self {
            Self::Connection(e) | Self::Transport(e) | Self::FatalStartup(e) => Some(e),
            Self::Console(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_category() {
        let err = Error::Connection(IpcError::NameNotRegistered("svc".into()));
        assert_eq!(
            err.to_string(),
            "connection error: service name \"svc\" is not registered"
        );
        assert!(matches!(err.ipc(), Some(IpcError::NameNotRegistered(_))));
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;
        let err = Error::Transport(IpcError::PeerClosed);
        assert_eq!(err.source().unwrap().to_string(), "peer closed the connection");
    }

    #[test]
    fn test_console_errors_carry_no_ipc_cause() {
        let err = Error::from(std::io::Error::other("stdin gone"));
        assert!(err.ipc().is_none());
    }
}
