use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{protocol::ProtocolError, registry::BalanceError};

/// Failure to bring the listening endpoint up. Fatal to that start attempt only.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server is already running")]
    AlreadyRunning,
}

/// Why an acknowledged command had no effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(#[from] ProtocolError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
}
