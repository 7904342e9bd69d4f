use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::connection::ConnectionId;

/// Failures that stop the listener itself.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created.
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The listening socket became unusable while accepting.
    #[error("listener can no longer accept connections")]
    Accept(#[source] io::Error),
}

/// I/O failure on an established session. Ends that session only.
#[derive(Debug, Error)]
#[error("i/o error on connection {id} ({peer})")]
pub struct ConnectionError {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// A single recipient could not be written to during a broadcast.
#[derive(Debug, Error)]
#[error("failed to deliver message to connection {id} ({peer})")]
pub struct DeliveryError {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    #[source]
    pub source: io::Error,
}
