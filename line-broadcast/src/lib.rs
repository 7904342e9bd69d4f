//! Multi-client TCP line-broadcast server.
//!
//! Every client sends newline-delimited text; each line is relayed to all
//! other connected clients as `[<sender-address>]: <text>`. Sending `exit`
//! ends the sender's session. The modules follow the life of a connection:
//!
//! - [`listener`] binds the port and spawns one handler task per socket.
//! - [`handler`] runs a single session: register, read lines, unregister.
//! - [`registry`] is the shared set of live connections.
//! - [`broadcast`] fans a line out to a registry snapshot.
//! - [`connection`] owns the write side of one peer's socket.
//! - [`message`] holds the line codec and the notice formats.
//! - [`cli`], [`config`] and [`client`] cover the command line and the
//!   terminal client.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod registry;
