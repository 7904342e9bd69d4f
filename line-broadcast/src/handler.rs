//! Per-connection session loop.
//!
//! A session moves through `Connecting -> Registered -> Reading -> Closing ->
//! Closed`. [`ConnectionHandler::run`] drives one session to completion and
//! reports why it ended; nothing it encounters escalates past this task.

use std::sync::Arc;

use tokio::io::AsyncBufRead;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    connection::Connection,
    error::ConnectionError,
    message::{chat_line, is_exit_command, joined_notice, left_notice, read_line},
};

/// Why a session stopped reading.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed its side of the stream.
    Disconnected,
    /// The peer sent the exit command.
    ExitRequested,
    /// Reading from the peer failed.
    Failed(ConnectionError),
}

pub struct ConnectionHandler<R> {
    conn: Arc<Connection>,
    reader: R,
    broadcaster: Broadcaster,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(conn: Arc<Connection>, reader: R, broadcaster: Broadcaster) -> Self {
        Self {
            conn,
            reader,
            broadcaster,
        }
    }

    pub async fn run(mut self) -> SessionEnd {
        self.register().await;
        let end = self.read_messages().await;
        self.close(&end).await;
        end
    }

    async fn register(&self) {
        let peer = self.conn.peer();
        self.broadcaster.registry().register(&self.conn).await;
        info!(%peer, id = %self.conn.id(), "client connected");

        // Sent after registration, so the new peer sees its own join notice.
        self.broadcaster.broadcast(&joined_notice(peer), None).await;
    }

    async fn read_messages(&mut self) -> SessionEnd {
        let peer = self.conn.peer();
        loop {
            let text = match read_line(&mut self.reader).await {
                Ok(Some(text)) => text,
                Ok(None) => return SessionEnd::Disconnected,
                Err(source) => {
                    return SessionEnd::Failed(ConnectionError {
                        id: self.conn.id(),
                        peer,
                        source,
                    });
                }
            };

            debug!(%peer, text, "received message");
            self.broadcaster
                .broadcast(&chat_line(peer, &text), Some(&*self.conn))
                .await;

            if is_exit_command(&text) {
                return SessionEnd::ExitRequested;
            }
        }
    }

    async fn close(&self, end: &SessionEnd) {
        let peer = self.conn.peer();
        match end {
            SessionEnd::Disconnected => debug!(%peer, "peer closed the stream"),
            SessionEnd::ExitRequested => debug!(%peer, "peer requested exit"),
            SessionEnd::Failed(err) => warn!(%peer, error = ?err.source, "connection failed"),
        }

        if self.broadcaster.registry().unregister(&self.conn).await {
            self.broadcaster.broadcast(&left_notice(peer), None).await;
        }

        if let Err(err) = self.conn.close().await {
            warn!(%peer, error = ?err, "failed to close connection cleanly");
        }

        let remaining = self.broadcaster.registry().len().await;
        info!(%peer, id = %self.conn.id(), remaining, "client disconnected");
    }
}
