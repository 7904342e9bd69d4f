use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{connection::Connection, error::DeliveryError, registry::ClientRegistry};

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<DeliveryError>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Fans lines out to everyone in the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Sends `message` to every registered connection except `exclude`.
    ///
    /// Recipients are written concurrently and independently: a failed write
    /// is logged and reported but neither stops the remaining deliveries nor
    /// unregisters the recipient. That happens when the recipient's own
    /// handler notices the broken socket.
    pub async fn broadcast(&self, message: &str, exclude: Option<&Connection>) -> BroadcastReport {
        let excluded = exclude.map(Connection::id);
        let recipients: Vec<Arc<Connection>> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|conn| Some(conn.id()) != excluded && !conn.is_closed())
            .collect();

        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        debug!(recipients = recipients.len(), line = message, "broadcasting");
        let deliveries = recipients.iter().map(|conn| async move {
            conn.send_line(message).await.map_err(|source| DeliveryError {
                id: conn.id(),
                peer: conn.peer(),
                source,
            })
        });

        let mut report = BroadcastReport::default();
        for result in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(peer = %err.peer, id = %err.id, error = ?err.source, "failed to deliver message");
                    report.failed.push(err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    use super::*;

    fn connection(port: u16) -> (Arc<Connection>, BufReader<DuplexStream>) {
        let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let (writer, reader) = tokio::io::duplex(256);
        (Arc::new(Connection::new(peer, writer)), BufReader::new(reader))
    }

    async fn next_line(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read line");
        line
    }

    #[tokio::test]
    async fn empty_registry_is_a_noop() {
        let broadcaster = Broadcaster::new(Arc::new(ClientRegistry::new()));

        let report = broadcaster.broadcast("nobody home", None).await;

        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn excluded_sender_does_not_receive_its_message() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (alice, mut alice_rx) = connection(1);
        let (bob, mut bob_rx) = connection(2);
        registry.register(&alice).await;
        registry.register(&bob).await;

        let report = broadcaster.broadcast("from alice", Some(&*alice)).await;
        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_empty());
        assert_eq!(next_line(&mut bob_rx).await, "from alice\n");

        broadcaster.broadcast("to everyone", None).await;
        assert_eq!(next_line(&mut alice_rx).await, "to everyone\n");
        assert_eq!(next_line(&mut bob_rx).await, "to everyone\n");
    }

    #[tokio::test]
    async fn failed_recipient_does_not_stop_delivery() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (broken, broken_rx) = connection(1);
        let (healthy, mut healthy_rx) = connection(2);
        registry.register(&broken).await;
        registry.register(&healthy).await;
        drop(broken_rx);

        let report = broadcaster.broadcast("still here", None).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, broken.id());
        assert_eq!(next_line(&mut healthy_rx).await, "still here\n");
        // Delivery failures never unregister anyone.
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn closed_connections_are_skipped() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (leaving, _leaving_rx) = connection(1);
        registry.register(&leaving).await;
        leaving.close().await.expect("close");

        let report = broadcaster.broadcast("anyone?", None).await;

        assert_eq!(report.attempted(), 0);
    }
}
