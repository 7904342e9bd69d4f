use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    sync::Mutex,
};

use crate::message::write_line;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How long `close` waits for a write stuck on a peer that stopped reading.
const CLOSE_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Process-unique handle distinguishing two sessions from the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one peer's session.
///
/// The handler keeps the read half to itself; the registry and broadcaster
/// only ever see this shared half. Writes go through a mutex so lines from
/// concurrent broadcasts never interleave on the wire.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<Writer>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new<W>(peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: ConnectionId::next(),
            peer,
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Splits an accepted socket into the shared connection and its reader.
    pub fn from_stream(
        stream: TcpStream,
        peer: SocketAddr,
    ) -> (Arc<Self>, BufReader<OwnedReadHalf>) {
        let (reader, writer) = stream.into_split();
        (Arc::new(Self::new(peer, writer)), BufReader::new(reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one line to the peer.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        write_line(&mut *writer, line).await
    }

    /// Marks the connection closed and shuts down the write side.
    ///
    /// Only the first call touches the socket; later calls are no-ops. If an
    /// in-flight write holds the writer past `CLOSE_LOCK_TIMEOUT`, the
    /// shutdown is skipped with `TimedOut` and the socket closes once that
    /// write gives up and the last handle is dropped.
    pub async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = tokio::time::timeout(CLOSE_LOCK_TIMEOUT, self.writer.lock())
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "writer busy with a stalled peer")
            })?;
        writer.shutdown().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn ids_are_unique_per_connection() {
        let (a, _) = tokio::io::duplex(16);
        let (b, _) = tokio::io::duplex(16);
        let first = Connection::new(peer(), a);
        let second = Connection::new(peer(), b);
        assert_ne!(first.id(), second.id());
        assert!(first.id() < second.id());
    }

    #[tokio::test]
    async fn send_line_writes_terminated_line() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let conn = Connection::new(peer(), writer);

        conn.send_line("hello").await.expect("send line");

        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"hello\n");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_writes() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let conn = Connection::new(peer(), writer);

        conn.close().await.expect("first close");
        conn.close().await.expect("second close");
        assert!(conn.is_closed());

        let err = conn.send_line("late").await.expect_err("write after close");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.expect("peer sees eof");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn close_gives_up_on_a_write_stuck_behind_a_full_peer() {
        // The peer never reads, so a long line fills the pipe and blocks.
        let (writer, _reader) = tokio::io::duplex(8);
        let conn = Arc::new(Connection::new(peer(), writer));

        let stuck = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send_line("a line far longer than eight bytes").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = tokio::time::timeout(Duration::from_secs(2), conn.close())
            .await
            .expect("close must not wait for the stalled write")
            .expect_err("shutdown is skipped");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(conn.is_closed());
        assert!(!stuck.is_finished());
    }
}
