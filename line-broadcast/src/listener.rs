use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore, watch},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ServerConfig,
    connection::Connection,
    error::ServerError,
    handler::{ConnectionHandler, SessionEnd},
    registry::ClientRegistry,
};

/// Pause after a transient accept failure so descriptor exhaustion does not
/// turn the accept loop into a busy spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Accept loop that hands every socket to its own [`ConnectionHandler`].
pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    limit: Option<Arc<Semaphore>>,
    stop_tx: watch::Sender<bool>,
}

/// Cloneable trigger that ends a running accept loop.
///
/// Stopping closes the listening socket only. Sessions that were already
/// accepted keep running until their peers leave.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::new(listener, config.max_connections))
    }

    /// Wraps an already bound listener.
    pub fn new(listener: TcpListener, max_connections: Option<usize>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            listener,
            broadcaster: Broadcaster::new(Arc::new(ClientRegistry::new())),
            limit: max_connections.map(|limit| Arc::new(Semaphore::new(limit))),
            stop_tx,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(self.broadcaster.registry())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Accepts connections until a [`StopHandle`] fires.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves or a [`StopHandle`]
    /// fires. The listening socket is closed on return.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            broadcaster,
            limit,
            stop_tx,
        } = self;
        let mut stop_rx = stop_tx.subscribe();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                _ = stop_requested(&mut stop_rx) => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &broadcaster, limit.as_ref()).await?;
                }
            }
        }

        info!("listener stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// Resolves once the stop flag is set. The watch guard is dropped here so the
/// accept loop future stays `Send`.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    // The sender lives in `run_until` for the whole loop, so this cannot fail.
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

async fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    broadcaster: &Broadcaster,
    limit: Option<&Arc<Semaphore>>,
) -> Result<(), ServerError> {
    match result {
        Ok((stream, peer)) => {
            let permit = match limit {
                Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(%peer, "connection limit reached, dropping connection");
                        return Ok(());
                    }
                },
                None => None,
            };
            spawn_connection_handler(stream, peer, broadcaster, permit);
            Ok(())
        }
        Err(err) if is_fatal_accept_error(&err) => Err(ServerError::Accept(err)),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            Ok(())
        }
    }
}

/// Errors that mean the listening socket itself is gone, as opposed to one
/// failed handshake or a temporary resource shortage.
fn is_fatal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    ) || is_dead_socket_errno(err.raw_os_error())
}

// EBADF and ENOTSOCK carry no dedicated `ErrorKind`.
#[cfg(unix)]
fn is_dead_socket_errno(code: Option<i32>) -> bool {
    matches!(code, Some(libc::EBADF | libc::ENOTSOCK))
}

#[cfg(not(unix))]
fn is_dead_socket_errno(_code: Option<i32>) -> bool {
    false
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &Broadcaster,
    permit: Option<OwnedSemaphorePermit>,
) {
    let broadcaster = broadcaster.clone();
    tokio::spawn(async move {
        let (conn, reader) = Connection::from_stream(stream, peer);
        let end = ConnectionHandler::new(conn, reader, broadcaster).run().await;
        if let SessionEnd::Failed(err) = end {
            debug!(error = %err, "session ended with error");
        }
        drop(permit);
    });
}
