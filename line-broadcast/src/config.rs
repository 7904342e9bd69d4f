use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::cli::ServeArgs;

pub const DEFAULT_PORT: u16 = 12345;

/// Startup settings for [`Server::bind`](crate::listener::Server::bind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// Port to listen on. `0` picks an ephemeral port.
    pub port: u16,
    /// Cap on simultaneous sessions. `None` accepts without limit.
    pub max_connections: Option<usize>,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: None,
        }
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_connections: args.max_connections,
        }
    }
}
