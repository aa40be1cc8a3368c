//! TCP DNS listener (port 53)
//!
//! Standard RFC 1035 framing: a 2-byte big-endian length prefix before each
//! message. One query is served per connection, then the connection closes.
//! Like the UDP path, port 53 applies neither authorization nor rate limits.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{read_frame, write_frame, MAX_TCP_MESSAGE_SIZE};
use crate::dns::resolver::Resolver;

/// TCP front-end
pub struct TcpDnsServer {
    resolver: Arc<Resolver>,
}

impl TcpDnsServer {
    /// Create the server around the shared resolver
    #[must_use]
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Accept connections until shutdown is signalled
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?listener.local_addr().ok(), "TCP DNS server started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("TCP DNS server shutting down");
                    return;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "TCP DNS accept error");
                            continue;
                        }
                    };

                    let resolver = Arc::clone(&self.resolver);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &resolver).await {
                            debug!(client = %peer, error = %e, "TCP DNS connection failed");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    resolver: &Resolver,
) -> crate::dns::error::DnsResult<()> {
    let query = read_frame(&mut stream, MAX_TCP_MESSAGE_SIZE).await?;
    let response = resolver.resolve(&query).await?;
    write_frame(&mut stream, &response).await
}
