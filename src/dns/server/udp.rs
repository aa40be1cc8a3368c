//! UDP DNS listener (port 53)
//!
//! One socket, one receive loop; every datagram is handed to its own task
//! which resolves the query and writes the reply back to the source address.
//! This transport is deliberately permissive: no authorization and no rate
//! limiting, matching the gateway's historical behaviour on port 53.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dns::resolver::Resolver;

/// Maximum cleartext UDP DNS payload
pub const MAX_UDP_MESSAGE_SIZE: usize = 512;

/// UDP front-end
pub struct UdpDnsServer {
    resolver: Arc<Resolver>,
}

impl UdpDnsServer {
    /// Create the server around the shared resolver
    #[must_use]
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Serve datagrams until shutdown is signalled
    pub async fn run(self, socket: UdpSocket, mut shutdown: broadcast::Receiver<()>) {
        let socket = Arc::new(socket);
        let mut buf = [0u8; MAX_UDP_MESSAGE_SIZE];

        info!(addr = ?socket.local_addr().ok(), "UDP DNS server started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("UDP DNS server shutting down");
                    return;
                }
                result = socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "UDP receive error");
                            continue;
                        }
                    };

                    let query = buf[..len].to_vec();
                    let resolver = Arc::clone(&self.resolver);
                    let socket = Arc::clone(&socket);

                    tokio::spawn(async move {
                        match resolver.resolve(&query).await {
                            Ok(response) => {
                                if let Err(e) = socket.send_to(&response, peer).await {
                                    debug!(client = %peer, error = %e, "UDP reply send failed");
                                }
                            }
                            Err(e) => {
                                debug!(client = %peer, error = %e, "UDP query failed");
                            }
                        }
                    });
                }
            }
        }
    }
}
