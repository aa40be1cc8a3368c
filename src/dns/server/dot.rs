//! DNS-over-TLS listener (port 853, RFC 7858)
//!
//! TLS 1.2+ with the restricted cipher list from [`crate::tls`]; the inner
//! framing is identical to DNS-over-TCP. Each accepted connection runs:
//!
//! 1. authorize the client IP (silent drop on failure),
//! 2. check the global rate limiter (drop on deny),
//! 3. TLS handshake and one framed query under a 10 s read deadline
//!    (length 0 or above 8192 rejected),
//! 4. resolve,
//! 5. framed response under a 10 s write deadline.
//!
//! A panic inside a handler is caught by the connection wrapper task, logged
//! and counted; the process stays up.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use super::{read_frame, write_frame, MAX_DOT_MESSAGE_SIZE};
use crate::access::AccessTable;
use crate::config::ConfigStore;
use crate::dns::error::{DnsError, DnsResult};
use crate::dns::resolver::Resolver;
use crate::limit::GlobalRateLimiter;
use crate::metrics::GatewayMetrics;

/// Deadline for the TLS handshake plus query read
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for writing the response
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// DoT front-end
pub struct DotServer {
    resolver: Arc<Resolver>,
    config: Arc<ConfigStore>,
    access: Arc<AccessTable>,
    global_limit: Arc<GlobalRateLimiter>,
    metrics: Arc<GatewayMetrics>,
}

impl DotServer {
    /// Assemble the server
    #[must_use]
    pub fn new(
        resolver: Arc<Resolver>,
        config: Arc<ConfigStore>,
        access: Arc<AccessTable>,
        global_limit: Arc<GlobalRateLimiter>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            resolver,
            config,
            access,
            global_limit,
            metrics,
        }
    }

    /// Accept TLS connections until shutdown is signalled
    pub async fn run(
        self,
        listener: TcpListener,
        acceptor: TlsAcceptor,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(addr = ?listener.local_addr().ok(), "DoT server started");
        let this = Arc::new(self);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("DoT server shutting down");
                    return;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "DoT accept error");
                            continue;
                        }
                    };

                    let this = Arc::clone(&this);
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        // The inner task does the work; awaiting its handle
                        // here contains panics to the one connection.
                        let worker = tokio::spawn({
                            let this = Arc::clone(&this);
                            async move { this.handle_connection(stream, acceptor, peer).await }
                        });
                        match worker.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(client = %peer, error = %e, "DoT connection failed");
                                this.metrics.inc_errors();
                            }
                            Err(join_err) if join_err.is_panic() => {
                                error!(client = %peer, panic = ?join_err, "panic in DoT handler");
                                this.metrics.inc_errors();
                            }
                            Err(_) => {}
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        acceptor: TlsAcceptor,
        peer: std::net::SocketAddr,
    ) -> DnsResult<()> {
        self.metrics.inc_dot_queries();
        debug!(client = %peer, "DoT connection");

        let cfg = self.config.current();
        if cfg.user_management && !self.access.authorize(peer.ip()) {
            warn!(client = %peer.ip(), "DoT user not authorized");
            return Err(DnsError::invalid_query("client not authorized"));
        }

        if !self.global_limit.allow() {
            warn!(client = %peer, "DoT global rate limit exceeded");
            return Err(DnsError::invalid_query("rate limit exceeded"));
        }

        // Handshake and query read share the read deadline.
        let (mut tls, query) = timeout(READ_TIMEOUT, async {
            let mut tls = acceptor.accept(stream).await?;
            let query = read_frame(&mut tls, MAX_DOT_MESSAGE_SIZE).await?;
            Ok::<_, DnsError>((tls, query))
        })
        .await
        .map_err(|_| DnsError::timeout("DoT query read", READ_TIMEOUT))??;

        let response = self.resolver.resolve(&query).await?;

        timeout(WRITE_TIMEOUT, write_frame(&mut tls, &response))
            .await
            .map_err(|_| DnsError::timeout("DoT response write", WRITE_TIMEOUT))??;

        debug!(client = %peer, "DoT query completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::dns::cache::ResponseCache;
    use crate::dns::upstream::{tests::StubTransport, DohUpstreams};

    fn test_server(user_management: bool) -> DotServer {
        let mut config = Config::default_config();
        config.domains.clear();
        config.domains.insert("example.com".into(), "10.0.0.1".into());
        config.user_management = user_management;
        let metrics = Arc::new(GatewayMetrics::new());
        let store = Arc::new(ConfigStore::new(config, "/tmp/unused.json"));
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&store),
            Arc::new(ResponseCache::new(Arc::clone(&metrics))),
            DohUpstreams::with_transport(Arc::new(StubTransport::new(vec![])) as _),
            Arc::clone(&metrics),
        ));
        DotServer::new(
            resolver,
            store,
            Arc::new(AccessTable::new()),
            Arc::new(GlobalRateLimiter::new()),
            metrics,
        )
    }

    #[test]
    fn test_unauthorized_ip_is_rejected() {
        // With user management on and no registered users, authorization
        // fails for any address; with it off the table is not consulted.
        let server = test_server(true);
        assert!(server.config.current().user_management);
        assert!(!server.access.authorize("203.0.113.7".parse().unwrap()));

        let open = test_server(false);
        assert!(!open.config.current().user_management);
    }

    #[test]
    fn test_limits_are_shared_per_server() {
        let server = test_server(false);
        // Drain the global bucket; the next check is denied.
        while server.global_limit.allow() {}
        assert!(!server.global_limit.allow());
    }
}
