//! SNI relay listener: peek, route, dial, replay, splice
//!
//! Per accepted connection:
//!
//! - **peek**: capture the ClientHello under a 5 s read deadline;
//! - **route**: lowercase and trim the SNI. No SNI → a fixed HTTP 421 reply
//!   and close. The gateway's own host name → the loopback HTTPS front
//!   (`127.0.0.1:8443`). Anything else → `<sni>:443`;
//! - **dial**: TCP connect with a 5 s deadline and 30 s keepalive;
//! - **replay**: write the captured bytes to the backend verbatim;
//! - **splice**: pump bytes both ways with pooled 16 KiB buffers, each
//!   direction half-closing its destination on EOF, then drop both sockets.

use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::peek::peek_client_hello;
use super::ProxyError;
use crate::config::ConfigStore;
use crate::io::{bidirectional_copy, BufferPool};
use crate::metrics::GatewayMetrics;

/// Deadline for capturing the ClientHello
pub const PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the backend TCP connect
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Keepalive applied to backend connections
pub const BACKEND_KEEPALIVE: Duration = Duration::from_secs(30);

/// Default loopback target for connections addressed to the gateway itself
pub const SELF_TARGET: &str = "127.0.0.1:8443";

/// Fixed reply for connections that announce no SNI
const MISDIRECTED_REPLY: &[u8] = b"HTTP/1.1 421 Misdirected Request\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Connection: close\r\n\
Content-Length: 12\r\n\r\nSNI required";

/// The SNI relay
pub struct SniProxy {
    config: Arc<ConfigStore>,
    metrics: Arc<GatewayMetrics>,
    pool: Arc<BufferPool>,
    self_target: String,
}

impl SniProxy {
    /// Create the relay with the standard loopback self-route
    #[must_use]
    pub fn new(config: Arc<ConfigStore>, metrics: Arc<GatewayMetrics>) -> Self {
        Self::with_self_target(config, metrics, SELF_TARGET)
    }

    /// Create the relay with an explicit self-route target (used by tests)
    #[must_use]
    pub fn with_self_target(
        config: Arc<ConfigStore>,
        metrics: Arc<GatewayMetrics>,
        self_target: impl Into<String>,
    ) -> Self {
        Self {
            config,
            metrics,
            pool: Arc::new(BufferPool::splice_pool()),
            self_target: self_target.into(),
        }
    }

    /// Pick the dial target for a normalized SNI value
    #[must_use]
    pub fn route(&self, sni: &str) -> String {
        let cfg = self.config.current();
        if sni == cfg.host.to_ascii_lowercase() {
            debug!(sni, "routing to local HTTPS front");
            self.self_target.clone()
        } else {
            format!("{sni}:443")
        }
    }

    /// Accept connections until shutdown is signalled
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?listener.local_addr().ok(), "SNI relay started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("SNI relay shutting down");
                    return;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "SNI accept error");
                            continue;
                        }
                    };

                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let worker = tokio::spawn({
                            let this = Arc::clone(&this);
                            async move { this.handle_connection(stream, peer).await }
                        });
                        match worker.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(client = %peer, error = %e, "SNI connection failed");
                                this.metrics.inc_errors();
                            }
                            Err(join_err) if join_err.is_panic() => {
                                error!(client = %peer, panic = ?join_err, "panic in SNI handler");
                                this.metrics.inc_errors();
                            }
                            Err(_) => {}
                        }
                    });
                }
            }
        }
    }

    /// Drive one client connection through peek → route → dial → replay → splice
    pub async fn handle_connection(
        &self,
        mut client: TcpStream,
        peer: std::net::SocketAddr,
    ) -> Result<(), ProxyError> {
        self.metrics.inc_sni_connections();
        debug!(client = %peer, "SNI connection");

        // The deadline covers only the initial ClientHello capture.
        let hello = timeout(PEEK_TIMEOUT, peek_client_hello(&mut client))
            .await
            .map_err(|_| ProxyError::timeout("SNI peek", PEEK_TIMEOUT))??;

        let sni = hello
            .server_name
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if sni.is_empty() {
            warn!(client = %peer, "SNI missing from ClientHello");
            self.metrics.inc_errors();
            let _ = client.write_all(MISDIRECTED_REPLY).await;
            return Ok(());
        }

        debug!(client = %peer, sni = %sni, "SNI detected");

        let target = self.route(&sni);
        let mut backend = timeout(DIAL_TIMEOUT, TcpStream::connect(&target))
            .await
            .map_err(|_| ProxyError::timeout(format!("dial {target}"), DIAL_TIMEOUT))?
            .map_err(|e| ProxyError::dial(&target, e))?;

        let keepalive = TcpKeepalive::new().with_time(BACKEND_KEEPALIVE);
        if let Err(e) = SockRef::from(&backend).set_tcp_keepalive(&keepalive) {
            debug!(error = %e, "failed to set backend keepalive");
        }

        backend
            .write_all(&hello.bytes)
            .await
            .map_err(ProxyError::Replay)?;

        debug!(client = %peer, sni = %sni, target = %target, "proxying connection");

        let result = bidirectional_copy(
            &mut client,
            &mut backend,
            self.pool.get(),
            self.pool.get(),
        )
        .await?;

        debug!(
            client = %peer,
            sni = %sni,
            up = result.client_to_backend,
            down = result.backend_to_client,
            "SNI connection closed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SniProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniProxy")
            .field("self_target", &self.self_target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sni::peek::tests::build_client_hello;
    use tokio::io::AsyncReadExt;

    fn proxy_with_host(host: &str, self_target: &str) -> Arc<SniProxy> {
        let mut config = Config::default_config();
        config.host = host.into();
        Arc::new(SniProxy::with_self_target(
            Arc::new(ConfigStore::new(config, "/tmp/unused.json")),
            Arc::new(GatewayMetrics::new()),
            self_target,
        ))
    }

    #[tokio::test]
    async fn test_route_mapping() {
        let proxy = proxy_with_host("dns.example.com", "127.0.0.1:8443");
        assert_eq!(proxy.route("dns.example.com"), "127.0.0.1:8443");
        assert_eq!(proxy.route("foo.test"), "foo.test:443");
        assert_eq!(proxy.route("other.example.com"), "other.example.com:443");
    }

    /// A ClientHello plus trailing bytes must reach the backend verbatim,
    /// and the backend's reply must be piped back to the client.
    #[tokio::test]
    async fn test_splice_replays_hello_and_pipes_backend_reply() {
        // Fake backend that records what it receives and answers.
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();

        let hello = build_client_hello("gw.test");
        let expected = {
            let mut v = hello.clone();
            v.extend_from_slice(b"EXTRA-BYTES");
            v
        };
        let expected_len = expected.len();

        let backend = tokio::spawn(async move {
            let (mut sock, _) = backend_listener.accept().await.unwrap();
            let mut received = vec![0u8; expected_len];
            sock.read_exact(&mut received).await.unwrap();
            sock.write_all(b"BACKEND-REPLY").await.unwrap();
            sock.shutdown().await.unwrap();
            received
        });

        // Route the gateway's own name at the fake backend.
        let proxy = proxy_with_host("gw.test", &backend_addr.to_string());

        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay_listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, peer) = relay_listener.accept().await.unwrap();
            proxy.handle_connection(stream, peer).await
        });

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(&hello).await.unwrap();
        client.write_all(b"EXTRA-BYTES").await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(&reply, b"BACKEND-REPLY");

        assert_eq!(backend.await.unwrap(), expected);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_empty_sni_gets_421() {
        let proxy = proxy_with_host("gw.test", "127.0.0.1:1");

        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay_listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, peer) = relay_listener.accept().await.unwrap();
            proxy.handle_connection(stream, peer).await
        });

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(&build_client_hello("")).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        let text = String::from_utf8_lossy(&reply);
        assert!(text.starts_with("HTTP/1.1 421 Misdirected Request"));
        assert!(text.ends_with("SNI required"));

        // The handler treats this as handled, not as an error result.
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_tls_client_is_dropped() {
        let proxy = proxy_with_host("gw.test", "127.0.0.1:1");

        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay_listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, peer) = relay_listener.accept().await.unwrap();
            proxy.handle_connection(stream, peer).await
        });

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let err = relay.await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::Peek { .. }));

        // The client gets no reply bytes, just a close.
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_dial_error() {
        // Port 1 on loopback is closed; dial errors out quickly.
        let proxy = proxy_with_host("gw.test", "127.0.0.1:1");

        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay_listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (stream, peer) = relay_listener.accept().await.unwrap();
            proxy.handle_connection(stream, peer).await
        });

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(&build_client_hello("gw.test")).await.unwrap();

        let err = relay.await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::Dial { .. } | ProxyError::Timeout { .. }));
    }
}
