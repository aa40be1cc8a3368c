//! Upstream DNS-over-HTTPS client
//!
//! Queries are forwarded to the configured upstream DoH URLs with ordered
//! failover: each URL is tried in turn with an HTTP POST carrying the raw
//! wire query, and the first HTTP 200 wins. Only after every upstream has
//! failed does the resolver see an error, wrapping the last failure.
//!
//! The HTTP mechanics live behind the [`UpstreamTransport`] trait so the
//! failover logic is testable without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dns::error::{DnsError, DnsResult};

/// DoH media type for requests and responses
const DOH_CONTENT_TYPE: &str = "application/dns-message";

/// Overall deadline for one upstream attempt (connect + request + body)
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(4);

/// Upper bound on an upstream response body
pub const MAX_RESPONSE_SIZE: usize = 65_535;

/// One HTTP exchange with a single upstream URL
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// POST `query` to `url` and return the response body bytes
    async fn exchange(&self, url: &str, query: &[u8]) -> DnsResult<Vec<u8>>;
}

/// Production transport: hyper client over rustls with webpki roots
pub struct HttpsTransport {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpsTransport {
    /// Build the shared HTTPS client
    #[must_use]
    pub fn new() -> Self {
        crate::tls::init_crypto();

        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_only()
            .enable_all_versions()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);

        Self { client }
    }
}

impl Default for HttpsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamTransport for HttpsTransport {
    async fn exchange(&self, url: &str, query: &[u8]) -> DnsResult<Vec<u8>> {
        let uri: Uri = url
            .parse()
            .map_err(|e| DnsError::upstream(url, format!("invalid URL: {e}")))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, DOH_CONTENT_TYPE)
            .header(header::ACCEPT, DOH_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, query.len())
            .header(header::USER_AGENT, concat!("sni-gateway/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::copy_from_slice(query)))
            .map_err(|e| DnsError::internal(format!("failed to build upstream request: {e}")))?;

        // One deadline covers the request and the body read.
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| DnsError::upstream(url, format!("request failed: {e}")))?;

            let status = response.status();
            if status != http::StatusCode::OK {
                return Err(DnsError::upstream(url, format!("HTTP status {status}")));
            }

            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| DnsError::upstream(url, format!("failed to read body: {e}")))?
                .to_bytes();

            if body.len() > MAX_RESPONSE_SIZE {
                return Err(DnsError::upstream(
                    url,
                    format!("response too large: {} bytes", body.len()),
                ));
            }

            Ok(body.to_vec())
        };

        timeout(UPSTREAM_TIMEOUT, exchange)
            .await
            .map_err(|_| DnsError::timeout(format!("DoH request to {url}"), UPSTREAM_TIMEOUT))?
    }
}

/// Ordered-failover DoH client
pub struct DohUpstreams {
    transport: Arc<dyn UpstreamTransport>,
}

impl DohUpstreams {
    /// Create the production client
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: Arc::new(HttpsTransport::new()),
        }
    }

    /// Create a client over a custom transport (used by tests)
    #[must_use]
    pub fn with_transport(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self { transport }
    }

    /// Try each URL in order; return the first success.
    ///
    /// # Errors
    ///
    /// `DnsError::AllUpstreamsFailed` wrapping the last per-upstream error,
    /// or an internal error when the URL list is empty.
    pub async fn query(&self, urls: &[String], wire: &[u8]) -> DnsResult<Vec<u8>> {
        let mut last_err: Option<DnsError> = None;

        for url in urls {
            match self.transport.exchange(url, wire).await {
                Ok(response) => {
                    debug!(upstream = %url, "upstream query succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(upstream = %url, error = %e, "upstream query failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(last) => Err(DnsError::all_upstreams_failed(last)),
            None => Err(DnsError::internal("no upstream servers configured")),
        }
    }
}

impl Default for DohUpstreams {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DohUpstreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohUpstreams").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport: maps URLs to canned outcomes and counts calls
    pub(crate) struct StubTransport {
        pub responses: Vec<(String, DnsResult<Vec<u8>>)>,
        pub calls: AtomicUsize,
    }

    impl StubTransport {
        pub fn new(responses: Vec<(String, DnsResult<Vec<u8>>)>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamTransport for StubTransport {
        async fn exchange(&self, url: &str, _query: &[u8]) -> DnsResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for (stub_url, outcome) in &self.responses {
                if stub_url == url {
                    return match outcome {
                        Ok(bytes) => Ok(bytes.clone()),
                        Err(_) => Err(DnsError::upstream(url, "stubbed failure")),
                    };
                }
            }
            Err(DnsError::upstream(url, "unknown stub url"))
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_upstream_wins() {
        let stub = Arc::new(StubTransport::new(vec![
            ("https://u1/dns-query".into(), Ok(b"r1".to_vec())),
            ("https://u2/dns-query".into(), Ok(b"r2".to_vec())),
        ]));
        let client = DohUpstreams::with_transport(Arc::clone(&stub) as _);

        let got = client
            .query(&urls(&["https://u1/dns-query", "https://u2/dns-query"]), b"q")
            .await
            .unwrap();
        assert_eq!(got, b"r1".to_vec());
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failover_to_second() {
        let stub = Arc::new(StubTransport::new(vec![
            ("https://u1/dns-query".into(), Err(DnsError::network("down"))),
            ("https://u2/dns-query".into(), Ok(b"r2".to_vec())),
        ]));
        let client = DohUpstreams::with_transport(Arc::clone(&stub) as _);

        let got = client
            .query(&urls(&["https://u1/dns-query", "https://u2/dns-query"]), b"q")
            .await
            .unwrap();
        assert_eq!(got, b"r2".to_vec());
        assert_eq!(stub.call_count(), 2);
    }

    #[tokio::test]
    async fn test_all_upstreams_failed() {
        let stub = Arc::new(StubTransport::new(vec![
            ("https://u1/dns-query".into(), Err(DnsError::network("down"))),
            ("https://u2/dns-query".into(), Err(DnsError::network("down"))),
        ]));
        let client = DohUpstreams::with_transport(stub as _);

        let err = client
            .query(&urls(&["https://u1/dns-query", "https://u2/dns-query"]), b"q")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::AllUpstreamsFailed { .. }));
        assert!(err.to_string().contains("all upstream servers failed"));
    }

    #[tokio::test]
    async fn test_empty_upstream_list() {
        let stub = Arc::new(StubTransport::new(vec![]));
        let client = DohUpstreams::with_transport(stub as _);
        let err = client.query(&[], b"q").await.unwrap_err();
        assert!(matches!(err, DnsError::Internal { .. }));
    }
}
