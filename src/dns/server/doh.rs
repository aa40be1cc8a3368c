//! DNS-over-HTTPS endpoint (RFC 8484)
//!
//! Plaintext HTTP bound to a loopback address; an external TLS terminator
//! provides the public `https://<host>/dns-query` face (the SNI relay routes
//! the gateway's own host name to that terminator).
//!
//! Routes:
//!
//! - `POST /dns-query` — the body is the wire query
//! - `GET /dns-query?dns=<base64url>` — URL-safe base64 without padding
//! - `GET /health` — liveness JSON
//! - `GET /metrics` — counter JSON (403 unless metrics are enabled)
//! - `GET /metrics/prometheus` — text exposition
//! - `POST /admin/reload` — bearer-gated configuration reload
//!
//! The query pipeline: client IP extraction (`X-Forwarded-For` first entry,
//! then `X-Real-IP`, then the peer) → access table (403) → bearer auth
//! (401) → global rate limit (429) → per-IP rate limit (429) → size cap
//! (413) → resolver (400 on failure) → 200 with hardening headers.

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::access::AccessTable;
use crate::config::ConfigStore;
use crate::dns::resolver::Resolver;
use crate::limit::{GlobalRateLimiter, IpRateLimiters};
use crate::metrics::GatewayMetrics;

/// DoH media type
const DOH_CONTENT_TYPE: &str = "application/dns-message";

/// Largest accepted DoH query
pub const MAX_DOH_QUERY_SIZE: usize = 4096;

/// DoH front-end
pub struct DohServer {
    resolver: Arc<Resolver>,
    config: Arc<ConfigStore>,
    access: Arc<AccessTable>,
    global_limit: Arc<GlobalRateLimiter>,
    ip_limits: Arc<IpRateLimiters>,
    metrics: Arc<GatewayMetrics>,
    started_at: Instant,
}

impl DohServer {
    /// Assemble the server
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<Resolver>,
        config: Arc<ConfigStore>,
        access: Arc<AccessTable>,
        global_limit: Arc<GlobalRateLimiter>,
        ip_limits: Arc<IpRateLimiters>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            resolver,
            config,
            access,
            global_limit,
            ip_limits,
            metrics,
            started_at: Instant::now(),
        }
    }

    /// Serve HTTP connections until shutdown is signalled
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?listener.local_addr().ok(), "DoH server started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("DoH server shutting down");
                    return;
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "DoH accept error");
                            continue;
                        }
                    };

                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req: Request<Incoming>| {
                            let this = Arc::clone(&this);
                            async move { Ok::<_, Infallible>(this.route(req, peer.ip()).await) }
                        });

                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!(client = %peer, error = %e, "DoH connection error");
                        }
                    });
                }
            }
        }
    }

    /// Dispatch a request by path
    async fn route<B>(&self, req: Request<B>, peer: IpAddr) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        match req.uri().path() {
            "/dns-query" => self.handle_dns_query(req, peer).await,
            "/health" => self.handle_health(),
            "/metrics" => self.handle_metrics(),
            "/metrics/prometheus" => self.handle_prometheus(),
            "/admin/reload" => self.handle_reload(req.headers()),
            _ => text_response(StatusCode::NOT_FOUND, "Unsupported path"),
        }
    }

    async fn handle_dns_query<B>(&self, req: Request<B>, peer: IpAddr) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        self.metrics.inc_doh_queries();
        let client_ip = client_ip(req.headers(), peer);
        let cfg = self.config.current();

        debug!(client = %client_ip, method = %req.method(), "DoH request");

        if cfg.user_management && !self.access.authorize(client_ip) {
            warn!(client = %client_ip, "DoH user not authorized");
            self.metrics.inc_errors();
            return text_response(
                StatusCode::FORBIDDEN,
                "Access denied - please register first",
            );
        }

        if !self.check_bearer(&cfg, req.headers()) {
            warn!(client = %client_ip, "DoH authentication failed");
            self.metrics.inc_errors();
            return text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }

        if !self.global_limit.allow() {
            warn!(client = %client_ip, "DoH global rate limit exceeded");
            self.metrics.inc_errors();
            return text_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        }

        if !self
            .ip_limits
            .allow(client_ip, cfg.rate_limit_per_ip, cfg.rate_limit_burst_ip)
        {
            warn!(client = %client_ip, "DoH per-IP rate limit exceeded");
            self.metrics.inc_errors();
            return text_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        }

        let method = req.method().clone();
        let query: Vec<u8> = if method == Method::GET {
            let Some(raw) = query_param(req.uri(), "dns") else {
                debug!(client = %client_ip, "DoH missing dns parameter");
                return text_response(StatusCode::BAD_REQUEST, "Missing 'dns' query parameter");
            };
            match URL_SAFE_NO_PAD.decode(raw.as_bytes()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(client = %client_ip, error = %e, "DoH invalid dns parameter");
                    self.metrics.inc_errors();
                    return text_response(StatusCode::BAD_REQUEST, "Invalid 'dns' query parameter");
                }
            }
        } else if method == Method::POST {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes().to_vec(),
                Err(e) => {
                    debug!(client = %client_ip, error = %e, "DoH body read failed");
                    return text_response(StatusCode::BAD_REQUEST, "Failed to read body");
                }
            };
            if body.is_empty() {
                debug!(client = %client_ip, "DoH empty request body");
                return text_response(StatusCode::BAD_REQUEST, "Empty request body");
            }
            body
        } else {
            return text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Only GET and POST methods are allowed",
            );
        };

        if query.len() > MAX_DOH_QUERY_SIZE {
            warn!(client = %client_ip, size = query.len(), "DoH query too large");
            self.metrics.inc_errors();
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "DNS query too large");
        }

        match self.resolver.resolve(&query).await {
            Ok(response) => {
                debug!(client = %client_ip, "DoH query completed");
                dns_response(&response)
            }
            Err(e) => {
                warn!(client = %client_ip, error = %e, "DoH query processing failed");
                self.metrics.inc_errors();
                text_response(StatusCode::BAD_REQUEST, "Failed to process DNS query")
            }
        }
    }

    fn handle_health(&self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "status": "healthy",
            "uptime": self.started_at.elapsed().as_secs_f64(),
            "version": env!("CARGO_PKG_VERSION"),
        });
        json_response(StatusCode::OK, &body)
    }

    fn handle_metrics(&self) -> Response<Full<Bytes>> {
        if !self.config.current().metrics_enabled {
            return text_response(StatusCode::FORBIDDEN, "Metrics disabled");
        }
        let snapshot = self.metrics.snapshot();
        json_response(
            StatusCode::OK,
            &serde_json::to_value(snapshot).unwrap_or_default(),
        )
    }

    fn handle_prometheus(&self) -> Response<Full<Bytes>> {
        if !self.config.current().metrics_enabled {
            return text_response(StatusCode::FORBIDDEN, "Metrics disabled");
        }
        let text = self.metrics.snapshot().to_prometheus();
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(text)))
            .unwrap_or_default()
    }

    fn handle_reload(&self, headers: &HeaderMap) -> Response<Full<Bytes>> {
        let cfg = self.config.current();
        if !self.check_bearer(&cfg, headers) {
            return text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }

        match self.config.reload() {
            Ok(()) => json_response(StatusCode::OK, &serde_json::json!({"status": "reloaded"})),
            Err(e) => {
                error!(error = %e, "failed to reload config");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Failed to reload: {e}"),
                )
            }
        }
    }

    /// Bearer-token check; always passes when auth is disabled
    fn check_bearer(&self, cfg: &crate::config::Config, headers: &HeaderMap) -> bool {
        if !cfg.enable_auth {
            return true;
        }

        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return false;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        value
            .strip_prefix("Bearer ")
            .is_some_and(|token| self.config.token_valid(token))
    }
}

impl std::fmt::Debug for DohServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohServer").finish_non_exhaustive()
    }
}

/// Client address: `X-Forwarded-For` first entry, then `X-Real-IP`, then peer
fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = xri.trim().parse::<IpAddr>() {
            return ip;
        }
    }

    peer
}

/// Extract one query-string parameter without percent-decoding.
///
/// Base64url values never need percent-encoding, so a plain split is enough
/// for the `dns` parameter.
fn query_param<'a>(uri: &'a Uri, name: &str) -> Option<&'a str> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap_or_default()
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

/// Successful DoH reply with the hardening header set
fn dns_response(wire: &[u8]) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, DOH_CONTENT_TYPE)
        .header("X-Content-Type-Options", "nosniff")
        .header("X-Frame-Options", "DENY")
        .header("X-XSS-Protection", "1; mode=block")
        .header("Referrer-Policy", "no-referrer")
        .body(Full::new(Bytes::copy_from_slice(wire)))
        .unwrap_or_default()
}
