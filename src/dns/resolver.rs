//! Query resolution pipeline
//!
//! Every front-end funnels wire-format queries through one resolver:
//!
//! ```text
//! wire query
//!     │
//!     ▼
//! parse header + first question ── malformed ──▶ error
//!     │
//!     ▼
//! blocklist ── match ──▶ REFUSED reply (not cached)
//!     │
//!     ▼
//! response cache ── hit ──▶ cached bytes
//!     │ miss
//!     ▼
//! override map ── match ──▶ synthetic A/AAAA reply (cached)
//!     │ miss
//!     ▼
//! upstream DoH failover ──▶ upstream bytes (cached)
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use tracing::{debug, info};

use crate::config::{ConfigStore, DEFAULT_RECORD_TTL};
use crate::dns::cache::ResponseCache;
use crate::dns::error::{DnsError, DnsResult};
use crate::dns::upstream::DohUpstreams;
use crate::metrics::GatewayMetrics;

/// Block → cache → override → upstream resolver
pub struct Resolver {
    config: Arc<ConfigStore>,
    cache: Arc<ResponseCache>,
    upstreams: DohUpstreams,
    metrics: Arc<GatewayMetrics>,
}

impl Resolver {
    /// Assemble the pipeline
    #[must_use]
    pub fn new(
        config: Arc<ConfigStore>,
        cache: Arc<ResponseCache>,
        upstreams: DohUpstreams,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            config,
            cache,
            upstreams,
            metrics,
        }
    }

    /// Resolve a wire-format query into a wire-format response.
    ///
    /// # Errors
    ///
    /// - `DnsError::ParseError` / `InvalidQuery` for malformed input;
    /// - `DnsError::AllUpstreamsFailed` when no upstream could answer.
    pub async fn resolve(&self, wire: &[u8]) -> DnsResult<Vec<u8>> {
        let req = Message::from_vec(wire).map_err(|e| DnsError::parse(e.to_string()))?;

        let Some(question) = req.queries().first() else {
            return Err(DnsError::invalid_query("no DNS question"));
        };

        let qname = question
            .name()
            .to_string()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let qtype = question.query_type();

        debug!(domain = %qname, qtype = %qtype, "processing DNS query");

        let cfg = self.config.current();

        if cfg.is_blocked(&qname) {
            info!(domain = %qname, "blocked domain query");
            self.metrics.inc_errors();
            return build_refused(&req);
        }

        if let Some(cached) = self.cache.lookup(wire) {
            debug!(domain = %qname, "returning cached response");
            return Ok(cached);
        }

        if let Some(ip) = cfg.find_override(&qname) {
            debug!(domain = %qname, %ip, "local override match");
            let response = build_override_response(&req, ip)?;
            self.cache.insert(wire, &response, cfg.cache_ttl());
            return Ok(response);
        }

        match self.upstreams.query(&cfg.upstream_doh, wire).await {
            Ok(response) => {
                self.cache.insert(wire, &response, cfg.cache_ttl());
                Ok(response)
            }
            Err(e) => {
                self.metrics.inc_errors();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Start a reply from the request: same ID and question, recursion available
fn reply_skeleton(req: &Message) -> Message {
    let mut resp = Message::new();
    resp.set_id(req.id());
    resp.set_message_type(MessageType::Response);
    resp.set_op_code(req.op_code());
    resp.set_recursion_desired(req.recursion_desired());
    resp.set_recursion_available(true);
    resp.set_response_code(ResponseCode::NoError);
    for query in req.queries() {
        resp.add_query(query.clone());
    }
    resp
}

/// Build a REFUSED reply for a blocked name
fn build_refused(req: &Message) -> DnsResult<Vec<u8>> {
    let mut resp = reply_skeleton(req);
    resp.set_response_code(ResponseCode::Refused);
    resp.to_vec().map_err(|e| DnsError::serialize(e.to_string()))
}

/// Build the synthetic reply for an override match.
///
/// The answer section carries at most one record: an A record when an
/// A-query meets an IPv4 override, an AAAA record when an AAAA-query meets
/// an IPv6 override, the family-matching record for an ANY-query, and
/// nothing (NODATA) for every other combination.
fn build_override_response(req: &Message, ip: IpAddr) -> DnsResult<Vec<u8>> {
    let mut resp = reply_skeleton(req);

    let question = &req.queries()[0];
    let name = question.name().clone();

    match question.query_type() {
        RecordType::A => {
            if let IpAddr::V4(v4) = ip {
                resp.add_answer(Record::from_rdata(name, DEFAULT_RECORD_TTL, RData::A(A(v4))));
            }
        }
        RecordType::AAAA => {
            if let IpAddr::V6(v6) = ip {
                resp.add_answer(Record::from_rdata(
                    name,
                    DEFAULT_RECORD_TTL,
                    RData::AAAA(AAAA(v6)),
                ));
            }
        }
        RecordType::ANY => match ip {
            IpAddr::V4(v4) => {
                resp.add_answer(Record::from_rdata(name, DEFAULT_RECORD_TTL, RData::A(A(v4))));
            }
            IpAddr::V6(v6) => {
                resp.add_answer(Record::from_rdata(
                    name,
                    DEFAULT_RECORD_TTL,
                    RData::AAAA(AAAA(v6)),
                ));
            }
        },
        // NOERROR with an empty answer section for every other qtype
        _ => {}
    }

    resp.to_vec().map_err(|e| DnsError::serialize(e.to_string()))
}
