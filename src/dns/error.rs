//! Error types for the DNS engine
//!
//! A single [`DnsError`] covers the whole resolution pipeline — parsing,
//! cache, overrides, and upstream failover — so front-ends can translate one
//! error value into their transport's idiom (HTTP status, silent drop,
//! connection close).

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the resolution pipeline and its front-ends
#[derive(Debug, Error)]
pub enum DnsError {
    /// A DNS message could not be decoded
    #[error("failed to parse DNS message: {reason}")]
    ParseError {
        /// What went wrong during parsing
        reason: String,
    },

    /// A DNS message could not be encoded
    #[error("failed to serialize DNS message: {reason}")]
    SerializeError {
        /// What went wrong during serialization
        reason: String,
    },

    /// Socket-level failure
    #[error("network error: {reason}")]
    NetworkError {
        /// Description of the failure
        reason: String,
        /// Underlying I/O error, if any
        #[source]
        source: Option<io::Error>,
    },

    /// An operation exceeded its deadline
    #[error("timed out after {timeout:?}: {context}")]
    TimeoutError {
        /// What timed out
        context: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// An upstream DoH server failed or answered with a non-200 status
    #[error("upstream error ({upstream}): {reason}")]
    UpstreamError {
        /// The upstream URL
        upstream: String,
        /// Description of the failure
        reason: String,
    },

    /// Every configured upstream failed; wraps the last error seen
    #[error("all upstream servers failed, last error: {last}")]
    AllUpstreamsFailed {
        /// The error from the final upstream attempt
        #[source]
        last: Box<DnsError>,
    },

    /// The client's query is malformed (e.g. empty question section)
    #[error("invalid DNS query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected
        reason: String,
    },

    /// Wire framing violated the protocol (bad length prefix, oversize)
    #[error("invalid framing: {reason}")]
    Framing {
        /// Why the frame was rejected
        reason: String,
    },

    /// Unexpected internal failure
    #[error("internal DNS error: {reason}")]
    Internal {
        /// Description of the failure
        reason: String,
    },
}

impl DnsError {
    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::SerializeError {
            reason: reason.into(),
        }
    }

    /// Create a network error
    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkError {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, timeout: Duration) -> Self {
        Self::TimeoutError {
            context: context.into(),
            timeout,
        }
    }

    /// Create an upstream error
    pub fn upstream(upstream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamError {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// Wrap the last failure after exhausting every upstream
    #[must_use]
    pub fn all_upstreams_failed(last: DnsError) -> Self {
        Self::AllUpstreamsFailed { last: Box::new(last) }
    }

    /// Create an invalid-query error
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create a framing error
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::Framing {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether this is a client-input problem (vs. a server-side failure)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. } | Self::InvalidQuery { .. } | Self::Framing { .. }
        )
    }

    /// Whether the error came from the upstream path
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamError { .. } | Self::AllUpstreamsFailed { .. }
        )
    }

    /// Whether this is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError { .. })
    }
}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        Self::NetworkError {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

/// Result alias for DNS operations
pub type DnsResult<T> = std::result::Result<T, DnsError>;
