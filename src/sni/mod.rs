//! Transparent TLS SNI relay
//!
//! A layer-4 splicer on the public TLS port: the ClientHello is captured and
//! parsed just far enough to read the Server Name Indication, a backend is
//! chosen from the name, the captured bytes are replayed verbatim, and the
//! two sockets are spliced until both sides finish. No TLS is ever
//! terminated on this path.
//!
//! - [`peek`]: ClientHello capture and SNI extraction
//! - [`proxy`]: routing, backend dial, replay, bidirectional splice

pub mod peek;
pub mod proxy;

pub use peek::{peek_client_hello, PeekedHello};
pub use proxy::SniProxy;

use std::io;
use std::time::Duration;

use thiserror::Error;

/// SNI relay errors
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The ClientHello could not be captured or parsed
    #[error("ClientHello peek failed: {reason}")]
    Peek {
        /// What went wrong
        reason: String,
    },

    /// Connecting to the chosen backend failed
    #[error("backend dial failed ({target}): {source}")]
    Dial {
        /// The dial target
        target: String,
        /// The underlying failure
        #[source]
        source: io::Error,
    },

    /// Replaying the captured ClientHello to the backend failed
    #[error("failed to replay ClientHello: {0}")]
    Replay(#[source] io::Error),

    /// An operation exceeded its deadline
    #[error("timed out after {timeout:?}: {context}")]
    Timeout {
        /// What timed out
        context: String,
        /// The exceeded deadline
        timeout: Duration,
    },

    /// Other socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Create a peek error
    pub fn peek(reason: impl Into<String>) -> Self {
        Self::Peek {
            reason: reason.into(),
        }
    }

    /// Create a dial error
    pub fn dial(target: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            target: target.into(),
            source,
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            timeout,
        }
    }
}
