//! I/O utilities for the SNI relay
//!
//! - [`buffer`]: pooled 16 KiB slabs for the splice pumps
//! - [`copy`]: bidirectional copy with per-direction half-close

pub mod buffer;
pub mod copy;

pub use buffer::{BufferPool, PooledBuffer, SPLICE_BUFFER_SIZE};
pub use copy::{bidirectional_copy, CopyResult};
