//! Bidirectional copy between two TCP streams
//!
//! A single future drives both directions of a spliced connection. Each
//! direction half-closes the write side of its destination when its source
//! reaches EOF, and the future resolves only once both directions have
//! finished, so a server can keep streaming after the client stops sending
//! (and vice versa).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use super::buffer::PooledBuffer;

/// Result of a bidirectional copy operation
#[derive(Debug, Clone, Copy)]
pub struct CopyResult {
    /// Bytes transferred from client to backend
    pub client_to_backend: u64,
    /// Bytes transferred from backend to client
    pub backend_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_backend + self.backend_to_client
    }
}

/// Bidirectional copy state machine
struct BidirectionalCopy<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    a: &'a mut A,
    b: &'a mut B,
    a_to_b: TransferState,
    b_to_a: TransferState,
}

/// State for one direction of transfer
struct TransferState {
    buf: PooledBuffer,
    read_done: bool,
    write_done: bool,
    pos: usize,
    cap: usize,
    bytes_transferred: u64,
}

impl TransferState {
    fn new(buf: PooledBuffer) -> Self {
        Self {
            buf,
            read_done: false,
            write_done: false,
            pos: 0,
            cap: 0,
            bytes_transferred: 0,
        }
    }

    fn poll_transfer<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            // Drain buffered data into the writer first
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes_transferred += n as u64;

                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                // Source hit EOF: flush and half-close the destination.
                if !self.write_done {
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.write_done = true;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

impl<'a, A, B> BidirectionalCopy<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    fn new(a: &'a mut A, b: &'a mut B, buf_a: PooledBuffer, buf_b: PooledBuffer) -> Self {
        Self {
            a,
            b,
            a_to_b: TransferState::new(buf_a),
            b_to_a: TransferState::new(buf_b),
        }
    }
}

impl<A, B> std::future::Future for BidirectionalCopy<'_, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    type Output = io::Result<CopyResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let a_to_b_done = match this
            .a_to_b
            .poll_transfer(cx, Pin::new(&mut this.a), Pin::new(&mut this.b))
        {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => {
                debug!("client->backend transfer error: {}", e);
                true
            }
            Poll::Pending => false,
        };

        let b_to_a_done = match this
            .b_to_a
            .poll_transfer(cx, Pin::new(&mut this.b), Pin::new(&mut this.a))
        {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => {
                debug!("backend->client transfer error: {}", e);
                true
            }
            Poll::Pending => false,
        };

        if a_to_b_done && b_to_a_done {
            Poll::Ready(Ok(CopyResult {
                client_to_backend: this.a_to_b.bytes_transferred,
                backend_to_client: this.b_to_a.bytes_transferred,
            }))
        } else {
            Poll::Pending
        }
    }
}

/// Copy data in both directions until both reach EOF.
///
/// `buf_a` carries a→b traffic, `buf_b` carries b→a traffic; both come from
/// the splice pool and return to it when the copy resolves.
pub async fn bidirectional_copy<A, B>(
    a: &mut A,
    b: &mut B,
    buf_a: PooledBuffer,
    buf_b: PooledBuffer,
) -> io::Result<CopyResult>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    BidirectionalCopy::new(a, b, buf_a, buf_b).await
}
