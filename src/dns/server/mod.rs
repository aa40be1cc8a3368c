//! DNS protocol front-ends
//!
//! Three transports feed the shared resolver:
//!
//! - [`udp`] / [`tcp`]: cleartext DNS on port 53 (RFC 1035 framing)
//! - [`dot`]: DNS over TLS on port 853 (RFC 7858)
//! - [`doh`]: DNS over HTTPS on a loopback port (RFC 8484), fronted by an
//!   external TLS terminator
//!
//! TCP and DoT share the 2-byte big-endian length framing implemented here.

pub mod doh;
pub mod dot;
pub mod tcp;
pub mod udp;

pub use doh::DohServer;
pub use dot::DotServer;
pub use tcp::TcpDnsServer;
pub use udp::UdpDnsServer;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dns::error::{DnsError, DnsResult};

/// Largest DNS message accepted on the plain TCP transport
pub const MAX_TCP_MESSAGE_SIZE: usize = 65_535;

/// Largest DNS message accepted on the DoT transport
pub const MAX_DOT_MESSAGE_SIZE: usize = 8192;

/// Read one length-prefixed DNS message.
///
/// Rejects zero-length frames and frames larger than `max`.
pub(crate) async fn read_frame<S>(stream: &mut S, max: usize) -> DnsResult<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let len = usize::from(u16::from_be_bytes(header));

    if len == 0 || len > max {
        return Err(DnsError::framing(format!("invalid message length {len}")));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed DNS message
pub(crate) async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> DnsResult<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len())
        .map_err(|_| DnsError::framing(format!("response too large: {} bytes", payload.len())))?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"hello dns").await.unwrap();
        let got = read_frame(&mut server, MAX_TCP_MESSAGE_SIZE).await.unwrap();
        assert_eq!(got, b"hello dns".to_vec());
    }

    #[tokio::test]
    async fn test_zero_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8, 0u8])
            .await
            .unwrap();

        let err = read_frame(&mut server, MAX_DOT_MESSAGE_SIZE).await.unwrap_err();
        assert!(matches!(err, DnsError::Framing { .. }));
    }

    #[tokio::test]
    async fn test_oversize_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Announce 8193 bytes against the DoT cap of 8192.
        tokio::io::AsyncWriteExt::write_all(&mut client, &0x2001u16.to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server, MAX_DOT_MESSAGE_SIZE).await.unwrap_err();
        assert!(matches!(err, DnsError::Framing { .. }));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8, 5u8, b'a'])
            .await
            .unwrap();
        drop(client);

        let err = read_frame(&mut server, MAX_DOT_MESSAGE_SIZE).await.unwrap_err();
        assert!(matches!(err, DnsError::NetworkError { .. }));
    }
}
