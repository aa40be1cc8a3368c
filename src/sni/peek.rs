//! ClientHello capture
//!
//! Bytes are read from the client into a capture buffer and fed to a
//! [`rustls::server::Acceptor`], which parses exactly as much of the
//! handshake as a server needs to see the ClientHello. Once it surfaces, the
//! server name is taken and the acceptor is discarded — the handshake is
//! never continued and no TLS state is kept.
//!
//! The capture buffer therefore contains the exact bytes the client sent so
//! far (at minimum the full ClientHello record), ready to be replayed
//! verbatim to whichever backend the relay picks.

use rustls::server::Acceptor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::ProxyError;

/// Upper bound on captured bytes before the ClientHello completes.
///
/// A single TLS record tops out at 16 KiB + header; a hello spanning more
/// than two records is not something a real client produces.
pub const MAX_PEEK_SIZE: usize = 32 * 1024;

/// Result of a successful peek
#[derive(Debug)]
pub struct PeekedHello {
    /// The SNI host name announced by the client, if any
    pub server_name: Option<String>,
    /// Every byte consumed from the client during the peek
    pub bytes: Vec<u8>,
}

/// Read from `stream` until a full ClientHello has been parsed.
///
/// # Errors
///
/// Returns [`ProxyError::Peek`] when the stream closes early, the data is
/// not a TLS handshake, or the hello exceeds [`MAX_PEEK_SIZE`].
pub async fn peek_client_hello<S>(stream: &mut S) -> Result<PeekedHello, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut acceptor = Acceptor::default();
    let mut captured: Vec<u8> = Vec::with_capacity(2048);
    let mut fed = 0usize;
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ProxyError::peek(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(ProxyError::peek("connection closed before ClientHello"));
        }

        captured.extend_from_slice(&chunk[..n]);
        if captured.len() > MAX_PEEK_SIZE {
            return Err(ProxyError::peek(format!(
                "ClientHello larger than {MAX_PEEK_SIZE} bytes"
            )));
        }

        // Feed the acceptor everything it has not consumed yet.
        loop {
            let mut cursor = std::io::Cursor::new(&captured[fed..]);
            let consumed = acceptor
                .read_tls(&mut cursor)
                .map_err(|e| ProxyError::peek(format!("read_tls failed: {e}")))?;
            fed += consumed;

            match acceptor.accept() {
                Ok(Some(accepted)) => {
                    let server_name = accepted
                        .client_hello()
                        .server_name()
                        .map(str::to_owned);
                    trace!(sni = ?server_name, captured = captured.len(), "ClientHello captured");
                    return Ok(PeekedHello {
                        server_name,
                        bytes: captured,
                    });
                }
                Ok(None) => {
                    if consumed == 0 {
                        // Acceptor wants more bytes than we have buffered.
                        break;
                    }
                }
                Err((e, _alert)) => {
                    return Err(ProxyError::peek(format!("TLS parse failed: {e}")));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    /// Build a minimal TLS ClientHello record, optionally carrying an SNI
    /// extension for `sni`.
    pub(crate) fn build_client_hello(sni: &str) -> Vec<u8> {
        let mut data = Vec::new();

        // TLS record header: handshake, TLS 1.0 compat version
        data.push(0x16);
        data.extend_from_slice(&[0x03, 0x01]);
        let record_length_pos = data.len();
        data.extend_from_slice(&[0x00, 0x00]);

        let handshake_start = data.len();

        // Handshake header: ClientHello
        data.push(0x01);
        let handshake_length_pos = data.len();
        data.extend_from_slice(&[0x00, 0x00, 0x00]);

        let client_hello_start = data.len();

        // Version TLS 1.2
        data.extend_from_slice(&[0x03, 0x03]);
        // Random
        data.extend_from_slice(&[0u8; 32]);
        // Session ID (empty)
        data.push(0x00);
        // Cipher suites: one real suite (TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256)
        data.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2f]);
        // Compression methods: null
        data.push(0x01);
        data.push(0x00);

        // Extensions
        let extensions_length_pos = data.len();
        data.extend_from_slice(&[0x00, 0x00]);
        let extensions_start = data.len();

        if !sni.is_empty() {
            // SNI extension
            data.extend_from_slice(&[0x00, 0x00]);
            let name = sni.as_bytes();
            let list_len = name.len() + 3;
            let ext_len = list_len + 2;
            data.extend_from_slice(&u16::try_from(ext_len).unwrap().to_be_bytes());
            data.extend_from_slice(&u16::try_from(list_len).unwrap().to_be_bytes());
            data.push(0x00); // host_name
            data.extend_from_slice(&u16::try_from(name.len()).unwrap().to_be_bytes());
            data.extend_from_slice(name);
        }

        // supported_versions: TLS 1.3 + 1.2 (keeps modern parsers happy)
        data.extend_from_slice(&[0x00, 0x2b, 0x00, 0x05, 0x04, 0x03, 0x04, 0x03, 0x03]);

        // signature_algorithms: required by modern parsers whenever TLS 1.3
        // is offered in supported_versions
        data.extend_from_slice(&[0x00, 0x0d, 0x00, 0x04, 0x00, 0x02, 0x04, 0x03]);

        let extensions_len = data.len() - extensions_start;
        data[extensions_length_pos] = u8::try_from(extensions_len >> 8).unwrap();
        data[extensions_length_pos + 1] = (extensions_len & 0xff) as u8;

        let client_hello_len = data.len() - client_hello_start;
        data[handshake_length_pos] = u8::try_from(client_hello_len >> 16).unwrap();
        data[handshake_length_pos + 1] = ((client_hello_len >> 8) & 0xff) as u8;
        data[handshake_length_pos + 2] = (client_hello_len & 0xff) as u8;

        let record_len = data.len() - handshake_start;
        data[record_length_pos] = u8::try_from(record_len >> 8).unwrap();
        data[record_length_pos + 1] = (record_len & 0xff) as u8;

        data
    }

    #[tokio::test]
    async fn test_peek_extracts_sni_and_captures_bytes() {
        let hello = build_client_hello("foo.test");
        let (mut client, mut server) = tokio::io::duplex(8192);
        client.write_all(&hello).await.unwrap();

        let peeked = peek_client_hello(&mut server).await.unwrap();
        assert_eq!(peeked.server_name.as_deref(), Some("foo.test"));
        assert_eq!(peeked.bytes, hello);
    }

    #[tokio::test]
    async fn test_peek_handles_split_delivery() {
        let hello = build_client_hello("split.example");
        let (mut client, mut server) = tokio::io::duplex(8192);

        let (first, second) = hello.split_at(7);
        let first = first.to_vec();
        let second = second.to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&first).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            client.write_all(&second).await.unwrap();
            client
        });

        let peeked = peek_client_hello(&mut server).await.unwrap();
        assert_eq!(peeked.server_name.as_deref(), Some("split.example"));
        assert_eq!(peeked.bytes, hello);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_peek_without_sni_extension() {
        let hello = build_client_hello("");
        let (mut client, mut server) = tokio::io::duplex(8192);
        client.write_all(&hello).await.unwrap();

        let peeked = peek_client_hello(&mut server).await.unwrap();
        assert_eq!(peeked.server_name, None);
        assert_eq!(peeked.bytes, hello);
    }

    #[tokio::test]
    async fn test_peek_rejects_non_tls() {
        let (mut client, mut server) = tokio::io::duplex(8192);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let err = peek_client_hello(&mut server).await.unwrap_err();
        assert!(matches!(err, ProxyError::Peek { .. }));
    }

    #[tokio::test]
    async fn test_peek_rejects_early_close() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = peek_client_hello(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("closed before ClientHello"));
    }
}
