use base64::prelude::*;
use bytes::{Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use url::Url;

use crate::error::HandshakeError;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_HEADER_BYTES: usize = 16 * 1024;

/// Resolves `url`'s scheme, host and dial port, per §4.4's URL scheme
/// validation. Returns `(host, port, use_tls)`. `connection.rs` uses this to
/// open the TCP socket before the handshake itself ever touches the wire.
pub fn host_and_port(url: &Url) -> Result<(String, u16, bool), HandshakeError> {
    let use_tls = match url.scheme() {
        "ws" => false,
        "wss" => true,
        _ => return Err(HandshakeError::UnsupportedScheme),
    };
    let host = url.host_str().ok_or(HandshakeError::MissingHost)?.to_string();
    let default_port = if use_tls { 443 } else { 80 };
    let port = url.port().unwrap_or(default_port);
    Ok((host, port, use_tls))
}

fn generate_nonce() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    BASE64_STANDARD.encode(raw)
}

/// `base64(SHA1(nonce ‖ GUID))`, the value the server's `Sec-WebSocket-Accept`
/// must echo back (§4.4 step 3, S4).
fn expected_accept(nonce: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

fn build_request(url: &Url, host: &str, port: u16, use_tls: bool, nonce: &str) -> String {
    let request_path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let default_port = if use_tls { 443 } else { 80 };
    let host_header = if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    };

    format!(
        "GET {request_path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: upgrade\r\n\
         Sec-WebSocket-Key: {nonce}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

fn header_value<'a>(headers: &'a [httparse::Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn validate_accept_against(accept: &str, nonce: &str) -> Result<(), HandshakeError> {
    if accept == expected_accept(nonce) {
        Ok(())
    } else {
        Err(HandshakeError::NonceMismatch)
    }
}

/// Runs the full client handshake (§4.4) over an already-connected `stream`:
/// generates a nonce, writes the HTTP GET, and validates the response within
/// `open_timeout`. Returns whatever bytes the transport delivered past the
/// end of the header block - a server is free to pipeline the first
/// WebSocket frame right behind `\r\n\r\n`, and those bytes must not be
/// discarded; the caller seeds the connection's `ByteQueue` with them before
/// the read loop starts (§4.2's "accumulates arriving byte chunks" applies
/// from the very first byte past the handshake, not just the ones read
/// afterwards).
pub async fn perform<T: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut T,
    url: &Url,
    host: &str,
    port: u16,
    use_tls: bool,
    open_timeout: Duration,
) -> Result<Bytes, HandshakeError> {
    timeout(open_timeout, async {
        let nonce = generate_nonce();
        let request = build_request(url, host, port, use_tls, &nonce);
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;
        read_response_with_nonce(stream, &nonce).await
    })
    .await
    .map_err(|_| HandshakeError::Timeout)?
}

async fn read_response_with_nonce<T: AsyncRead + Unpin>(
    stream: &mut T,
    nonce: &str,
) -> Result<Bytes, HandshakeError> {
    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 1024];

    loop {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf)? {
            httparse::Status::Complete(consumed) => {
                let status = response.code.ok_or(HandshakeError::MissingHeaders)?;
                if status != 101 {
                    return Err(HandshakeError::BadStatus(status));
                }

                let connection = header_value(response.headers, "connection")
                    .ok_or(HandshakeError::MissingHeaders)?;
                if !connection.eq_ignore_ascii_case("upgrade") {
                    return Err(HandshakeError::BadConnectionHeader);
                }

                let upgrade = header_value(response.headers, "upgrade")
                    .ok_or(HandshakeError::MissingHeaders)?;
                if !upgrade.eq_ignore_ascii_case("websocket") {
                    return Err(HandshakeError::BadUpgradeHeader);
                }

                let accept = header_value(response.headers, "sec-websocket-accept")
                    .ok_or(HandshakeError::MissingHeaders)?;

                validate_accept_against(accept, nonce)?;
                // `response`/`headers` borrowed `buf` up to this point; that
                // borrow ends here, so `buf` can be split below.
                return Ok(buf.split_off(consumed).freeze());
            }
            httparse::Status::Partial => {
                if buf.len() >= MAX_RESPONSE_HEADER_BYTES {
                    return Err(HandshakeError::MissingHeaders);
                }
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(HandshakeError::MissingHeaders);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct ScriptedStream {
        to_read: std::io::Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            use std::io::Read;
            let mut tmp = vec![0u8; buf.remaining()];
            let n = self.to_read.read(&mut tmp).unwrap_or(0);
            buf.put_slice(&tmp[..n]);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn host_and_port_rejects_non_ws_schemes() {
        let url = Url::parse("http://example.com").unwrap();
        assert!(matches!(host_and_port(&url), Err(HandshakeError::UnsupportedScheme)));
    }

    #[test]
    fn host_and_port_defaults_by_scheme() {
        let ws = Url::parse("ws://example.com/chat").unwrap();
        assert_eq!(host_and_port(&ws).unwrap(), ("example.com".to_string(), 80, false));

        let wss = Url::parse("wss://example.com").unwrap();
        assert_eq!(host_and_port(&wss).unwrap(), ("example.com".to_string(), 443, true));

        let custom = Url::parse("ws://example.com:9000").unwrap();
        assert_eq!(custom.port(), Some(9000));
        assert_eq!(host_and_port(&custom).unwrap(), ("example.com".to_string(), 9000, false));
    }

    // S4: fixed nonce -> known Sec-WebSocket-Accept value from RFC 6455.
    #[test]
    fn s4_expected_accept_matches_rfc_vector() {
        let nonce = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(expected_accept(nonce), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn build_request_sets_required_headers() {
        let url = Url::parse("ws://example.com/chat?x=1").unwrap();
        let request = build_request(&url, "example.com", 80, false, "abc123");
        assert!(request.starts_with("GET /chat?x=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Connection: upgrade\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: abc123\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[test]
    fn build_request_omits_default_port_from_host_header() {
        let url = Url::parse("wss://example.com").unwrap();
        let request = build_request(&url, "example.com", 443, true, "abc123");
        assert!(request.contains("Host: example.com\r\n"));

        let custom = Url::parse("ws://example.com:9000").unwrap();
        let request = build_request(&custom, "example.com", 9000, false, "abc123");
        assert!(request.contains("Host: example.com:9000\r\n"));
    }

    #[tokio::test]
    async fn perform_succeeds_on_well_formed_response() {
        let nonce = "dGhlIHNhbXBsZSBub25jZQ==";
        // We can't control perform()'s internally generated nonce, so this
        // test drives read_response_with_nonce directly against the fixed
        // RFC 6455 vector instead of perform().
        let accept = expected_accept(nonce);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        );
        let mut stream = ScriptedStream {
            to_read: std::io::Cursor::new(response.into_bytes()),
            written: Vec::new(),
        };
        let leftover = read_response_with_nonce(&mut stream, nonce).await.unwrap();
        assert!(leftover.is_empty());
    }

    // A server is free to pipeline the first WebSocket frame right behind
    // the header's trailing \r\n\r\n; those bytes must come back as leftover
    // rather than being silently dropped.
    #[tokio::test]
    async fn perform_returns_bytes_pipelined_past_the_header() {
        let nonce = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = expected_accept(nonce);
        let pipelined_frame = [0x81u8, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F]; // S1's "Hello" text frame
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        )
        .into_bytes();
        response.extend_from_slice(&pipelined_frame);

        let mut stream = ScriptedStream {
            to_read: std::io::Cursor::new(response),
            written: Vec::new(),
        };
        let leftover = read_response_with_nonce(&mut stream, nonce).await.unwrap();
        assert_eq!(&leftover[..], &pipelined_frame[..]);
    }

    #[tokio::test]
    async fn perform_rejects_non_101_status() {
        let response = "HTTP/1.1 404 Not Found\r\n\r\n";
        let mut stream = ScriptedStream {
            to_read: std::io::Cursor::new(response.as_bytes().to_vec()),
            written: Vec::new(),
        };
        let err = read_response_with_nonce(&mut stream, "nonce").await.unwrap_err();
        assert!(matches!(err, HandshakeError::BadStatus(404)));
    }

    #[tokio::test]
    async fn perform_rejects_mismatched_accept() {
        let response = "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: not-the-right-value\r\n\
             \r\n";
        let mut stream = ScriptedStream {
            to_read: std::io::Cursor::new(response.as_bytes().to_vec()),
            written: Vec::new(),
        };
        let err = read_response_with_nonce(&mut stream, "nonce").await.unwrap_err();
        assert!(matches!(err, HandshakeError::NonceMismatch));
    }
}
