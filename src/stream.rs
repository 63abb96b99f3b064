use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls_pemfile::certs;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio_rustls::{TlsConnector, TlsStream};

use crate::error::HandshakeError;

/// The transport a `Connection` drives: the core protocol logic only ever
/// calls `AsyncRead`/`AsyncWrite` on it, never downcasts (§10.1).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Plain TCP or TLS-over-TCP, chosen by the URL scheme at dial time.
pub enum WsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            WsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            WsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            WsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            WsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl WsStream {
    pub async fn connect(
        host: &str,
        port: u16,
        use_tls: bool,
        ca_file: Option<&str>,
    ) -> Result<Self, HandshakeError> {
        let tcp = TcpStream::connect((host, port)).await?;
        if !use_tls {
            return Ok(WsStream::Plain(tcp));
        }

        let connector = build_tls_connector(ca_file)?;
        let server_name = host
            .to_string()
            .try_into()
            .map_err(|_| HandshakeError::MissingHost)?;
        let tls = connector.connect(server_name, tcp).await?;
        Ok(WsStream::Tls(Box::new(TlsStream::Client(tls))))
    }
}

fn build_tls_connector(ca_file: Option<&str>) -> Result<TlsConnector, HandshakeError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_file {
        let bytes = std::fs::read(path)?;
        let extra: Vec<CertificateDer<'static>> = certs(&mut &bytes[..])
            .collect::<Result<_, _>>()
            .map_err(|source: io::Error| HandshakeError::IOError { source })?;
        for cert in extra {
            // Malformed entries in a user-supplied CA bundle shouldn't be
            // silently ignored, but rustls' RootCertStore has no partial
            // rejection signal beyond an opaque error; bubble it up as-is.
            roots
                .add(cert)
                .map_err(|err| HandshakeError::IOError { source: io::Error::new(io::ErrorKind::InvalidData, err) })?;
        }
    }

    let config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
