use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

/// Failures specific to the HTTP Upgrade exchange (§4.4).
///
/// Kept as its own enum so callers driving `open()`/`open_with_config()` can
/// match on handshake failure modes without reaching into the general
/// [`Error`], which wraps this type for everything past the handshake.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("no URL was supplied to open()")]
    MissingUrl,

    #[error("unsupported URL scheme, only ws:// and wss:// are accepted")]
    UnsupportedScheme,

    #[error("URL has no host")]
    MissingHost,

    #[error("{source}")]
    UrlParseError {
        #[from]
        source: ParseError,
    },

    #[error("server responded with HTTP status {0}, expected 101")]
    BadStatus(u16),

    #[error("response is missing required upgrade headers")]
    MissingHeaders,

    #[error("Connection header was not 'upgrade'")]
    BadConnectionHeader,

    #[error("Upgrade header was not 'websocket'")]
    BadUpgradeHeader,

    #[error("Sec-WebSocket-Accept did not match the expected nonce response")]
    NonceMismatch,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    #[error("{source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("handshake did not complete within the configured timeout")]
    Timeout,
}

/// The crate's single error currency past the handshake boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Handshake {
        #[from]
        source: HandshakeError,
    },

    #[error("{source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("internal command channel closed unexpectedly")]
    CommunicationError,

    #[error("requested range exceeds the byte queue's buffered length")]
    OutOfSpace,

    // Framing errors
    #[error("RSV bit set without a negotiated extension")]
    RsvNotZero,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadSize,

    #[error("frame payload of {0} bytes exceeds max_frame_size of {1} bytes")]
    MaxFrameSize(u64, usize),

    #[error("message payload of {0} bytes exceeds max_message_size of {1} bytes")]
    MaxMessageSize(usize, usize),

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("close code {0} is not valid to send (local-only, undefined, or reserved)")]
    InvalidCloseCode(u16),

    #[error("a masked frame was received from the server, which violates RFC 6455")]
    MaskedServerFrame,

    // Connection lifecycle
    #[error("open() called while the connection was not Closed")]
    AlreadyOpen,

    #[error("the connection is not Open")]
    NotConnected,

    /// The delivery-side error `incoming()` terminates with on a clean close
    /// handshake (§4.5, §7 `CloseError`).
    #[error("connection closed: {code} {reason}")]
    Closed { code: u16, reason: String },

    /// The delivery-side error `incoming()` terminates with on an abnormal
    /// abort (transport failure, protocol violation, timeout).
    #[error("connection aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// `true` for a clean close handshake, `false` for everything
    /// abort-driven.
    pub fn is_close(&self) -> bool {
        matches!(self, Error::Closed { .. })
    }
}
