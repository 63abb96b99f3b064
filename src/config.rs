use std::time::Duration;

/// Delivery mode selected at construction (§4.5.3): either data frames are
/// pushed into a registered callback from the I/O task, or they are pulled
/// one at a time through [`crate::connection::Connection::incoming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Callback,
    AsyncIterator,
}

/// Per-connection tuning knobs, independent of transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Upper bound on a single frame's payload. A peer exceeding this aborts
    /// the connection with a protocol error rather than growing the buffer
    /// unboundedly.
    pub max_frame_size: Option<usize>,
    /// Upper bound on a single message's payload (post-unmasking).
    pub max_message_size: Option<usize>,
    /// Budget for the HTTP Upgrade handshake to complete (§4.5, §5).
    pub open_timeout: Duration,
    /// Budget for the peer to echo our Close frame before `close()` gives up
    /// and force-aborts (§5).
    pub close_timeout: Duration,
    /// Selects callback vs. async-pull delivery.
    pub delivery_mode: DeliveryMode,
    /// Auto-reply to Ping with a same-payload Pong, per RFC 6455 §5.5.3.
    /// Enabled by default; the source this engine improves on never did this.
    pub auto_pong: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            open_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(5),
            delivery_mode: DeliveryMode::Callback,
            auto_pong: true,
        }
    }
}

/// Top-level configuration passed to `open_with_config`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Extra PEM-encoded trusted roots to merge with the platform's
    /// `webpki-roots` when dialing `wss://`.
    pub ca_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_timers() {
        let config = WebSocketConfig::default();
        assert_eq!(config.open_timeout, Duration::from_secs(15));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.delivery_mode, DeliveryMode::Callback);
        assert!(config.auto_pong);
    }
}
