use crate::connection::Connection;
use crate::frame::Frame;
use crate::message::Message;

/// The in-process event-dispatch registry the Connection's I/O task drives
/// (§6 "Emitted events"). Deliberately a flat struct of optional boxed
/// closures rather than a name-keyed map: the event set is fixed and known
/// at compile time, so a map would only cost a string lookup for no benefit.
///
/// Only meaningful in callback mode; in async-pull mode the handlers here
/// still fire (the two delivery modes aren't mutually exclusive at the
/// registry level) but callers typically leave them unset and consume
/// [`Connection::incoming`] instead.
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) on_open: Option<Box<dyn Fn(Connection) + Send + Sync>>,
    pub(crate) on_frame: Option<Box<dyn Fn(&Frame) + Send + Sync>>,
    pub(crate) on_message: Option<Box<dyn Fn(Message) + Send + Sync>>,
    pub(crate) on_ping: Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>,
    pub(crate) on_pong: Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>,
    pub(crate) on_close: Option<Box<dyn Fn(u16, String) + Send + Sync>>,
    pub(crate) on_failure: Option<Box<dyn Fn(String) + Send + Sync>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once the handshake completes and the connection reaches `Open`.
    pub fn on_open(mut self, handler: impl Fn(Connection) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(handler));
        self
    }

    /// Fires for every finalized frame, before opcode-specific dispatch.
    pub fn on_frame(mut self, handler: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Box::new(handler));
        self
    }

    /// Fires for Text and Binary frames.
    pub fn on_message(mut self, handler: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(handler));
        self
    }

    pub fn on_ping(mut self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        self.on_ping = Some(Box::new(handler));
        self
    }

    pub fn on_pong(mut self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        self.on_pong = Some(Box::new(handler));
        self
    }

    /// Fires exactly once per connection lifetime on every terminal path.
    pub fn on_close(mut self, handler: impl Fn(u16, String) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(handler));
        self
    }

    /// Fires exactly once per connection lifetime, only on abnormal termination.
    pub fn on_failure(mut self, handler: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(handler));
        self
    }
}
