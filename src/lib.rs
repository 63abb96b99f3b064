//! Simple async WebSocket client implementation for the Tokio stack.
//!
//! This library offers a client-side implementation for websockets, so end-user could use this
//! to wrap a websocket client into their application, offering a smooth way of setting it up
//! into his code.
//!
//! It's an async library based on tokio runtime, which uses a tokio TcpStream (optionally
//! wrapped in TLS) behind the scenes, using that as the starting point to implement the client
//! side of the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455),
//! performing handshakes, reading frames, parsing masks, handling opcodes and internal payload.
//!
//! ```no_run
//! use wavesock::{connect, Message};
//!
//! # async fn run() -> Result<(), wavesock::Error> {
//! let connection = connect("ws://localhost:8080").await?;
//! connection.send(Message::Text("hello".to_string())).await;
//! # Ok(())
//! # }
//! ```

pub mod byte_queue;
mod config;
mod connection;
pub mod decoder;
pub mod encoder;
pub mod error;
mod event;
pub mod frame;
pub mod handshake;
mod message;
mod stream;

pub use byte_queue::ByteQueue;
pub use config::{ClientConfig, DeliveryMode, WebSocketConfig};
pub use connection::{connect, connect_with, Connection, Incoming, Status};
pub use decoder::{FrameDecoder, Progress};
pub use encoder::FrameEncoder;
pub use error::{Error, HandshakeError};
pub use event::EventHandlers;
pub use frame::{Frame, OpCode};
pub use message::Message;
