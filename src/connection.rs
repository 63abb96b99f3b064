use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use log::{debug, warn};
use tokio::io::{self, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use url::Url;

use crate::byte_queue::ByteQueue;
use crate::config::{ClientConfig, DeliveryMode, WebSocketConfig};
use crate::decoder::{FrameDecoder, Progress};
use crate::encoder::FrameEncoder;
use crate::error::{Error, HandshakeError};
use crate::event::EventHandlers;
use crate::frame::{validate_close_code, Frame, OpCode};
use crate::handshake;
use crate::message::Message;
use crate::stream::WsStream;

/// How many bytes to ask the transport for per `read_buf` call (§4.2's "chunk").
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Bound on the async-pull delivery queue (§4.5.3). Backpressures a fast
/// peer against a slow `incoming()` consumer without unbounded growth.
const INCOMING_QUEUE_CAPACITY: usize = 256;

/// Default text substituted for an empty Close reason, matching the
/// upstream library's default close description.
const DEFAULT_EMPTY_CLOSE_REASON: &str =
    "The WebSocket Connection was Marked as Idle due to no data transferred for a prolonged period of time.";

/// `status` field of §3's Connection data model, encoded atomically so a
/// cloned [`Connection`] handle can answer [`Connection::status`] without a
/// round trip through the I/O task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Closed,
    Handshaking,
    Open,
    Closing,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::Closed,
            1 => Status::Handshaking,
            2 => Status::Open,
            _ => Status::Closing,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Status::Closed => 0,
            Status::Handshaking => 1,
            Status::Open => 2,
            Status::Closing => 3,
        }
    }
}

/// The mailbox (§5) a cloned, `Send + Sync` [`Connection`] handle uses to
/// serialize onto the single task that owns the socket and all protocol
/// state.
enum Command {
    Send {
        frame: Frame,
        reply: oneshot::Sender<bool>,
    },
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Abort {
        code: u16,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Why the I/O task's loop ended. Dispatched exactly once (§7, §8 invariant 5).
enum Termination {
    Clean { code: u16, reason: String },
    Abnormal { code: u16, reason: String },
}

/// A live client connection (§3, §4.5 Connection). Cheap to clone: every
/// clone shares the same underlying I/O task via `commands`.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    status: Arc<AtomicU8>,
    #[allow(clippy::type_complexity)]
    incoming: Arc<StdMutex<Option<mpsc::Receiver<Result<Message, Error>>>>>,
}

/// Performs the handshake (§4.4) against `url` and, on success, spawns the
/// I/O task and returns an `Open` [`Connection`]. Uses default configuration
/// and no registered callbacks; see [`connect_with`] to customize either.
pub async fn connect(url: &str) -> Result<Connection, Error> {
    connect_with(url, ClientConfig::default(), EventHandlers::default()).await
}

/// Like [`connect`], but with an explicit [`ClientConfig`] and
/// [`EventHandlers`] registry.
///
/// Any failure during the handshake (§4.5's Handshaking -> Closed
/// transition) dispatches `close(1006)` and `failure` through `handlers`
/// before returning the error, exactly as a successfully spawned connection
/// would on a later abnormal termination (§7).
pub async fn connect_with(
    url: &str,
    config: ClientConfig,
    handlers: EventHandlers,
) -> Result<Connection, Error> {
    match dial_and_handshake(url, &config).await {
        Ok((transport, leftover)) => {
            Ok(Connection::spawn(transport, leftover, config.web_socket_config, handlers))
        }
        Err(err) => {
            let message = err.to_string();
            warn!("handshake failed: {message}");
            if let Some(on_close) = handlers.on_close.as_ref() {
                on_close(1006, message.clone());
            }
            if let Some(on_failure) = handlers.on_failure.as_ref() {
                on_failure(message);
            }
            Err(err)
        }
    }
}

/// Dials `url` and runs the handshake, returning the live transport plus
/// whatever bytes the peer pipelined past the end of the HTTP response
/// header (§4.2/§4.4: those bytes belong to the first WebSocket frame and
/// must be handed to the connection's `ByteQueue`, not discarded).
async fn dial_and_handshake(url: &str, config: &ClientConfig) -> Result<(WsStream, Bytes), Error> {
    let parsed: Url = url.parse().map_err(HandshakeError::from)?;
    let (host, port, use_tls) = handshake::host_and_port(&parsed)?;
    debug!("dialing {host}:{port} (tls={use_tls})");
    let mut transport = WsStream::connect(&host, port, use_tls, config.ca_file.as_deref()).await?;
    let leftover = handshake::perform(
        &mut transport,
        &parsed,
        &host,
        port,
        use_tls,
        config.web_socket_config.open_timeout,
    )
    .await?;
    Ok((transport, leftover))
}

impl Connection {
    fn spawn(transport: WsStream, leftover: Bytes, config: WebSocketConfig, handlers: EventHandlers) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let status = Arc::new(AtomicU8::new(Status::Open.as_u8()));

        let (incoming_tx, incoming_rx) = match config.delivery_mode {
            DeliveryMode::AsyncIterator => {
                let (tx, rx) = mpsc::channel(INCOMING_QUEUE_CAPACITY);
                (Some(tx), Some(rx))
            }
            DeliveryMode::Callback => (None, None),
        };

        let connection = Connection {
            commands: command_tx,
            status: status.clone(),
            incoming: Arc::new(StdMutex::new(incoming_rx)),
        };

        let task_connection = connection.clone();
        tokio::spawn(async move {
            run_io_loop(
                transport,
                leftover,
                config,
                handlers,
                command_rx,
                incoming_tx,
                status,
                task_connection,
            )
            .await;
        });

        connection
    }

    /// Current lifecycle state (§3, §4.5). Never blocks.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.status() == Status::Open
    }

    /// Sends `message` as a single unfragmented Text or Binary frame.
    /// Returns `false` if the connection is not `Open` (§4.5 `send`).
    pub async fn send(&self, message: impl Into<Message>) -> bool {
        self.send_frame(message.into().into_frame()).await
    }

    /// Splits `message` into frames no larger than `max_frame_size`, the
    /// first carrying the real opcode and the rest `Continuation`. Used for
    /// payloads too large to comfortably hold in one frame; the peer must
    /// reassemble them (this engine's own decoder does not, §4.5.2).
    pub async fn send_fragmented(&self, message: impl Into<Message>, max_frame_size: usize) -> bool {
        for frame in message.into().into_frames(max_frame_size) {
            if !self.send_frame(frame).await {
                return false;
            }
        }
        true
    }

    pub async fn ping(&self, payload: Option<Vec<u8>>) -> bool {
        self.send_frame(Frame::new(true, OpCode::Ping, payload.unwrap_or_default()))
            .await
    }

    pub async fn pong(&self, payload: Option<Vec<u8>>) -> bool {
        self.send_frame(Frame::new(true, OpCode::Pong, payload.unwrap_or_default()))
            .await
    }

    async fn send_frame(&self, frame: Frame) -> bool {
        let (reply, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Send { frame, reply }).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Initiates the close handshake (§4.5 `close`, §4.5.1). Validates
    /// `code` before ever reaching the I/O task. The returned future
    /// resolves `Ok(())` once the peer's Close is received (clean close) or
    /// `Err(Error::Aborted(_))` if the close-timer fires first (§5
    /// cancellation).
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), Error> {
        validate_close_code(code)?;
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Close { code, reason: reason.into(), reply })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// `close(1000, "")`, the common case.
    pub async fn close_default(&self) -> Result<(), Error> {
        self.close(1000, "").await
    }

    /// Force-terminates the connection (§5 cancellation). Idempotent: once
    /// the I/O task has exited (from this or any other terminal path),
    /// further calls observe the closed mailbox and return `false` with no
    /// side effects.
    pub async fn abort(&self, code: u16, reason: impl Into<String>) -> bool {
        let (reply, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Abort { code, reason: reason.into(), reply })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Takes ownership of the async-pull delivery stream (§4.5.3). Returns
    /// `None` if the connection wasn't constructed with
    /// `DeliveryMode::AsyncIterator`, or if a previous call already took it
    /// (single-consumer, per §4.5's `incoming()` doc).
    pub fn incoming(&self) -> Option<Incoming> {
        let mut guard = self.incoming.lock().expect("incoming mutex poisoned");
        guard.take().map(|receiver| Incoming { receiver })
    }
}

/// The async-pull delivery stream returned by [`Connection::incoming`].
/// Yields decoded data frames in arrival order, then one final `Err` -
/// [`Error::Closed`] on a clean close, [`Error::Aborted`] on an abnormal one
/// - before ending (§4.5.3, §7).
pub struct Incoming {
    receiver: mpsc::Receiver<Result<Message, Error>>,
}

impl Stream for Incoming {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}

fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (1005, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (code, reason)
}

fn protocol_close_code(err: &Error) -> u16 {
    match err {
        Error::MaxFrameSize(_, _) => 1009,
        _ => 1002,
    }
}

async fn send_close_best_effort<W: AsyncWrite + Unpin>(write_half: &mut W, code: u16, reason: &str) {
    let frame = Frame::new(true, OpCode::Close, reason.as_bytes().to_vec());
    match FrameEncoder::encode_with_close_code(&frame, Some(code)) {
        Ok(bytes) => {
            let _ = write_half.write_all(&bytes).await;
        }
        Err(err) => warn!("failed to encode outbound close frame: {err}"),
    }
}

/// Drains as many complete frames as `queue` currently holds, dispatching
/// each to the registered handlers / async-pull channel. Called both before
/// the first transport read (for bytes the peer pipelined past the end of
/// the handshake response) and after every successful `read_buf` (§5).
///
/// Returns `Some(Termination)` once the connection must stop reading, in
/// which case the io loop should break out immediately afterward.
#[allow(clippy::too_many_arguments)]
async fn process_inbound<W: AsyncWrite + Unpin>(
    queue: &mut ByteQueue,
    decoder: &mut FrameDecoder,
    write_half: &mut W,
    handlers: &EventHandlers,
    config: &WebSocketConfig,
    incoming_tx: Option<&mpsc::Sender<Result<Message, Error>>>,
    already_closing: bool,
) -> Option<Termination> {
    loop {
        match decoder.push(queue) {
            Ok(Progress::NeedMore) => return None,
            Err(err) => {
                let code = protocol_close_code(&err);
                let reason = err.to_string();
                send_close_best_effort(write_half, code, &reason).await;
                return Some(Termination::Abnormal { code, reason });
            }
            Ok(Progress::Done(frame)) => {
                *decoder = FrameDecoder::new();
                if let Some(on_frame) = handlers.on_frame.as_ref() {
                    on_frame(&frame);
                }

                let frame_len = frame.payload.len() as u64;
                if let Some(limit) = config.max_frame_size {
                    if frame_len > limit as u64 {
                        let reason = Error::MaxFrameSize(frame_len, limit).to_string();
                        send_close_best_effort(write_half, 1009, &reason).await;
                        return Some(Termination::Abnormal { code: 1009, reason });
                    }
                }

                match frame.opcode {
                    OpCode::Continue => {
                        // Fragmentation reassembly is a non-goal; a
                        // continuation frame on its own carries no
                        // independently meaningful payload.
                    }
                    OpCode::Text | OpCode::Binary => {
                        if let Some(limit) = config.max_message_size {
                            if frame.payload.len() > limit {
                                let reason = Error::MaxMessageSize(frame.payload.len(), limit).to_string();
                                send_close_best_effort(write_half, 1009, &reason).await;
                                return Some(Termination::Abnormal { code: 1009, reason });
                            }
                        }
                        match Message::from_frame(frame) {
                            Ok(message) => {
                                if let Some(on_message) = handlers.on_message.as_ref() {
                                    on_message(message.clone());
                                }
                                if let Some(tx) = incoming_tx {
                                    let _ = tx.send(Ok(message)).await;
                                }
                            }
                            Err(err) => {
                                let reason = err.to_string();
                                send_close_best_effort(write_half, 1007, &reason).await;
                                return Some(Termination::Abnormal { code: 1007, reason });
                            }
                        }
                    }
                    OpCode::Ping => {
                        if let Some(on_ping) = handlers.on_ping.as_ref() {
                            on_ping(frame.payload.clone());
                        }
                        if config.auto_pong {
                            let pong = Frame::new(true, OpCode::Pong, frame.payload);
                            match FrameEncoder::encode(&pong) {
                                Ok(bytes) => { let _ = write_half.write_all(&bytes).await; }
                                Err(err) => warn!("failed to encode auto-pong: {err}"),
                            }
                        }
                    }
                    OpCode::Pong => {
                        if let Some(on_pong) = handlers.on_pong.as_ref() {
                            on_pong(frame.payload);
                        }
                    }
                    OpCode::Close => {
                        // An empty close payload synthesizes code 1005, a local
                        // sentinel for "no status code present" (§4.5.2) - it was
                        // never actually sent on the wire, so it must not be run
                        // through validate_close_code. A peer that did send an
                        // explicit code is still validated, even if that literal
                        // code happens to be 1005.
                        let code_explicit = frame.payload.len() >= 2;
                        let (code, mut reason) = parse_close_payload(&frame.payload);
                        if code_explicit {
                            if let Err(err) = validate_close_code(code) {
                                let message = err.to_string();
                                send_close_best_effort(write_half, 1002, &message).await;
                                return Some(Termination::Abnormal { code: 1002, reason: message });
                            }
                        }
                        if reason.is_empty() {
                            reason = DEFAULT_EMPTY_CLOSE_REASON.to_string();
                        }
                        // Echo exactly once: only if we didn't already
                        // initiate our own close (Design Notes §9).
                        if !already_closing {
                            send_close_best_effort(write_half, code, "").await;
                        }
                        return Some(Termination::Clean { code, reason });
                    }
                }
            }
        }
    }
}

/// The single task that owns the transport and all of §3's Connection state
/// (§5: "the Byte Queue, current decoder, and status field are mutated only
/// from the inbound task and the public API task - which are the same task
/// under the single-threaded contract").
#[allow(clippy::too_many_arguments)]
async fn run_io_loop(
    transport: WsStream,
    leftover: Bytes,
    config: WebSocketConfig,
    handlers: EventHandlers,
    mut command_rx: mpsc::Receiver<Command>,
    incoming_tx: Option<mpsc::Sender<Result<Message, Error>>>,
    status: Arc<AtomicU8>,
    connection: Connection,
) {
    let (mut read_half, mut write_half) = io::split(transport);
    let mut queue = ByteQueue::new();
    let mut decoder = FrameDecoder::new();
    let mut read_buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut pending_close_reply: Option<oneshot::Sender<Result<(), Error>>> = None;
    let mut closing = false;

    if let Some(on_open) = handlers.on_open.as_ref() {
        on_open(connection.clone());
    }

    // The peer may have pipelined the first frame(s) right after the
    // handshake response; decode whatever's already here before blocking on
    // the first real transport read.
    if !leftover.is_empty() {
        queue.append(leftover);
    }
    let leftover_termination = if queue.length() > 0 {
        process_inbound(
            &mut queue,
            &mut decoder,
            &mut write_half,
            &handlers,
            &config,
            incoming_tx.as_ref(),
            pending_close_reply.is_some(),
        )
        .await
    } else {
        None
    };

    // Armed for real only once `close()` is called; the long placeholder
    // duration keeps the branch inert (guarded by `closing` anyway) until then.
    let close_sleep = sleep(std::time::Duration::from_secs(3600));
    tokio::pin!(close_sleep);

    let termination = if let Some(t) = leftover_termination {
        t
    } else {
        'io: loop {
            tokio::select! {
            biased;

            _ = &mut close_sleep, if closing => {
                break 'io Termination::Abnormal {
                    code: 1006,
                    reason: "peer did not acknowledge close within the close timeout".to_string(),
                };
            }

            read_result = read_half.read_buf(&mut read_buf) => {
                match read_result {
                    Ok(0) => break 'io Termination::Abnormal {
                        code: 1006,
                        reason: "transport closed by peer".to_string(),
                    },
                    Err(err) => break 'io Termination::Abnormal { code: 1006, reason: err.to_string() },
                    Ok(_) => {
                        queue.append(read_buf.split().freeze());

                        if let Some(t) = process_inbound(
                            &mut queue,
                            &mut decoder,
                            &mut write_half,
                            &handlers,
                            &config,
                            incoming_tx.as_ref(),
                            pending_close_reply.is_some(),
                        )
                        .await
                        {
                            break 'io t;
                        }
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    None => break 'io Termination::Abnormal {
                        code: 1006,
                        reason: "connection handle was dropped".to_string(),
                    },
                    Some(Command::Send { frame, reply }) => {
                        if Status::from_u8(status.load(Ordering::Acquire)) != Status::Open {
                            let _ = reply.send(false);
                            continue;
                        }
                        match FrameEncoder::encode(&frame) {
                            Ok(bytes) => {
                                let ok = write_half.write_all(&bytes).await.is_ok();
                                let _ = reply.send(ok);
                            }
                            Err(err) => {
                                warn!("failed to encode outbound frame: {err}");
                                let _ = reply.send(false);
                            }
                        }
                    }
                    Some(Command::Close { code, reason, reply }) => {
                        if Status::from_u8(status.load(Ordering::Acquire)) != Status::Open {
                            let _ = reply.send(Err(Error::NotConnected));
                            continue;
                        }
                        status.store(Status::Closing.as_u8(), Ordering::Release);
                        closing = true;
                        close_sleep.as_mut().reset(Instant::now() + config.close_timeout);
                        pending_close_reply = Some(reply);
                        send_close_best_effort(&mut write_half, code, &reason).await;
                    }
                    Some(Command::Abort { code, reason, reply }) => {
                        let _ = reply.send(true);
                        break 'io Termination::Abnormal { code, reason };
                    }
                }
            }
        }
        }
    };
    status.store(Status::Closed.as_u8(), Ordering::Release);

    match termination {
        Termination::Clean { code, reason } => {
            debug!("connection closed cleanly: {code} {reason}");
            if let Some(reply) = pending_close_reply.take() {
                let _ = reply.send(Ok(()));
            }
            if let Some(tx) = incoming_tx.as_ref() {
                let _ = tx.send(Err(Error::Closed { code, reason: reason.clone() })).await;
            }
            if let Some(on_close) = handlers.on_close.as_ref() {
                on_close(code, reason);
            }
        }
        Termination::Abnormal { code, reason } => {
            warn!("connection aborted: {code} {reason}");
            if let Some(reply) = pending_close_reply.take() {
                let _ = reply.send(Err(Error::Aborted(reason.clone())));
            }
            if let Some(tx) = incoming_tx.as_ref() {
                let _ = tx.send(Err(Error::Aborted(reason.clone()))).await;
            }
            if let Some(on_close) = handlers.on_close.as_ref() {
                on_close(code, reason.clone());
            }
            if let Some(on_failure) = handlers.on_failure.as_ref() {
                on_failure(reason);
            }
        }
    }
}
