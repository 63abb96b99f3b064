use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// A complete, unfragmented application message, the unit `send()`/`incoming()`
/// deal in. Continuation frames never surface here — see `connection.rs`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}

impl Message {
    pub fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => Ok(Message::Text(String::from_utf8(frame.payload)?)),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => Ok(String::from_utf8(data.clone())?),
        }
    }

    pub fn into_frame(self) -> Frame {
        let (opcode, payload) = match self {
            Message::Text(text) => (OpCode::Text, text.into_bytes()),
            Message::Binary(data) => (OpCode::Binary, data),
        };
        Frame::new(true, opcode, payload)
    }

    /// Splits a message into a sequence of frames no larger than
    /// `max_frame_size`, the first carrying the real opcode and every
    /// subsequent one `OpCode::Continue`, with `final_fragment` set only on
    /// the last. Used by `send_fragmented` for payloads too large for one
    /// frame; `send`/`send_as_binary`/`send_as_text` always emit a single
    /// unfragmented frame instead.
    pub fn into_frames(self, max_frame_size: usize) -> Vec<Frame> {
        let (opcode, payload) = match self {
            Message::Text(text) => (OpCode::Text, text.into_bytes()),
            Message::Binary(data) => (OpCode::Binary, data),
        };

        if payload.is_empty() {
            return vec![Frame::new(true, opcode, payload)];
        }

        let mut frames: Vec<Frame> = Vec::new();
        for chunk in payload.chunks(max_frame_size.max(1)) {
            let chunk_opcode = if frames.is_empty() { opcode } else { OpCode::Continue };
            frames.push(Frame::new(false, chunk_opcode, chunk.to_vec()));
        }

        if let Some(last_frame) = frames.last_mut() {
            last_frame.final_fragment = true;
        }

        frames
    }
}
