use crate::byte_queue::ByteQueue;
use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_PAYLOAD_SIZE};

/// Where a single frame's incremental decode currently sits (§3's Inbound
/// Frame `decoder_state`). Kept as the decoder's own discriminant rather than
/// a field on `Frame` itself, since a `Frame` only exists once decoding
/// finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    ParsingHeader,
    Awaiting16BitLength,
    Awaiting64BitLength,
    AwaitingPayload,
}

/// Outcome of feeding more bytes to a [`FrameDecoder`].
#[derive(Debug)]
pub enum Progress {
    /// Not enough bytes buffered yet to advance past the current state.
    NeedMore,
    /// The frame is complete and unmasked.
    Done(Frame),
}

/// Incrementally decodes exactly one frame from a [`ByteQueue`] (§4.2).
///
/// A single instance is good for one frame: once `push` returns
/// `Progress::Done`, construct a fresh decoder for the next one. Partial
/// state survives across arbitrarily many `NeedMore` returns, so a decoder
/// can sit idle across many `poll_read`s waiting on a slow peer.
pub struct FrameDecoder {
    state: DecoderState,
    fin: bool,
    opcode: Option<OpCode>,
    payload_length: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ParsingHeader,
            fin: false,
            opcode: None,
            payload_length: 0,
        }
    }

    /// Advances the decoder as far as `queue` currently allows.
    pub fn push(&mut self, queue: &mut ByteQueue) -> Result<Progress, Error> {
        loop {
            match self.state {
                DecoderState::ParsingHeader => {
                    if queue.length() < 2 {
                        return Ok(Progress::NeedMore);
                    }
                    let header = queue.take(2)?;
                    let byte0 = header[0];
                    let byte1 = header[1];

                    self.fin = (byte0 & 0b1000_0000) != 0;
                    let rsv1 = (byte0 & 0b0100_0000) != 0;
                    let rsv2 = (byte0 & 0b0010_0000) != 0;
                    let rsv3 = (byte0 & 0b0001_0000) != 0;
                    // No extension is ever negotiated, so all three RSV bits
                    // must be zero (§4.2).
                    if rsv1 || rsv2 || rsv3 {
                        return Err(Error::RsvNotZero);
                    }

                    let opcode = OpCode::from(byte0 & 0b0000_1111)?;
                    if !self.fin && opcode.is_control() {
                        return Err(Error::ControlFramesFragmented);
                    }
                    self.opcode = Some(opcode);

                    // A client receiving a masked frame is a protocol
                    // violation: servers never mask (§4.2, Design Notes).
                    let masked = (byte1 & 0b1000_0000) != 0;
                    if masked {
                        return Err(Error::MaskedServerFrame);
                    }

                    let len7 = byte1 & 0b0111_1111;
                    if len7 > 125 && opcode.is_control() {
                        return Err(Error::ControlFramePayloadSize);
                    }

                    self.state = match len7 {
                        126 => DecoderState::Awaiting16BitLength,
                        127 => DecoderState::Awaiting64BitLength,
                        small => {
                            self.payload_length = small as u64;
                            DecoderState::AwaitingPayload
                        }
                    };
                }
                DecoderState::Awaiting16BitLength => {
                    if queue.length() < 2 {
                        return Ok(Progress::NeedMore);
                    }
                    let bytes = queue.take(2)?;
                    self.payload_length = u16::from_be_bytes([bytes[0], bytes[1]]) as u64;
                    self.state = DecoderState::AwaitingPayload;
                }
                DecoderState::Awaiting64BitLength => {
                    if queue.length() < 8 {
                        return Ok(Progress::NeedMore);
                    }
                    let bytes = queue.take(8)?;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&bytes);
                    // The full 64-bit value is read; the source this engine
                    // improves on truncated this to the low 32 bits
                    // (readUInt32BE), silently misframing payloads >= 4 GiB.
                    self.payload_length = u64::from_be_bytes(raw);
                    self.state = DecoderState::AwaitingPayload;
                }
                DecoderState::AwaitingPayload => {
                    if self.payload_length > MAX_PAYLOAD_SIZE {
                        return Err(Error::MaxFrameSize(self.payload_length, MAX_PAYLOAD_SIZE as usize));
                    }
                    let opcode = self.opcode.expect("opcode set before AwaitingPayload");
                    if self.payload_length == 0 {
                        return Ok(Progress::Done(Frame::new(self.fin, opcode, Vec::new())));
                    }
                    if queue.length() < self.payload_length as usize {
                        return Ok(Progress::NeedMore);
                    }
                    let payload = queue.take(self.payload_length as usize)?;
                    return Ok(Progress::Done(Frame::new(self.fin, opcode, payload)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_all(bytes: &[u8]) -> Frame {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::copy_from_slice(bytes));
        let mut decoder = FrameDecoder::new();
        match decoder.push(&mut queue).unwrap() {
            Progress::Done(frame) => frame,
            Progress::NeedMore => panic!("expected a finished frame"),
        }
    }

    #[test]
    fn s1_small_text_frame_decode() {
        let bytes = [0x81, 0x05, 0x48, 0x65, 0x6C, 0x6C, 0x6F];
        let frame = decode_all(&bytes);
        assert!(frame.final_fragment);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn s2_16_bit_length() {
        let mut bytes = vec![0x82, 0x7E, 0x01, 0x00];
        bytes.extend(std::iter::repeat(0xABu8).take(256));
        let frame = decode_all(&bytes);
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 256);
        assert!(frame.payload.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn decoder_is_feed_order_invariant_across_arbitrary_chunking() {
        let mut full = vec![0x82u8, 0x7E, 0x01, 0x00];
        full.extend(std::iter::repeat(0x5Au8).take(256));

        // Split the stream at every possible boundary and confirm the
        // decoded frame is identical each time.
        let whole = decode_all(&full);
        for split in 1..full.len() {
            let mut queue = ByteQueue::new();
            queue.append(Bytes::copy_from_slice(&full[..split]));
            let mut decoder = FrameDecoder::new();
            let first = decoder.push(&mut queue).unwrap();
            let frame = match first {
                Progress::Done(frame) => frame,
                Progress::NeedMore => {
                    queue.append(Bytes::copy_from_slice(&full[split..]));
                    match decoder.push(&mut queue).unwrap() {
                        Progress::Done(frame) => frame,
                        Progress::NeedMore => panic!("still incomplete after full stream at split {split}"),
                    }
                }
            };
            assert_eq!(frame, whole, "mismatch at split {split}");
        }
    }

    #[test]
    fn rejects_reserved_rsv_bits() {
        let bytes = [0xC1, 0x00]; // RSV1 set, no extension negotiated
        let mut queue = ByteQueue::new();
        queue.append(Bytes::copy_from_slice(&bytes));
        let mut decoder = FrameDecoder::new();
        assert!(matches!(decoder.push(&mut queue), Err(Error::RsvNotZero)));
    }

    #[test]
    fn rejects_masked_server_frames() {
        let bytes = [0x81, 0x85, 0, 0, 0, 0, b'H', b'e', b'l', b'l', b'o'];
        let mut queue = ByteQueue::new();
        queue.append(Bytes::copy_from_slice(&bytes));
        let mut decoder = FrameDecoder::new();
        assert!(matches!(decoder.push(&mut queue), Err(Error::MaskedServerFrame)));
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let bytes = [0x09, 0x00]; // Ping, fin = 0
        let mut queue = ByteQueue::new();
        queue.append(Bytes::copy_from_slice(&bytes));
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.push(&mut queue),
            Err(Error::ControlFramesFragmented)
        ));
    }

    #[test]
    fn needs_more_on_partial_header() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::copy_from_slice(&[0x81]));
        let mut decoder = FrameDecoder::new();
        assert!(matches!(decoder.push(&mut queue).unwrap(), Progress::NeedMore));
    }

    #[test]
    fn empty_payload_finalizes_immediately() {
        let bytes = [0x88, 0x00]; // Close, no payload
        let frame = decode_all(&bytes);
        assert_eq!(frame.opcode, OpCode::Close);
        assert!(frame.payload.is_empty());
    }
}
