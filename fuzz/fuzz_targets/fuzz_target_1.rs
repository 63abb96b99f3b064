#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use wavesock::byte_queue::ByteQueue;
use wavesock::decoder::{FrameDecoder, Progress};
use wavesock::encoder::FrameEncoder;
use wavesock::frame::{Frame, OpCode};

#[derive(Debug, Arbitrary)]
struct FuzzFrame {
    final_fragment: bool,
    opcode_tag: u8,
    payload: Vec<u8>,
}

impl FuzzFrame {
    fn into_frame(self) -> Frame {
        let opcode = match self.opcode_tag % 6 {
            0 => OpCode::Continue,
            1 => OpCode::Text,
            2 => OpCode::Binary,
            3 => OpCode::Close,
            4 => OpCode::Ping,
            _ => OpCode::Pong,
        };
        let mut payload = self.payload;
        if opcode.is_control() {
            payload.truncate(125);
        }
        Frame::new(self.final_fragment || opcode.is_control(), opcode, payload)
    }
}

fuzz_target!(|data: &[u8]| {
    // The Byte Queue + Inbound Frame Decoder pair must never panic on
    // arbitrary bytes, fed in arbitrary chunks.
    fuzz_chunked_decode(data);

    // Independently, an arbitrary-derived frame must survive an
    // encode -> (server-side) unmask -> decode round trip unchanged.
    if let Ok(fuzz_frame) = FuzzFrame::arbitrary(&mut Unstructured::new(data)) {
        fuzz_roundtrip(fuzz_frame.into_frame());
    }
});

fn fuzz_chunked_decode(data: &[u8]) {
    if data.is_empty() {
        return;
    }
    // The first byte picks a chunk size so repeated fuzzer runs naturally
    // cover many different split points over the same corpus entry.
    let chunk_size = (data[0] as usize % 7) + 1;
    let rest = &data[1..];

    let mut queue = ByteQueue::new();
    let mut decoder = FrameDecoder::new();
    for chunk in rest.chunks(chunk_size) {
        queue.append(bytes::Bytes::copy_from_slice(chunk));
        loop {
            match decoder.push(&mut queue) {
                Ok(Progress::NeedMore) => break,
                Ok(Progress::Done(_)) => decoder = FrameDecoder::new(),
                Err(_) => return,
            }
        }
    }
}

fn fuzz_roundtrip(frame: Frame) {
    let Ok(encoded) = FrameEncoder::encode(&frame) else {
        return;
    };

    let Some(unmasked) = unmask(&encoded) else {
        return;
    };

    let mut queue = ByteQueue::new();
    queue.append(bytes::Bytes::from(unmasked));
    let mut decoder = FrameDecoder::new();
    match decoder.push(&mut queue) {
        Ok(Progress::Done(decoded)) => {
            assert_eq!(decoded.opcode, frame.opcode);
            assert_eq!(decoded.payload, frame.payload);
        }
        Ok(Progress::NeedMore) => panic!("encoder output did not decode to a complete frame"),
        Err(err) => panic!("round trip of a validly encoded frame failed to decode: {err}"),
    }
}

/// Strips the MASK bit and XORs the payload back out, the way a real server
/// handles a client frame, so the decoder (which only accepts unmasked
/// frames) can be exercised against this crate's own encoder output.
fn unmask(buffer: &[u8]) -> Option<Vec<u8>> {
    if buffer.len() < 2 {
        return None;
    }
    let len7 = buffer[1] & 0x7F;
    let (header_len, mask_offset, payload_len) = if len7 < 126 {
        (2, 2, len7 as usize)
    } else if len7 == 126 {
        if buffer.len() < 4 {
            return None;
        }
        (4, 4, u16::from_be_bytes([buffer[2], buffer[3]]) as usize)
    } else {
        if buffer.len() < 10 {
            return None;
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buffer[2..10]);
        (10, 10, u64::from_be_bytes(raw) as usize)
    };

    let payload_offset = mask_offset + 4;
    if buffer.len() < payload_offset + payload_len {
        return None;
    }
    let mask = [
        buffer[mask_offset],
        buffer[mask_offset + 1],
        buffer[mask_offset + 2],
        buffer[mask_offset + 3],
    ];

    let mut out = Vec::with_capacity(header_len + payload_len);
    out.push(buffer[0]);
    out.extend_from_slice(&buffer[1..header_len]);
    out[1] &= 0x7F; // clear the MASK bit now that the key is being dropped
    let mut payload: Vec<u8> = buffer[payload_offset..payload_offset + payload_len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    out.extend_from_slice(&payload);
    Some(out)
}
