use bytes::{Buf, Bytes};
use std::collections::VecDeque;

use crate::error::Error;

/// Accumulates byte chunks arriving from the transport into one logical,
/// contiguous stream, without copying a chunk until it's actually consumed.
///
/// Each chunk is a `bytes::Bytes`, so `advance`/`copy_into` only ever clone a
/// reference-counted view rather than the underlying bytes; the only real
/// copy happens in `copy_into`/`take`, when the decoder materializes a frame
/// header or payload that spans chunk boundaries.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunks: VecDeque<Bytes>,
    length: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains `chunk` by ownership. O(1) amortized.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.length += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Copies `src_end - src_start` bytes, starting at offset `src_start`
    /// into the logical stream, into `dst[dst_offset..]`. Does not mutate
    /// the queue.
    pub fn copy_into(
        &self,
        dst: &mut [u8],
        dst_offset: usize,
        src_start: usize,
        src_end: usize,
    ) -> Result<(), Error> {
        let want = src_end.saturating_sub(src_start);
        if dst.len().saturating_sub(dst_offset) < want {
            return Err(Error::OutOfSpace);
        }
        if src_end > self.length {
            return Err(Error::OutOfSpace);
        }

        let mut remaining_skip = src_start;
        let mut written = 0usize;
        for chunk in &self.chunks {
            if written == want {
                break;
            }
            if remaining_skip >= chunk.len() {
                remaining_skip -= chunk.len();
                continue;
            }
            let chunk_slice = &chunk[remaining_skip..];
            remaining_skip = 0;
            let take = chunk_slice.len().min(want - written);
            dst[dst_offset + written..dst_offset + written + take]
                .copy_from_slice(&chunk_slice[..take]);
            written += take;
        }
        Ok(())
    }

    /// Returns a contiguous copy of bytes in `[start, end)` without mutating
    /// the queue.
    pub fn copy_range(&self, start: usize, end: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; end.saturating_sub(start)];
        self.copy_into(&mut out, 0, start, end)?;
        Ok(out)
    }

    /// Discards `n` bytes from the front. Precondition: `n <= length()`.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.length, "advance past queue length");
        let mut remaining = n;
        while remaining > 0 {
            let front_len = self.chunks.front().map(|c| c.len()).unwrap_or(0);
            if front_len == 0 {
                break;
            }
            if remaining >= front_len {
                self.chunks.pop_front();
                remaining -= front_len;
            } else {
                let front = self.chunks.front_mut().unwrap();
                front.advance(remaining);
                remaining = 0;
            }
        }
        self.length -= n;
    }

    /// Equivalent to `copy_range(0, n)` followed by `advance(n)`.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let out = self.copy_range(0, n)?;
        self.advance(n);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_tracks_appended_chunks() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"hello"));
        queue.append(Bytes::from_static(b" world"));
        assert_eq!(queue.length(), 11);
    }

    #[test]
    fn copy_range_spans_chunk_boundaries_without_mutating() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"abc"));
        queue.append(Bytes::from_static(b"def"));
        queue.append(Bytes::from_static(b"ghi"));

        let mid = queue.copy_range(2, 7).unwrap();
        assert_eq!(mid, b"cdefg");
        // copy_range must not have mutated the queue.
        assert_eq!(queue.length(), 9);
    }

    #[test]
    fn advance_drops_full_chunks_and_trims_partial_head() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"abc"));
        queue.append(Bytes::from_static(b"def"));

        queue.advance(4);
        assert_eq!(queue.length(), 2);
        let rest = queue.copy_range(0, 2).unwrap();
        assert_eq!(rest, b"ef");
    }

    #[test]
    fn advance_commutes_with_copy_range() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"0123456789"));

        let before = queue.copy_range(3, 8).unwrap();
        queue.advance(3);
        let after = queue.copy_range(0, 5).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn take_copies_then_advances() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"hello world"));
        let taken = queue.take(5).unwrap();
        assert_eq!(taken, b"hello");
        assert_eq!(queue.length(), 6);
    }

    #[test]
    fn copy_into_reports_out_of_space() {
        let mut queue = ByteQueue::new();
        queue.append(Bytes::from_static(b"hello"));
        let mut dst = [0u8; 2];
        assert!(queue.copy_into(&mut dst, 0, 0, 5).is_err());
    }
}
