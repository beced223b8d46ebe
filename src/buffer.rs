//! Sliding byte buffer for the demuxer input.
//!
//! The demuxer accumulates fed bytes here until synchronization is acquired
//! and whole 188-byte packets can be consumed. The buffer is bounded: on
//! overflow the oldest bytes are dropped so the most recent data survives.
//! That trim is diagnostic-only — iterations are assembled as packets are
//! consumed, never reconstructed from this buffer after the fact.

use crate::packet::TS_PACKET_SIZE;

/// Maximum number of whole packets the input buffer may hold.
pub const MAX_BUFFER_PACKETS: usize = 100;

/// Maximum input buffer size in bytes (188 * 100 = 18 800).
pub const MAX_BUFFER_SIZE: usize = TS_PACKET_SIZE * MAX_BUFFER_PACKETS;

/// Append-only sliding byte buffer with head trim.
///
/// Absolute offsets into the buffer are invalidated by [`trim_front`];
/// callers must rebase after any trim.
///
/// [`trim_front`]: ByteBuffer::trim_front
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    /// Create an empty buffer with full capacity reserved.
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MAX_BUFFER_SIZE),
        }
    }

    /// Append bytes, dropping the oldest data if the cap is exceeded.
    ///
    /// The trim is unconditional and may slice a packet in two; the next
    /// acquisition pass treats the remainder as garbage.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > MAX_BUFFER_SIZE {
            let overflow = self.data.len() - MAX_BUFFER_SIZE;
            self.data.drain(..overflow);
        }
    }

    /// Drop the first `n` bytes. All previously returned offsets are invalid
    /// afterwards.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    /// View of the buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3]);
        buf.append(&[4, 5]);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_trim_front() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3, 4, 5]);
        buf.trim_front(2);

        assert_eq!(buf.as_slice(), &[3, 4, 5]);

        // Trimming more than the length empties the buffer.
        buf.trim_front(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut buf = ByteBuffer::new();
        buf.append(&vec![0u8; MAX_BUFFER_SIZE]);
        buf.append(&[0xAA, 0xBB]);

        assert_eq!(buf.len(), MAX_BUFFER_SIZE);
        let tail = &buf.as_slice()[MAX_BUFFER_SIZE - 2..];
        assert_eq!(tail, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_single_oversized_append() {
        let mut buf = ByteBuffer::new();
        let big: Vec<u8> = (0..MAX_BUFFER_SIZE + 100).map(|i| (i % 251) as u8).collect();
        buf.append(&big);

        assert_eq!(buf.len(), MAX_BUFFER_SIZE);
        assert_eq!(buf.as_slice(), &big[100..]);
    }

    #[test]
    fn test_clear() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1, 2, 3]);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }
}
