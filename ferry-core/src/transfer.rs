//! Upload byte-stream state
//!
//! While a PendingTransfer is attached to a connection the inbound stream is
//! raw bytes, not lines: the event loop feeds everything it reads into the
//! transfer until the announced size is reached or the inactivity deadline
//! lapses. Bytes beyond the announced size belong to the line protocol again
//! and are handed back to the caller.

use bytes::{BufMut, BytesMut};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct PendingTransfer {
    filename: String,
    expected: u64,
    received: BytesMut,
    idle_timeout: Duration,
    last_byte_at: Instant,
}

impl PendingTransfer {
    pub fn new(filename: String, expected: u64, idle_timeout: Duration) -> Self {
        Self {
            filename,
            expected,
            received: BytesMut::with_capacity(expected.min(64 * 1024) as usize),
            idle_timeout,
            last_byte_at: Instant::now(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn received(&self) -> u64 {
        self.received.len() as u64
    }

    /// Consume inbound bytes, returning any surplus past the announced size.
    /// Surplus bytes are the start of the next line-mode input.
    pub fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        if !data.is_empty() {
            self.last_byte_at = Instant::now();
        }
        let remaining = (self.expected - self.received()) as usize;
        let take = remaining.min(data.len());
        self.received.put_slice(&data[..take]);
        data[take..].to_vec()
    }

    pub fn is_complete(&self) -> bool {
        self.received() >= self.expected
    }

    /// True once no bytes have arrived for longer than the idle timeout.
    pub fn is_expired(&self) -> bool {
        self.last_byte_at.elapsed() > self.idle_timeout
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.received.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(expected: u64) -> PendingTransfer {
        PendingTransfer::new("f.bin".to_string(), expected, Duration::from_secs(10))
    }

    #[test]
    fn test_zero_byte_transfer_is_immediately_complete() {
        let t = transfer(0);
        assert!(t.is_complete());
        assert!(t.into_bytes().is_empty());
    }

    #[test]
    fn test_partial_feed_accumulates() {
        let mut t = transfer(10);
        assert!(t.feed(b"hello").is_empty());
        assert!(!t.is_complete());
        assert!(t.feed(b" worl").is_empty());
        assert!(t.is_complete());
        assert_eq!(t.into_bytes(), b"hello worl");
    }

    #[test]
    fn test_surplus_bytes_are_returned() {
        let mut t = transfer(5);
        let surplus = t.feed(b"hello\n/list\n");
        assert!(t.is_complete());
        assert_eq!(surplus, b"\n/list\n");
        assert_eq!(t.into_bytes(), b"hello");
    }

    #[test]
    fn test_idle_deadline() {
        let mut t = PendingTransfer::new("f.bin".to_string(), 10, Duration::from_millis(0));
        t.feed(b"abc");
        std::thread::sleep(Duration::from_millis(5));
        assert!(t.is_expired());
        assert!(!t.is_complete());
    }
}
