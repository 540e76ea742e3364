//! Receive accumulator for not-yet-parsed WebSocket bytes.
//!
//! Bytes are appended at the tail and dropped from the front only after the
//! decoder has parsed complete frames out of them. Consumed bytes are tracked
//! with a cursor instead of shifting the vector on every frame; the live
//! region is moved down only once the dead prefix is at least as large as
//! what remains, which keeps the copying amortised O(1) per byte.

/// Growable byte buffer with an explicit consumed-offset cursor.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed by the decoder.
    pub fn unparsed(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// Drop `n` bytes from the front of the unparsed region.
    ///
    /// `n` is clamped to the unparsed length.
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.buf.len());
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn compact(&mut self) {
        if self.start > 0 && self.start >= self.buf.len() - self.start {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}
