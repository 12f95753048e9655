//! Fixed-capacity receive FIFO

/// Result of pushing a chunk from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushOutcome {
    pub accepted: usize,
    pub dropped: usize,
    /// True when this push began a new overrun episode
    pub overrun_started: bool,
}

/// Ring buffer for received bytes.
///
/// When full, incoming bytes are discarded and the bytes already buffered are kept.
/// A run of discarded bytes is one overrun episode; the episode ends as soon as a
/// byte is accepted again, or on `clear()`.
pub struct ReceiveBuffer {
    buffer: Box<[u8]>,
    head: usize,  // Write position
    tail: usize,  // Read position
    count: usize, // Number of bytes
    overrun: bool,
    in_overrun_episode: bool,
    generation: u64,
}

impl ReceiveBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
            overrun: false,
            in_overrun_episode: false,
            generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes_available(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Sticky until `clear()`
    pub fn has_overrun(&self) -> bool {
        self.overrun
    }

    /// Changes whenever bytes are consumed or the buffer is cleared
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push(&mut self, bytes: &[u8]) -> PushOutcome {
        let free = self.capacity() - self.count;
        let accepted = bytes.len().min(free);
        let dropped = bytes.len() - accepted;

        for &byte in &bytes[..accepted] {
            self.buffer[self.head] = byte;
            self.head = (self.head + 1) % self.capacity();
        }
        self.count += accepted;

        if accepted > 0 {
            self.in_overrun_episode = false;
        }

        let mut overrun_started = false;
        if dropped > 0 {
            self.overrun = true;
            if !self.in_overrun_episode {
                self.in_overrun_episode = true;
                overrun_started = true;
            }
        }

        PushOutcome { accepted, dropped, overrun_started }
    }

    pub fn peek(&self) -> Option<u8> {
        self.byte_at(0)
    }

    /// Byte `index` positions after the oldest unread byte
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        if index >= self.count {
            return None;
        }
        Some(self.buffer[(self.tail + index) % self.capacity()])
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.advance(1);
        Some(byte)
    }

    /// Consume up to `max_count` bytes
    pub fn read(&mut self, max_count: usize) -> Vec<u8> {
        let n = max_count.min(self.count);
        let mut out = vec![0; n];
        self.read_into(&mut out);
        out
    }

    /// Consume as many bytes as fit in `dest`, returning how many were copied
    pub fn read_into(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.count);
        if n == 0 {
            return 0;
        }

        // At most two contiguous runs: tail..end, then 0..
        let first = n.min(self.capacity() - self.tail);
        dest[..first].copy_from_slice(&self.buffer[self.tail..self.tail + first]);
        dest[first..n].copy_from_slice(&self.buffer[..n - first]);

        self.advance(n);
        n
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.overrun = false;
        self.in_overrun_episode = false;
        self.generation = self.generation.wrapping_add(1);
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.count);
        self.tail = (self.tail + n) % self.capacity();
        self.count -= n;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl std::fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveBuffer")
            .field("capacity", &self.capacity())
            .field("count", &self.count)
            .field("overrun", &self.overrun)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_is_min_of_pushed_and_capacity() {
        let pushes: [&[u8]; 4] = [b"abc", b"", b"defgh", b"ij"];
        for capacity in [1usize, 4, 10, 16] {
            let mut buffer = ReceiveBuffer::with_capacity(capacity);
            let mut total = 0;
            for p in pushes {
                buffer.push(p);
                total += p.len();
            }
            assert_eq!(buffer.bytes_available(), total.min(capacity));
            assert_eq!(buffer.has_overrun(), total > capacity, "capacity {}", capacity);
        }
    }

    #[test]
    fn test_full_buffer_discards_incoming() {
        let mut buffer = ReceiveBuffer::with_capacity(3);
        let outcome = buffer.push(b"abcd");
        assert_eq!(outcome, PushOutcome { accepted: 3, dropped: 1, overrun_started: true });
        assert_eq!(buffer.read(10), b"abc".to_vec());
    }

    #[test]
    fn test_one_overrun_per_episode() {
        let mut buffer = ReceiveBuffer::with_capacity(2);
        assert!(buffer.push(b"abc").overrun_started);
        // Still saturated: same episode
        assert!(!buffer.push(b"d").overrun_started);
        assert!(!buffer.push(b"ef").overrun_started);

        assert_eq!(buffer.read_byte(), Some(b'a'));
        // Accepts one byte, drops the next: a fresh episode
        let outcome = buffer.push(b"gh");
        assert_eq!(outcome.accepted, 1);
        assert!(outcome.overrun_started);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let mut buffer = ReceiveBuffer::with_capacity(4);
        buffer.push(b"abc");
        assert_eq!(buffer.read(2), b"ab".to_vec());
        buffer.push(b"def");
        assert_eq!(buffer.byte_at(3), Some(b'f'));
        let mut dest = [0u8; 8];
        let n = buffer.read_into(&mut dest);
        assert_eq!(&dest[..n], b"cdef");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buffer = ReceiveBuffer::with_capacity(4);
        assert_eq!(buffer.peek(), None);
        buffer.push(b"x");
        assert_eq!(buffer.peek(), Some(b'x'));
        assert_eq!(buffer.bytes_available(), 1);
        assert_eq!(buffer.read_byte(), Some(b'x'));
        assert_eq!(buffer.read_byte(), None);
    }

    #[test]
    fn test_clear_resets_overrun_and_bumps_generation() {
        let mut buffer = ReceiveBuffer::with_capacity(2);
        buffer.push(b"abc");
        let generation = buffer.generation();
        buffer.clear();
        assert_eq!(buffer.bytes_available(), 0);
        assert!(!buffer.has_overrun());
        assert_eq!(buffer.capacity(), 2);
        assert_ne!(buffer.generation(), generation);
        // Saturating again after clear is a new episode
        assert!(buffer.push(b"xyz").overrun_started);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let mut buffer = ReceiveBuffer::with_capacity(0);
        let outcome = buffer.push(b"ab");
        assert_eq!(outcome.accepted, 0);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(buffer.read(4), Vec::<u8>::new());
        assert_eq!(buffer.peek(), None);
    }
}
