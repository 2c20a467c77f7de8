//! Fixed-capacity circular byte buffer
//!
//! Single-producer/single-consumer: one task only ever advances the write
//! cursor, another only ever advances the read cursor. Cursors are published
//! with release stores and observed with acquire loads, so bytes written
//! before a cursor advance are visible to the other side without a lock.
//!
//! One slot is always left empty to tell full from empty, so at most
//! `capacity - 1` bytes are ever available.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lock-free SPSC byte ring
pub struct RingBuffer {
    slots: Box<[AtomicU8]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl RingBuffer {
    /// Allocate a zeroed ring of `capacity` bytes
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is less than 2
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2 bytes");
        let slots = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        Self {
            slots,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Total slots, including the reserved one
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bytes written but not yet read: `(write - read) mod capacity`
    #[must_use]
    pub fn available(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        self.distance(r, w)
    }

    /// Bytes that can be written without overwriting unread data
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - 1 - self.available()
    }

    /// Current write cursor
    #[must_use]
    pub fn write_pos(&self) -> usize {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Current read cursor
    #[must_use]
    pub fn read_pos(&self) -> usize {
        self.read_pos.load(Ordering::Acquire)
    }

    /// Append as much of `data` as fits, returning the number of bytes written
    ///
    /// Producer side only.
    pub fn write(&self, data: &[u8]) -> usize {
        let cap = self.capacity();
        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        let free = cap - 1 - self.distance(r, w);
        let n = data.len().min(free);

        for (i, byte) in data[..n].iter().enumerate() {
            self.slots[(w + i) % cap].store(*byte, Ordering::Relaxed);
        }

        self.write_pos.store((w + n) % cap, Ordering::Release);
        n
    }

    /// Move up to `out.len()` bytes into `out`, returning the number read
    ///
    /// Handles wraparound across the end of the storage. Consumer side only.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let cap = self.capacity();
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Relaxed);
        let n = out.len().min(self.distance(r, w));

        for (i, byte) in out[..n].iter_mut().enumerate() {
            *byte = self.slots[(r + i) % cap].load(Ordering::Relaxed);
        }

        self.read_pos.store((r + n) % cap, Ordering::Release);
        n
    }

    /// Keep the read cursor on a PCM16 sample boundary
    ///
    /// If the cursor is odd and a byte is available, skips one byte and returns
    /// true. Consumer side only.
    pub fn align_read(&self) -> bool {
        let cap = self.capacity();
        let r = self.read_pos.load(Ordering::Relaxed);
        if r % 2 == 0 {
            return false;
        }

        let w = self.write_pos.load(Ordering::Acquire);
        if self.distance(r, w) == 0 {
            return false;
        }

        self.read_pos.store((r + 1) % cap, Ordering::Release);
        true
    }

    /// Zero the storage and reset both cursors
    ///
    /// Must only be called while neither producer nor consumer is active.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        let cap = self.capacity();
        (to + cap - from) % cap
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("write_pos", &self.write_pos())
            .field("read_pos", &self.read_pos())
            .field("available", &self.available())
            .finish()
    }
}
