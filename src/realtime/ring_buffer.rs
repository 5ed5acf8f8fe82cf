//! Lock-free single-producer/single-consumer byte ring
//!
//! A fixed-capacity byte arena shared by exactly one producer and one
//! consumer:
//! - Producer: copies whole payloads in with [`RingProducer::put`] /
//!   [`RingProducer::put_all`], which publish all bytes at once or nothing
//! - Consumer: inspects with [`RingConsumer::peek`] and consumes with
//!   [`RingConsumer::get`] / [`RingConsumer::discard`]
//!
//! Cursors live in `[0, 2 * capacity)` so a full ring and an empty ring are
//! distinguishable without sacrificing a byte. Each cursor is stored by one
//! side only (release) and loaded by the other (acquire); the byte range
//! between them is owned by whichever side may touch it. Capacity is fixed at
//! construction and the arena never reallocates.

use crate::{FmError, Result};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest accepted capacity (64 MiB)
pub const MAX_CAPACITY: usize = 64 * 1024 * 1024;

struct Shared {
    buffer: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    /// Consumer cursor, stored only by the consumer
    read_pos: AtomicUsize,
    /// Producer cursor, stored only by the producer
    write_pos: AtomicUsize,
}

// SAFETY: the producer only writes bytes in the free region [write, read + cap)
// and the consumer only reads bytes in the used region [read, write). Each
// region changes hands through a release store of the owning cursor and an
// acquire load by the other side, so no byte is accessed concurrently.
unsafe impl Sync for Shared {}

impl Shared {
    fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(FmError::ConfigError(
                "Ring buffer capacity must be greater than 0".into(),
            ));
        }
        if capacity > MAX_CAPACITY {
            return Err(FmError::ConfigError(format!(
                "Ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }
        Ok(Shared {
            buffer: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            capacity,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        })
    }

    fn used(&self, write: usize, read: usize) -> usize {
        if write >= read {
            write - read
        } else {
            write + 2 * self.capacity - read
        }
    }

    fn index(&self, pos: usize) -> usize {
        if pos >= self.capacity {
            pos - self.capacity
        } else {
            pos
        }
    }

    fn advance(&self, pos: usize, count: usize) -> usize {
        (pos + count) % (2 * self.capacity)
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.buffer.as_ptr())
    }

    /// Copy `data` into the arena starting at cursor `pos`
    ///
    /// # Safety
    /// The caller must be the producer and `data.len()` bytes from `pos` must
    /// be free.
    unsafe fn copy_in(&self, pos: usize, data: &[u8]) {
        let idx = self.index(pos);
        let first = data.len().min(self.capacity - idx);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(idx), first);
        std::ptr::copy_nonoverlapping(data.as_ptr().add(first), self.base(), data.len() - first);
    }

    /// Copy `out.len()` bytes starting at cursor `pos` out of the arena
    ///
    /// # Safety
    /// The caller must be the consumer and `out.len()` bytes from `pos` must be
    /// in use.
    unsafe fn copy_out(&self, pos: usize, out: &mut [u8]) {
        let idx = self.index(pos);
        let first = out.len().min(self.capacity - idx);
        std::ptr::copy_nonoverlapping(self.base().add(idx), out.as_mut_ptr(), first);
        std::ptr::copy_nonoverlapping(self.base(), out.as_mut_ptr().add(first), out.len() - first);
    }

    fn size_used(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        self.used(write, read)
    }

    fn size_free(&self) -> usize {
        self.capacity - self.size_used()
    }

    fn put_all(&self, parts: &[&[u8]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        if self.capacity - self.used(write, read) < total {
            return false;
        }
        let mut pos = write;
        for part in parts {
            // SAFETY: producer side; `total` free bytes were checked above
            unsafe { self.copy_in(pos, part) };
            pos = self.advance(pos, part.len());
        }
        self.write_pos.store(pos, Ordering::Release);
        true
    }

    fn peek(&self, out: &mut [u8]) -> bool {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        if self.used(write, read) < out.len() {
            return false;
        }
        // SAFETY: consumer side; `out.len()` used bytes were checked above
        unsafe { self.copy_out(read, out) };
        true
    }

    fn discard(&self, count: usize) -> bool {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        if self.used(write, read) < count {
            return false;
        }
        self.read_pos
            .store(self.advance(read, count), Ordering::Release);
        true
    }

    fn get(&self, out: &mut [u8]) -> bool {
        self.peek(out) && self.discard(out.len())
    }
}

/// Fixed-capacity byte ring
///
/// Owned as a whole it offers every operation through `&mut self`; call
/// [`RingBuffer::split`] to hand the two ends to different threads.
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is 0 or above [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(RingBuffer {
            shared: Arc::new(Shared::new(capacity)?),
        })
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes that can be written
    pub fn size_free(&self) -> usize {
        self.shared.size_free()
    }

    /// Bytes that can be read
    pub fn size_used(&self) -> usize {
        self.shared.size_used()
    }

    /// Copy `data` in if it fits entirely; returns false otherwise
    pub fn put(&mut self, data: &[u8]) -> bool {
        self.shared.put_all(&[data])
    }

    /// Fill `out` with the next bytes without consuming them
    pub fn peek(&self, out: &mut [u8]) -> bool {
        self.shared.peek(out)
    }

    /// Consume exactly `out.len()` bytes into `out`
    pub fn get(&mut self, out: &mut [u8]) -> bool {
        self.shared.get(out)
    }

    /// Consume `count` bytes without copying
    pub fn discard(&mut self, count: usize) -> bool {
        self.shared.discard(count)
    }

    /// Split into the producer and consumer ends
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                shared: Arc::clone(&self.shared),
            },
            RingConsumer {
                shared: self.shared,
            },
        )
    }
}

/// Writing end of a [`RingBuffer`]
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes that can be written right now
    pub fn size_free(&self) -> usize {
        self.shared.size_free()
    }

    /// Copy `data` in if it fits entirely; returns false otherwise
    ///
    /// Never blocks. Retrying is the caller's business.
    pub fn put(&mut self, data: &[u8]) -> bool {
        self.shared.put_all(&[data])
    }

    /// Copy several slices in as one unit: the consumer sees all or none
    pub fn put_all(&mut self, parts: &[&[u8]]) -> bool {
        self.shared.put_all(parts)
    }
}

/// Reading end of a [`RingBuffer`]
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Bytes that can be read right now
    pub fn size_used(&self) -> usize {
        self.shared.size_used()
    }

    /// Fill `out` with the next bytes without consuming them
    pub fn peek(&self, out: &mut [u8]) -> bool {
        self.shared.peek(out)
    }

    /// Consume exactly `out.len()` bytes into `out`
    ///
    /// Returns false, consuming nothing, when fewer bytes are available.
    pub fn get(&mut self, out: &mut [u8]) -> bool {
        self.shared.get(out)
    }

    /// Consume `count` bytes without copying
    pub fn discard(&mut self, count: usize) -> bool {
        self.shared.discard(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_creation() {
        let rb = RingBuffer::new(1000).unwrap();
        assert_eq!(rb.capacity(), 1000);
        assert_eq!(rb.size_used(), 0);
        assert_eq!(rb.size_free(), 1000);
    }

    #[test]
    fn test_zero_capacity_error() {
        let result = RingBuffer::new(0);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("greater than 0"));
    }

    #[test]
    fn test_max_capacity_exceeded() {
        let result = RingBuffer::new(MAX_CAPACITY + 1);
        assert!(result.err().unwrap().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_put_and_get() {
        let mut rb = RingBuffer::new(16).unwrap();
        assert!(rb.put(&[1, 2, 3, 4]));
        assert_eq!(rb.size_used(), 4);

        let mut peeked = [0u8; 2];
        assert!(rb.peek(&mut peeked));
        assert_eq!(peeked, [1, 2]);
        assert_eq!(rb.size_used(), 4);

        let mut out = [0u8; 4];
        assert!(rb.get(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(rb.size_used(), 0);
    }

    #[test]
    fn test_full_capacity_usable() {
        let mut rb = RingBuffer::new(8).unwrap();
        assert!(rb.put(&[9; 8]));
        assert_eq!(rb.size_free(), 0);
        assert!(!rb.put(&[1]));
        assert!(rb.discard(8));
        assert!(rb.put(&[1; 8]));
    }

    #[test]
    fn test_put_rejects_when_short_of_space() {
        let mut rb = RingBuffer::new(8).unwrap();
        assert!(rb.put(&[0; 5]));
        assert!(!rb.put(&[0; 4]));
        // A failed put leaves the ring untouched
        assert_eq!(rb.size_used(), 5);
    }

    #[test]
    fn test_get_and_discard_never_overrun() {
        let mut rb = RingBuffer::new(8).unwrap();
        rb.put(&[1, 2, 3]);
        let mut out = [0u8; 4];
        assert!(!rb.get(&mut out));
        assert!(!rb.discard(4));
        assert_eq!(rb.size_used(), 3);
    }

    #[test]
    fn test_wrap_around_preserves_bytes() {
        let mut rb = RingBuffer::new(10).unwrap();
        let mut out = [0u8; 7];
        for round in 0u8..20 {
            let data: Vec<u8> = (0..7).map(|i| round.wrapping_mul(7).wrapping_add(i)).collect();
            assert!(rb.put(&data));
            assert!(rb.get(&mut out));
            assert_eq!(&out[..], &data[..], "round {round}");
        }
    }

    #[test]
    fn test_put_all_is_one_unit() {
        let mut rb = RingBuffer::new(8).unwrap();
        let (mut producer, mut consumer) = {
            rb.put(&[0; 2]);
            rb.split()
        };
        assert!(!producer.put_all(&[&[1, 2, 3], &[4, 5, 6, 7]]));
        assert_eq!(consumer.size_used(), 2);
        assert!(consumer.discard(2));
        assert!(producer.put_all(&[&[1, 2, 3], &[4, 5, 6, 7]]));
        let mut out = [0u8; 7];
        assert!(consumer.get(&mut out));
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_fifo_across_threads() {
        const MESSAGES: u32 = 20_000;
        let (mut producer, mut consumer) = RingBuffer::new(64).unwrap().split();

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for i in 0..MESSAGES {
                    let bytes = i.to_le_bytes();
                    while !producer.put(&bytes) {
                        std::thread::yield_now();
                    }
                }
            });

            let mut expected = 0u32;
            let mut buf = [0u8; 4];
            while expected < MESSAGES {
                if consumer.get(&mut buf) {
                    assert_eq!(u32::from_le_bytes(buf), expected);
                    expected += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
    }
}
