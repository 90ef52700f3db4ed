//! Receive ring buffer bridging the UART interrupt and the main loop.
//!
//! The buffer is split into a [`Producer`], owned by the receive interrupt,
//! and a [`Consumer`], owned by the main loop. Each side only ever stores to
//! its own index, and that store is the last write of the operation, so no
//! lock is required between the two contexts.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Receive buffer capacity in bytes
pub const RX_BUFF_LEN: usize = 256;

/// Fixed capacity single-producer / single-consumer byte queue
pub struct RingBuffer {
    buff: UnsafeCell<[u8; RX_BUFF_LEN]>,
    // Free running indices, slot is `index % RX_BUFF_LEN`
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safe as long as there is at most one producer and one consumer,
// which `split` enforces via the exclusive borrow.
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a new empty ring buffer
    pub const fn new() -> Self {
        Self {
            buff: UnsafeCell::new([0u8; RX_BUFF_LEN]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Split the buffer into interrupt (producer) and main loop (consumer) handles
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        let rb: &Self = self;
        (
            Producer { rb, _not_sync: PhantomData },
            Consumer { rb, _not_sync: PhantomData },
        )
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Check whether the buffer holds no data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the buffer capacity
    pub const fn capacity(&self) -> usize {
        RX_BUFF_LEN
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt side of the ring buffer
pub struct Producer<'a> {
    rb: &'a RingBuffer,
    _not_sync: PhantomData<*const ()>,
}

// A producer may be moved into the interrupt context, but not shared.
unsafe impl<'a> Send for Producer<'a> {}

impl<'a> Producer<'a> {
    /// Enqueue a received byte.
    ///
    /// When the buffer is full the byte is dropped and `false` is returned,
    /// unread data is never overwritten.
    pub fn push(&mut self, byte: u8) -> bool {
        let head = self.rb.head.load(Ordering::Relaxed);
        let tail = self.rb.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= RX_BUFF_LEN {
            return false;
        }

        // Slot is not visible to the consumer until head is published
        unsafe {
            (*self.rb.buff.get())[head % RX_BUFF_LEN] = byte;
        }
        self.rb.head.store(head.wrapping_add(1), Ordering::Release);

        true
    }
}

/// Main loop side of the ring buffer
pub struct Consumer<'a> {
    rb: &'a RingBuffer,
    _not_sync: PhantomData<*const ()>,
}

unsafe impl<'a> Send for Consumer<'a> {}

impl<'a> Consumer<'a> {
    /// Dequeue the oldest byte, if any
    pub fn pop(&mut self) -> Option<u8> {
        let tail = self.rb.tail.load(Ordering::Relaxed);
        let head = self.rb.head.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let byte = unsafe { (*self.rb.buff.get())[tail % RX_BUFF_LEN] };
        self.rb.tail.store(tail.wrapping_add(1), Ordering::Release);

        Some(byte)
    }

    /// Check whether any bytes are waiting
    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }
}
