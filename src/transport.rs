//! Main loop side of the UART link

use embedded_hal::serial::Write;

use crate::ring::Consumer;
use crate::Error;

/// Byte transport, combining the receive ring consumer with a blocking transmitter
pub struct Transport<'a, S> {
    rx: Consumer<'a>,
    tx: S,
}

impl<'a, S, E> Transport<'a, S>
where
    S: Write<u8, Error = E>,
{
    /// Create a transport from the ring buffer consumer and serial transmitter
    pub fn new(rx: Consumer<'a>, tx: S) -> Self {
        Self { rx, tx }
    }

    /// Fetch the next received byte without blocking
    pub fn pop(&mut self) -> Option<u8> {
        self.rx.pop()
    }

    /// Transmit a buffer, returning once the final byte has left the wire
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.tx.write(*b))?;
        }

        // Wait for transmission complete
        block!(self.tx.flush())?;

        Ok(())
    }

    /// Release the underlying transmitter
    pub fn free(self) -> (Consumer<'a>, S) {
        (self.rx, self.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingBuffer;

    /// Transmitter that reports busy on every other poll
    struct SlowTx {
        out: [u8; 8],
        n: usize,
        busy: bool,
        flushed: bool,
    }

    impl Write<u8> for SlowTx {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.busy = !self.busy;
            if self.busy {
                return Err(nb::Error::WouldBlock);
            }
            self.out[self.n] = word;
            self.n += 1;
            self.flushed = false;
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            self.busy = !self.busy;
            if self.busy {
                return Err(nb::Error::WouldBlock);
            }
            self.flushed = true;
            Ok(())
        }
    }

    #[test]
    fn send_blocks_until_complete() {
        let mut rb = RingBuffer::new();
        let (_p, c) = rb.split();
        let tx = SlowTx { out: [0u8; 8], n: 0, busy: false, flushed: false };

        let mut t = Transport::new(c, tx);
        t.send(&[1, 2, 3]).unwrap();

        let (_c, tx) = t.free();
        assert_eq!(&tx.out[..tx.n], &[1, 2, 3]);
        assert!(tx.flushed);
    }

    struct BrokenTx;

    impl Write<u8> for BrokenTx {
        type Error = u8;

        fn write(&mut self, _word: u8) -> nb::Result<(), u8> {
            Err(nb::Error::Other(7))
        }

        fn flush(&mut self) -> nb::Result<(), u8> {
            Ok(())
        }
    }

    #[test]
    fn send_propagates_serial_errors() {
        let mut rb = RingBuffer::new();
        let (_p, c) = rb.split();

        let mut t = Transport::new(c, BrokenTx);
        assert_eq!(t.send(&[0]), Err(Error::Serial(7)));
    }

    #[test]
    fn pop_reads_from_ring() {
        let mut rb = RingBuffer::new();
        let (mut p, c) = rb.split();
        let mut t = Transport::new(c, BrokenTx);

        p.push(0xB2);
        assert_eq!(t.pop(), Some(0xB2));
        assert_eq!(t.pop(), None);
    }
}
