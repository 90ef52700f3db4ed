//! Frame synchroniser
//!
//! Bytes are discarded until a start marker is seen, then exactly
//! [`FRAME_LEN`] bytes are collected and CRC checked. Start markers within a
//! frame do not resynchronise, and there is no inter-byte timeout, so a
//! partial frame is held until the remaining bytes arrive.

use embedded_hal::serial::Write;

use crate::crc::crc8;
use crate::protocol::{Frame, FRAME_LEN, FRAME_START};
use crate::transport::Transport;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Scanning for a start marker
    WaitStart,
    /// Start marker received, filling the frame buffer
    Collecting,
}

pub struct Parser {
    state: State,
    buff: [u8; FRAME_LEN],
    index: usize,
}

impl Parser {
    /// Create a new parser, waiting for a start marker
    pub const fn new() -> Self {
        Self {
            state: State::WaitStart,
            buff: [0u8; FRAME_LEN],
            index: 0,
        }
    }

    /// Fetch the parser state
    pub fn state(&self) -> State {
        self.state
    }

    /// Number of bytes collected towards the current frame
    pub fn pending(&self) -> usize {
        self.index
    }

    /// Feed a single byte, returning a frame when one completes with a valid CRC
    pub fn feed(&mut self, b: u8) -> Option<Frame> {
        match self.state {
            State::WaitStart => {
                if b != FRAME_START {
                    trace!("Discarding 0x{:02x} while waiting for start", b);
                    return None;
                }

                self.buff[0] = b;
                self.index = 1;
                self.state = State::Collecting;

                None
            }
            State::Collecting => {
                self.buff[self.index] = b;
                self.index += 1;

                if self.index < FRAME_LEN {
                    return None;
                }

                self.index = 0;
                self.state = State::WaitStart;

                let calc = crc8(&self.buff[..FRAME_LEN - 1]);
                let rx = self.buff[FRAME_LEN - 1];

                if calc != rx {
                    debug!("Dropping frame, CRC 0x{:02x} expected 0x{:02x}", rx, calc);
                    return None;
                }

                Some(Frame::from_checked(self.buff))
            }
        }
    }

    /// Drain available bytes from the transport until a frame completes
    /// or no more data is buffered
    pub fn poll<S, E>(&mut self, transport: &mut Transport<'_, S>) -> Option<Frame>
    where
        S: Write<u8, Error = E>,
    {
        while let Some(b) = transport.pop() {
            if let Some(f) = self.feed(b) {
                return Some(f);
            }
        }

        None
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
