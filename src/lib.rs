//! STM32 frame protocol bootloader.
//!
//! Device side: an interrupt fed receive buffer, a fixed length CRC-8 frame
//! parser, the command dispatcher and the autoboot / application handoff logic.
//! Host side (`std`): a client for talking to the bootloader over a serial port.

#![cfg_attr(not(feature = "std"), no_std)]

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod boot;
pub mod bootloader;
pub mod crc;
pub mod dispatch;
pub mod handoff;
pub mod image;
pub mod parser;
pub mod protocol;
pub mod ring;
pub mod transport;

#[cfg(feature = "std")]
pub mod client;

#[cfg(feature = "linux")]
pub mod linux;

pub use crate::boot::{decide, BootDecision, BootOverride, MemoryLayout, NoOverride};
pub use crate::bootloader::{Bootloader, Config};
pub use crate::dispatch::{BuildInfo, Dispatcher, Version};
pub use crate::handoff::{jump_to_app, Handoff};
pub use crate::image::{AppDescriptor, DeviceInfo, FlashImage, ImageSource};
pub use crate::parser::Parser;
pub use crate::protocol::{Command, Frame, Status};
pub use crate::ring::{Consumer, Producer, RingBuffer};
pub use crate::transport::Transport;

#[cfg(feature = "std")]
pub use crate::client::{Client, Options, SerialPort};

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error<SerialError> {
    /// Underlying serial port error
    #[cfg_attr(feature = "std", error("serial error: {0:?}"))]
    Serial(SerialError),

    /// No response frame within the response timeout
    #[cfg_attr(feature = "std", error("timeout awaiting response"))]
    ResponseTimeout,

    /// Response frame did not have the expected contents
    #[cfg_attr(feature = "std", error("invalid response"))]
    InvalidResponse,

    /// Device answered with an error status
    #[cfg_attr(feature = "std", error("command 0x{command:02x} rejected by device"))]
    Rejected { command: u8 },

    /// Response echoed a different command to the request
    #[cfg_attr(
        feature = "std",
        error("response for command 0x{actual:02x}, expected 0x{expected:02x}")
    )]
    UnexpectedCommand { expected: u8, actual: u8 },
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}
