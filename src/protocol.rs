//! Bootloader frame protocol
//!
//! Every request and response is a fixed 64 byte frame:
//!
//! | byte  | field            |
//! |-------|------------------|
//! | 0     | address (0xB2)   |
//! | 1     | status           |
//! | 2     | command          |
//! | 3     | param            |
//! | 4..63 | payload, 0 padded|
//! | 63    | CRC-8 of 0..63   |

use core::convert::TryFrom;

use crate::crc::crc8;

/// Start of frame marker, doubles as the device address
pub const FRAME_START: u8 = 0xB2;
pub const DEV_ADDR: u8 = FRAME_START;

pub const FRAME_LEN: usize = 64;
pub const HEADER_LEN: usize = 4;
/// Usable payload, the final byte of the frame is the CRC
pub const PAYLOAD_LEN: usize = FRAME_LEN - HEADER_LEN - 1;

pub const STATUS_OK: u8 = 0x40;
pub const STATUS_ERR: u8 = 0x7F;

/// Payload of a ping response
pub const PING_PAYLOAD: [u8; 3] = [0xFF, 0xFF, 0xFF];

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    /// Liveness check
    Ping = 0x00,

    /// Fetch the bootloader version triple
    GetVersion = 0x10,

    /// Fetch the bootloader build date string
    GetBuildDate = 0x11,

    /// Fetch the raw device information record from flash
    GetDeviceInfo = 0x20,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Command::Ping),
            0x10 => Ok(Command::GetVersion),
            0x11 => Ok(Command::GetBuildDate),
            0x20 => Ok(Command::GetDeviceInfo),
            _ => Err(v),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Status {
    Ok = 0x40,
    Err = 0x7F,
}

/// A complete, CRC-checked protocol frame
#[derive(Clone, PartialEq)]
pub struct Frame([u8; FRAME_LEN]);

/// Reasons a raw buffer is not a valid frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FrameError {
    Length(usize),
    Start(u8),
    Crc { expected: u8, actual: u8 },
}

impl Frame {
    /// Build a frame from header fields and payload, computing the CRC.
    ///
    /// Payloads longer than [`PAYLOAD_LEN`] are truncated.
    pub fn new(status: u8, command: u8, param: u8, payload: &[u8]) -> Self {
        let mut b = [0u8; FRAME_LEN];
        b[0] = DEV_ADDR;
        b[1] = status;
        b[2] = command;
        b[3] = param;

        let n = payload.len().min(PAYLOAD_LEN);
        b[HEADER_LEN..HEADER_LEN + n].copy_from_slice(&payload[..n]);

        b[FRAME_LEN - 1] = crc8(&b[..FRAME_LEN - 1]);

        Frame(b)
    }

    /// Build a host request frame
    pub fn request(command: u8, param: u8) -> Self {
        Self::new(0x00, command, param, &[])
    }

    /// Build a device response frame
    pub fn response(status: Status, command: u8, payload: &[u8]) -> Self {
        Self::new(status as u8, command, 0x00, payload)
    }

    /// Wrap raw bytes that have already been CRC checked
    pub(crate) fn from_checked(b: [u8; FRAME_LEN]) -> Self {
        Frame(b)
    }

    pub fn address(&self) -> u8 {
        self.0[0]
    }

    pub fn status(&self) -> u8 {
        self.0[1]
    }

    pub fn command(&self) -> u8 {
        self.0[2]
    }

    pub fn param(&self) -> u8 {
        self.0[3]
    }

    /// Payload area including zero padding
    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..FRAME_LEN - 1]
    }

    pub fn crc(&self) -> u8 {
        self.0[FRAME_LEN - 1]
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        if b.len() != FRAME_LEN {
            return Err(FrameError::Length(b.len()));
        }
        if b[0] != FRAME_START {
            return Err(FrameError::Start(b[0]));
        }

        let expected = crc8(&b[..FRAME_LEN - 1]);
        let actual = b[FRAME_LEN - 1];
        if expected != actual {
            return Err(FrameError::Crc { expected, actual });
        }

        let mut f = [0u8; FRAME_LEN];
        f.copy_from_slice(b);
        Ok(Frame(f))
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("address", &format_args!("0x{:02x}", self.address()))
            .field("status", &format_args!("0x{:02x}", self.status()))
            .field("command", &format_args!("0x{:02x}", self.command()))
            .field("param", &format_args!("0x{:02x}", self.param()))
            .field("crc", &format_args!("0x{:02x}", self.crc()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_padded_and_truncated() {
        let f = Frame::response(Status::Ok, 0x11, &[0x55; 80]);

        assert_eq!(f.payload().len(), PAYLOAD_LEN);
        assert!(f.payload().iter().all(|b| *b == 0x55));
        assert_eq!(f.crc(), crc8(&f.as_bytes()[..FRAME_LEN - 1]));

        let f = Frame::response(Status::Ok, 0x00, &PING_PAYLOAD);
        assert_eq!(&f.payload()[..3], &PING_PAYLOAD);
        assert!(f.payload()[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn ping_request_layout() {
        let f = Frame::request(Command::Ping as u8, 0);

        assert_eq!(f.as_bytes()[..4], [0xB2, 0x00, 0x00, 0x00]);
        assert_eq!(f.crc(), 0x6A);
    }

    #[test]
    fn parse_rejects_bad_frames() {
        let f = Frame::request(0x10, 0);
        let mut raw = *f.as_bytes();

        assert_eq!(Frame::try_from(&raw[..]), Ok(f.clone()));
        assert_eq!(Frame::try_from(&raw[..10]), Err(FrameError::Length(10)));

        raw[5] ^= 0x01;
        assert!(matches!(Frame::try_from(&raw[..]), Err(FrameError::Crc { .. })));

        raw[0] = 0x00;
        assert_eq!(Frame::try_from(&raw[..]), Err(FrameError::Start(0x00)));
    }

    #[test]
    fn command_ids() {
        assert_eq!(Command::try_from(0x20), Ok(Command::GetDeviceInfo));
        assert_eq!(Command::try_from(0xAA), Err(0xAA));
        assert_eq!(Status::Err as u8, STATUS_ERR);
    }
}
