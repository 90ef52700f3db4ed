//! Command dispatch, one response frame per valid request

use core::convert::TryFrom;

use crate::image::ImageSource;
use crate::protocol::{Command, Frame, Status, PING_PAYLOAD};

/// Firmware version triple
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compiled-in bootloader identity
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct BuildInfo {
    pub version: Version,
    /// ASCII build timestamp
    pub build_date: &'static str,
}

impl BuildInfo {
    /// Identity of this build, the date is taken from `BOOTLOADER_BUILD_DATE` at compile time
    pub const CURRENT: BuildInfo = BuildInfo {
        version: Version::new(
            parse_u8(env!("CARGO_PKG_VERSION_MAJOR")),
            parse_u8(env!("CARGO_PKG_VERSION_MINOR")),
            parse_u8(env!("CARGO_PKG_VERSION_PATCH")),
        ),
        build_date: match option_env!("BOOTLOADER_BUILD_DATE") {
            Some(d) => d,
            None => "unknown",
        },
    };

    pub const fn new(version: Version, build_date: &'static str) -> Self {
        Self { version, build_date }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::CURRENT
    }
}

// Decimal string to u8, saturating
const fn parse_u8(s: &str) -> u8 {
    let b = s.as_bytes();
    let mut v: u32 = 0;
    let mut i = 0;
    while i < b.len() {
        v = v * 10 + (b[i] - b'0') as u32;
        if v > 255 {
            return 255;
        }
        i += 1;
    }
    v as u8
}

/// Maps request command ids to response frames
pub struct Dispatcher<I> {
    build: BuildInfo,
    image: I,
}

impl<I: ImageSource> Dispatcher<I> {
    pub fn new(build: BuildInfo, image: I) -> Self {
        Self { build, image }
    }

    pub fn image(&self) -> &I {
        &self.image
    }

    /// Produce the response for a validated request frame.
    ///
    /// Only the command id is inspected, unknown commands get an error response.
    pub fn dispatch(&self, req: &Frame) -> Frame {
        let cmd = req.command();

        match Command::try_from(cmd) {
            Ok(Command::Ping) => {
                debug!("Ping");
                Frame::response(Status::Ok, cmd, &PING_PAYLOAD)
            }
            Ok(Command::GetVersion) => {
                debug!("Get version: {}", self.build.version);
                Frame::response(Status::Ok, cmd, &self.build.version.to_bytes())
            }
            Ok(Command::GetBuildDate) => {
                debug!("Get build date: {}", self.build.build_date);
                Frame::response(Status::Ok, cmd, self.build.build_date.as_bytes())
            }
            Ok(Command::GetDeviceInfo) => {
                debug!("Get device info");
                Frame::response(Status::Ok, cmd, &self.image.device_info())
            }
            Err(c) => {
                debug!("Unknown command 0x{:02x}", c);
                Frame::response(Status::Err, cmd, &[])
            }
        }
    }
}
