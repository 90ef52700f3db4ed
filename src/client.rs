//! Host side client for the frame protocol bootloader

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::dispatch::Version;
use crate::image::DeviceInfo;
use crate::parser::Parser;
use crate::protocol::{Command, Frame, STATUS_ERR, STATUS_OK};
use crate::Error;

/// Serial port with modem control lines, used to reset the target
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not reset the device on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_reset: bool,

    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "2"))]
    pub poll_delay_ms: u32,

    /// Period to wait for the bootloader to start after reset
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub init_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_reset: false,
            response_timeout_ms: 500,
            poll_delay_ms: 2,
            init_delay_ms: 100,
        }
    }
}

pub struct Client<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    parser: Parser,
    _err: PhantomData<E>,
}

impl<P, D, E> Client<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new client instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            parser: Parser::new(),
            _err: PhantomData,
        }
    }

    /// Reset the target (unless disabled) and check the bootloader responds
    pub fn init(&mut self) -> Result<(), Error<E>> {
        if !self.options.no_reset {
            debug!("Resetting device");

            self.port.set_dtr(true)?;
            self.port.set_rts(true)?;

            self.delay.delay_ms(100u32);

            self.port.set_dtr(false)?;
            self.port.set_rts(false)?;

            // The bootloader flashes its LED before serving requests
            self.delay.delay_ms(self.options.init_delay_ms);
        }

        debug!("Sending ping");
        self.ping()
    }

    /// Check the bootloader is responding
    pub fn ping(&mut self) -> Result<(), Error<E>> {
        let resp = self.request(Command::Ping as u8, 0)?;

        if resp.payload()[..3] != [0xFF, 0xFF, 0xFF] {
            return Err(Error::InvalidResponse);
        }

        Ok(())
    }

    /// Fetch the bootloader version
    pub fn version(&mut self) -> Result<Version, Error<E>> {
        let resp = self.request(Command::GetVersion as u8, 0)?;
        let p = resp.payload();

        Ok(Version::new(p[0], p[1], p[2]))
    }

    /// Fetch the bootloader build date
    pub fn build_date(&mut self) -> Result<String, Error<E>> {
        let resp = self.request(Command::GetBuildDate as u8, 0)?;
        let p = resp.payload();

        let n = p.iter().position(|b| *b == 0).unwrap_or(p.len());
        let s = core::str::from_utf8(&p[..n]).map_err(|_| Error::InvalidResponse)?;

        Ok(String::from(s))
    }

    /// Fetch the device information record
    pub fn device_info(&mut self) -> Result<DeviceInfo, Error<E>> {
        let resp = self.request(Command::GetDeviceInfo as u8, 0)?;

        let mut b = [0u8; DeviceInfo::LEN];
        b.copy_from_slice(&resp.payload()[..DeviceInfo::LEN]);

        let info = DeviceInfo::from_bytes(&b);
        if !info.is_valid() {
            warn!("Device info magic mismatch (0x{:08x}), record not programmed?", info.magic);
        }

        Ok(info)
    }

    /// Send a request and await the matching response.
    ///
    /// Responses with an error status are returned as [`Error::Rejected`].
    pub fn request(&mut self, command: u8, param: u8) -> Result<Frame, Error<E>> {
        let resp = self.exchange(&Frame::request(command, param))?;

        if resp.command() != command {
            return Err(Error::UnexpectedCommand {
                expected: command,
                actual: resp.command(),
            });
        }

        match resp.status() {
            STATUS_OK => Ok(resp),
            STATUS_ERR => Err(Error::Rejected { command }),
            s => {
                debug!("Unexpected status 0x{:02x}", s);
                Err(Error::InvalidResponse)
            }
        }
    }

    /// Write a raw frame and return the first valid frame received in response
    pub fn exchange(&mut self, req: &Frame) -> Result<Frame, Error<E>> {
        trace!("Sending {:?}", req);

        // Drop any partial frame from an earlier timed out exchange
        self.parser = Parser::new();

        for b in req.as_bytes() {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        self.await_response()
    }

    fn await_response(&mut self) -> Result<Frame, Error<E>> {
        let mut t = 0;

        loop {
            // Drain available bytes
            loop {
                match self.port.read() {
                    Err(nb::Error::WouldBlock) => break,
                    Err(nb::Error::Other(e)) => return Err(e.into()),
                    Ok(v) => {
                        if let Some(f) = self.parser.feed(v) {
                            trace!("Received {:?}", f);
                            return Ok(f);
                        }
                    }
                }
            }

            // Wait for delay period
            self.delay.delay_ms(self.options.poll_delay_ms);
            t += self.options.poll_delay_ms.max(1);

            if t > self.options.response_timeout_ms {
                error!("Receive timeout");
                return Err(Error::ResponseTimeout);
            }
        }
    }

    /// Release the serial port and delay
    pub fn free(self) -> (P, D) {
        (self.port, self.delay)
    }
}
