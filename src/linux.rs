use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind as SerialErrorKind, FlowControl, Parity,
    SerialDevice as _, SerialPortSettings as _, StopBits,
};

use crate::{Client, Options, SerialPort};

fn io_kind(e: SerialError) -> IoErrorKind {
    match e.kind() {
        SerialErrorKind::Io(k) => k,
        SerialErrorKind::NoDevice => IoErrorKind::NotFound,
        SerialErrorKind::InvalidInput => IoErrorKind::InvalidInput,
    }
}

impl SerialPort<IoErrorKind> for Serial {
    fn set_rts(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_rts(level).map_err(io_kind)
    }
    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(io_kind)
    }
}

impl Client<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port client instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        let mut port = Serial::open(port.as_ref())?;

        // 8N1, no flow control
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;

        Ok(Self::new(port, Delay {}, options))
    }
}
