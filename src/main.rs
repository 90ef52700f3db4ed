#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::Context;
use embedded_hal::blocking::delay::DelayMs;
use indicatif::{ProgressBar, ProgressStyle};

use stm32_frame_boot::{Client, Frame, Options, SerialPort};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Check the bootloader is responding
    Ping,
    /// Read the bootloader version
    Version,
    /// Read the bootloader build date
    BuildDate,
    /// Read the device information record
    Info,
    /// Ping until the bootloader answers
    Wait {
        /// Maximum number of pings
        #[structopt(long, default_value = "50")]
        attempts: u32,
    },
    /// Send an arbitrary command and print the raw response frame
    Raw {
        /// Command id (decimal or 0x prefixed hex)
        #[structopt(parse(try_from_str = parse_u8))]
        command: u8,

        /// Command parameter
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u8))]
        param: u8,
    },
}

fn parse_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(h) => u8::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Connecting to serial port {}", o.port);

    let mut c = Client::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    match o.operation {
        Operation::Wait { attempts } => wait(&mut c, attempts),
        op => {
            info!("Connecting to bootloader");

            c.init().context("Error connecting to bootloader")?;

            info!("Bootloader connected!");

            execute(&mut c, op)
        }
    }
}

fn execute<P, D, E>(c: &mut Client<P, D, E>, op: Operation) -> anyhow::Result<()>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: std::fmt::Debug + Send + Sync + 'static,
{
    match op {
        Operation::Ping | Operation::Wait { .. } => info!("Ping OK"),
        Operation::Version => {
            let v = c.version().context("Error reading version")?;
            info!("Version: {}", v);
        }
        Operation::BuildDate => {
            let d = c.build_date().context("Error reading build date")?;
            info!("Build date: {}", d);
        }
        Operation::Info => {
            let i = c.device_info().context("Error reading device info")?;
            info!("Serial: {}", i.serial);
            info!("Hardware: {}.{}", i.hw_major, i.hw_minor);
            info!("Production date: {}", i.prod_date_str().unwrap_or("unknown"));
            if !i.is_valid() {
                warn!("Record magic 0x{:08x} invalid, fields are not meaningful", i.magic);
            }
        }
        Operation::Raw { command, param } => {
            let resp = c
                .exchange(&Frame::request(command, param))
                .context("Error exchanging frame")?;
            info!("Response: {:?}", resp);
            println!("{}", hex::encode(&resp.as_bytes()[..]));
        }
    }

    Ok(())
}

fn wait<P, D, E>(c: &mut Client<P, D, E>, attempts: u32) -> anyhow::Result<()>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: std::fmt::Debug,
{
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}"));
    pb.set_message("Waiting for bootloader");

    for n in 0..attempts {
        pb.tick();

        match c.ping() {
            Ok(()) => {
                pb.finish_with_message("Bootloader connected!");
                return Ok(());
            }
            Err(e) => debug!("Ping {} failed: {:?}", n, e),
        }
    }

    pb.finish_with_message("No response");
    anyhow::bail!("Bootloader did not respond after {} attempts", attempts)
}
