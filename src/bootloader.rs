//! Device side bootloader, ties together the transport, parser, dispatcher and boot logic

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{OutputPin, ToggleableOutputPin};
use embedded_hal::serial::Write;

use crate::boot::{evaluate, BootDecision, BootOverride, MemoryLayout};
use crate::dispatch::Dispatcher;
use crate::handoff::{jump_to_app, Handoff};
use crate::image::{FlashImage, ImageSource, APP_ADDR, INFO_ADDR};
use crate::parser::Parser;
use crate::transport::Transport;
use crate::Error;

/// Device configuration
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Config {
    /// Application vector table address
    pub app_base: u32,
    /// Device information record address
    pub info_addr: u32,
    /// Valid stack pointer and reset vector windows
    pub layout: MemoryLayout,
    /// Number of LED flashes at startup
    pub blink_count: u8,
    /// LED on / off period at startup
    pub blink_delay_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_base: APP_ADDR,
            info_addr: INFO_ADDR,
            layout: MemoryLayout::default(),
            blink_count: 10,
            blink_delay_ms: 50,
        }
    }
}

impl Config {
    /// Create a flash reader for the configured addresses.
    ///
    /// # Safety
    /// See [`FlashImage::new`].
    pub unsafe fn flash_image(&self) -> FlashImage {
        FlashImage::new(self.app_base, self.info_addr)
    }
}

pub struct Bootloader<'a, S, I, L, D> {
    config: Config,
    transport: Transport<'a, S>,
    parser: Parser,
    dispatcher: Dispatcher<I>,
    led: L,
    delay: D,
}

impl<'a, S, I, L, D, E> Bootloader<'a, S, I, L, D>
where
    S: Write<u8, Error = E>,
    I: ImageSource,
    L: OutputPin + ToggleableOutputPin,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new bootloader instance
    pub fn new(
        config: Config,
        transport: Transport<'a, S>,
        dispatcher: Dispatcher<I>,
        led: L,
        delay: D,
    ) -> Self {
        Self {
            config,
            transport,
            parser: Parser::new(),
            dispatcher,
            led,
            delay,
        }
    }

    /// Fetch the bootloader configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flash the status LED to signal the bootloader is running
    pub fn startup_blink(&mut self) {
        for _ in 0..self.config.blink_count {
            let _ = self.led.set_high();
            self.delay.delay_ms(self.config.blink_delay_ms);
            let _ = self.led.set_low();
            self.delay.delay_ms(self.config.blink_delay_ms);
        }
    }

    /// Run the autoboot checks against the application in flash
    pub fn check_app<O: BootOverride>(&self, over: &mut O) -> BootDecision {
        let app = self.dispatcher.image().app_descriptor();
        let d = evaluate(&self.config.layout, &app, over);

        debug!("Application {:x?}: {:?}", app, d);

        d
    }

    /// Handle at most one request from the receive buffer.
    ///
    /// Returns the command id of the request answered, if any.
    pub fn poll(&mut self) -> Result<Option<u8>, Error<E>> {
        let req = match self.parser.poll(&mut self.transport) {
            Some(f) => f,
            None => return Ok(None),
        };

        trace!("Request: {:?}", req);

        let resp = self.dispatcher.dispatch(&req);
        self.transport.send(resp.as_bytes())?;

        // Liveness indicator only
        let _ = self.led.toggle();

        Ok(Some(req.command()))
    }

    /// Serve requests forever
    pub fn run(&mut self) -> ! {
        info!("Bootloader command loop running");

        loop {
            if let Err(e) = self.poll() {
                error!("Error sending response: {:?}", e);
            }
        }
    }

    /// Boot sequence: flash the LED, then start the application if it passes
    /// the autoboot checks, otherwise serve requests forever
    pub fn start<O, H>(mut self, over: &mut O, hal: &mut H) -> !
    where
        O: BootOverride,
        H: Handoff,
    {
        self.startup_blink();

        match self.check_app(over) {
            BootDecision::Boot => {
                let app = self.dispatcher.image().app_descriptor();
                let _ = self.led.set_low();

                jump_to_app(hal, self.config.app_base, &app)
            }
            d => {
                warn!("Autoboot refused: {:?}", d);
                self.run()
            }
        }
    }

    /// Release the owned peripherals
    pub fn free(self) -> (Transport<'a, S>, Dispatcher<I>, L, D) {
        (self.transport, self.dispatcher, self.led, self.delay)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::boot::NoOverride;
    use crate::dispatch::{BuildInfo, Version};
    use crate::image::{AppDescriptor, DeviceInfo};
    use crate::protocol::{Frame, FRAME_LEN};
    use crate::ring::RingBuffer;

    use std::cell::{Cell, RefCell};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Default)]
    struct Tx {
        out: Vec<u8>,
    }

    impl Write<u8> for Tx {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.out.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Led {
        on: bool,
        toggles: usize,
    }

    impl OutputPin for Led {
        type Error = ();

        fn set_low(&mut self) -> Result<(), ()> {
            self.on = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), ()> {
            self.on = true;
            Ok(())
        }
    }

    impl ToggleableOutputPin for Led {
        type Error = ();

        fn toggle(&mut self) -> Result<(), ()> {
            self.on = !self.on;
            self.toggles += 1;
            Ok(())
        }
    }

    struct Delay<'c>(&'c Cell<u32>);

    impl<'c> DelayMs<u32> for Delay<'c> {
        fn delay_ms(&mut self, ms: u32) {
            self.0.set(self.0.get() + ms);
        }
    }

    struct Image(AppDescriptor);

    impl ImageSource for Image {
        fn app_descriptor(&self) -> AppDescriptor {
            self.0
        }

        fn device_info(&self) -> [u8; DeviceInfo::LEN] {
            [0xFF; DeviceInfo::LEN]
        }
    }

    const BUILD: BuildInfo = BuildInfo::new(Version::new(0, 4, 1), "2025-06-01");

    #[test]
    fn poll_answers_one_frame_per_call() {
        let mut rb = RingBuffer::new();
        let (mut p, c) = rb.split();
        let elapsed = Cell::new(0);

        let image = Image(AppDescriptor { stack_pointer: 0xFFFF_FFFF, reset_vector: 0xFFFF_FFFF });
        let mut bl = Bootloader::new(
            Config::default(),
            Transport::new(c, Tx::default()),
            Dispatcher::new(BUILD, image),
            Led::default(),
            Delay(&elapsed),
        );

        assert_eq!(bl.poll(), Ok(None));

        for b in Frame::request(0x10, 0).as_bytes().iter().chain(Frame::request(0x33, 0).as_bytes()) {
            p.push(*b);
        }

        assert_eq!(bl.poll(), Ok(Some(0x10)));
        assert_eq!(bl.poll(), Ok(Some(0x33)));
        assert_eq!(bl.poll(), Ok(None));

        let (t, _d, led, _delay) = bl.free();
        let (_c, tx) = t.free();

        assert_eq!(tx.out.len(), 2 * FRAME_LEN);
        assert_eq!(&tx.out[4..7], &[0, 4, 1]);
        assert_eq!(tx.out[FRAME_LEN + 1], 0x7F);
        assert_eq!(led.toggles, 2);
    }

    #[test]
    fn blink_and_decision() {
        let mut rb = RingBuffer::new();
        let (_p, c) = rb.split();
        let elapsed = Cell::new(0);

        let image = Image(AppDescriptor { stack_pointer: 0x2000_4000, reset_vector: 0x0800_9001 });
        let mut bl = Bootloader::new(
            Config::default(),
            Transport::new(c, Tx::default()),
            Dispatcher::new(BUILD, image),
            Led::default(),
            Delay(&elapsed),
        );

        bl.startup_blink();
        assert_eq!(elapsed.get(), 10 * 2 * 50);

        assert_eq!(bl.check_app(&mut NoOverride), BootDecision::Boot);

        let (_t, _d, led, _delay) = bl.free();
        assert!(!led.on);
    }

    /// LED whose state outlives the bootloader
    struct SharedLed<'c>(&'c Cell<bool>);

    impl<'c> OutputPin for SharedLed<'c> {
        type Error = ();

        fn set_low(&mut self) -> Result<(), ()> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), ()> {
            self.0.set(true);
            Ok(())
        }
    }

    impl<'c> ToggleableOutputPin for SharedLed<'c> {
        type Error = ();

        fn toggle(&mut self) -> Result<(), ()> {
            self.0.set(!self.0.get());
            Ok(())
        }
    }

    /// Transmitter that stops the command loop once a response is flushed
    struct StopTx<'c>(&'c RefCell<Vec<u8>>);

    impl<'c> Write<u8> for StopTx<'c> {
        type Error = ();

        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.0.borrow_mut().push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), ()> {
            panic!("response sent");
        }
    }

    struct HandoffRecorder<'c> {
        led: &'c Cell<bool>,
        led_on_at_handoff: Option<bool>,
        vtor: Option<u32>,
        started: Option<(u32, u32)>,
        calls: usize,
    }

    impl<'c> HandoffRecorder<'c> {
        fn new(led: &'c Cell<bool>) -> Self {
            Self { led, led_on_at_handoff: None, vtor: None, started: None, calls: 0 }
        }
    }

    impl<'c> Handoff for HandoffRecorder<'c> {
        fn quiesce_serial(&mut self) {
            self.led_on_at_handoff = Some(self.led.get());
            self.calls += 1;
        }
        fn disable_interrupts(&mut self) {
            self.calls += 1;
        }
        fn stop_systick(&mut self) {
            self.calls += 1;
        }
        fn clear_pending_exceptions(&mut self) {
            self.calls += 1;
        }
        fn clear_nvic(&mut self) {
            self.calls += 1;
        }
        fn set_vector_table(&mut self, addr: u32) {
            self.vtor = Some(addr);
            self.calls += 1;
        }
        fn barrier(&mut self) {
            self.calls += 1;
        }
        fn start(&mut self, sp: u32, entry: u32) -> ! {
            self.started = Some((sp, entry));
            self.calls += 1;
            panic!("started application");
        }
    }

    struct HoldBootloader;

    impl BootOverride for HoldBootloader {
        fn force_bootloader(&mut self) -> bool {
            true
        }
    }

    #[test]
    fn start_hands_valid_application_over() {
        let mut rb = RingBuffer::new();
        let (_p, c) = rb.split();
        let elapsed = Cell::new(0);
        let led = Cell::new(true);

        let app = AppDescriptor { stack_pointer: 0x2002_0000, reset_vector: 0x0800_8194 };
        let config = Config { app_base: 0x0800_8000, blink_count: 0, ..Config::default() };
        let bl = Bootloader::new(
            config,
            Transport::new(c, Tx::default()),
            Dispatcher::new(BUILD, Image(app)),
            SharedLed(&led),
            Delay(&elapsed),
        );

        let mut hal = HandoffRecorder::new(&led);
        let r = catch_unwind(AssertUnwindSafe(|| bl.start(&mut NoOverride, &mut hal)));
        assert!(r.is_err());

        assert_eq!(hal.led_on_at_handoff, Some(false));
        assert_eq!(hal.vtor, Some(0x0800_8000));
        assert_eq!(hal.started, Some((0x2002_0000, 0x0800_8195)));
    }

    #[test]
    fn start_serves_requests_when_held() {
        let mut rb = RingBuffer::new();
        let (mut p, c) = rb.split();
        let elapsed = Cell::new(0);
        let led = Cell::new(false);
        let out = RefCell::new(vec![]);

        for b in Frame::request(0x00, 0).as_bytes() {
            p.push(*b);
        }

        let app = AppDescriptor { stack_pointer: 0x2002_0000, reset_vector: 0x0800_8194 };
        let bl = Bootloader::new(
            Config::default(),
            Transport::new(c, StopTx(&out)),
            Dispatcher::new(BUILD, Image(app)),
            SharedLed(&led),
            Delay(&elapsed),
        );

        let mut hal = HandoffRecorder::new(&led);
        let r = catch_unwind(AssertUnwindSafe(|| bl.start(&mut HoldBootloader, &mut hal)));
        assert!(r.is_err());

        assert_eq!(hal.calls, 0);
        assert_eq!(hal.started, None);

        let out = out.borrow();
        assert_eq!(out.len(), FRAME_LEN);
        assert_eq!(&out[..7], &[0xB2, 0x40, 0x00, 0x00, 0xFF, 0xFF, 0xFF]);
    }
}
