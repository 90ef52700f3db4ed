//! Transfer of execution to the application
//!
//! The sequence is fixed and must run exactly once; the hardware specific
//! primitives are provided through the [`Handoff`] trait.

use crate::image::AppDescriptor;

/// Low level primitives required to hand the core over to the application
pub trait Handoff {
    /// Disable the bootloader's communication interrupts, leaving the
    /// peripheral for the application to reconfigure
    fn quiesce_serial(&mut self);

    /// Globally mask interrupts
    fn disable_interrupts(&mut self);

    /// Stop the system tick timer and clear its reload and current values
    fn stop_systick(&mut self);

    /// Clear pending SysTick and PendSV exceptions
    fn clear_pending_exceptions(&mut self);

    /// Disable and clear pending state of every external interrupt line
    fn clear_nvic(&mut self);

    /// Write the vector table offset register
    fn set_vector_table(&mut self, addr: u32);

    /// Data and instruction synchronisation barrier
    fn barrier(&mut self);

    /// Load the main stack pointer with `sp`, synchronise, unmask interrupts
    /// and branch to `entry` without preserving a return address.
    ///
    /// Nothing may touch the stack between the stack pointer load and the
    /// branch, so implementations must perform all four steps in one go.
    fn start(&mut self, sp: u32, entry: u32) -> !;
}

/// Thumb bit, required on the branch target address
const THUMB_BIT: u32 = 1;

/// Hand the core over to the application whose vector table is at `app_base`.
///
/// Callers must have checked the descriptor with [`crate::boot::decide`].
pub fn jump_to_app<H: Handoff>(hal: &mut H, app_base: u32, app: &AppDescriptor) -> ! {
    info!(
        "Starting application at 0x{:08x} (sp: 0x{:08x}, reset: 0x{:08x})",
        app_base, app.stack_pointer, app.reset_vector
    );

    hal.quiesce_serial();
    hal.disable_interrupts();

    hal.stop_systick();
    hal.clear_pending_exceptions();
    hal.clear_nvic();

    hal.set_vector_table(app_base);
    hal.barrier();

    hal.start(app.stack_pointer, app.reset_vector | THUMB_BIT)
}

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
pub use self::cortex::CortexM;

#[cfg(all(feature = "cortex-m", target_arch = "arm"))]
mod cortex {
    use cortex_m::peripheral::{NVIC, SCB, SYST};

    use super::Handoff;

    /// Number of NVIC enable / pending registers cleared before the jump
    const NVIC_REGS: usize = 8;

    const ICSR_PENDSTCLR: u32 = 1 << 25;
    const ICSR_PENDSVCLR: u32 = 1 << 27;

    /// Cortex-M handoff, `quiesce` disables the bootloader UART interrupts
    pub struct CortexM<Q> {
        quiesce: Q,
    }

    impl<Q: FnMut()> CortexM<Q> {
        /// Create a Cortex-M handoff.
        ///
        /// # Safety
        /// The returned handle takes over the core peripherals, no other
        /// code may use them once the handoff has started.
        pub unsafe fn new(quiesce: Q) -> Self {
            Self { quiesce }
        }
    }

    impl<Q: FnMut()> Handoff for CortexM<Q> {
        fn quiesce_serial(&mut self) {
            (self.quiesce)()
        }

        fn disable_interrupts(&mut self) {
            cortex_m::interrupt::disable();
        }

        fn stop_systick(&mut self) {
            unsafe {
                let syst = &*SYST::PTR;
                syst.csr.write(0);
                syst.rvr.write(0);
                syst.cvr.write(0);
            }
        }

        fn clear_pending_exceptions(&mut self) {
            unsafe { (*SCB::PTR).icsr.write(ICSR_PENDSTCLR | ICSR_PENDSVCLR) }
        }

        fn clear_nvic(&mut self) {
            unsafe {
                let nvic = &*NVIC::PTR;
                for i in 0..nvic.icer.len().min(NVIC_REGS) {
                    nvic.icer[i].write(0xFFFF_FFFF);
                    nvic.icpr[i].write(0xFFFF_FFFF);
                }
            }
        }

        fn set_vector_table(&mut self, addr: u32) {
            unsafe { (*SCB::PTR).vtor.write(addr) }
        }

        fn barrier(&mut self) {
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
        }

        fn start(&mut self, sp: u32, entry: u32) -> ! {
            unsafe {
                core::arch::asm!(
                    "msr msp, {sp}",
                    "dsb",
                    "isb",
                    "cpsie i",
                    "bx {entry}",
                    sp = in(reg) sp,
                    entry = in(reg) entry,
                    options(noreturn),
                )
            }
        }
    }
}
