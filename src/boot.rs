//! Autoboot decision
//!
//! The application is only started when its vector table looks sane: the
//! initial stack pointer must fall in RAM and the reset vector in flash.
//! A [`BootOverride`] may additionally hold the bootloader resident.

use crate::image::{AppDescriptor, OtaMeta};

/// Address window used to validate vector table entries
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum AddressWindow {
    /// `addr & mask == value`
    Masked { mask: u32, value: u32 },
    /// `start <= addr < end`
    Range { start: u32, end: u32 },
}

impl AddressWindow {
    pub fn contains(&self, addr: u32) -> bool {
        match *self {
            AddressWindow::Masked { mask, value } => addr & mask == value,
            AddressWindow::Range { start, end } => addr >= start && addr < end,
        }
    }
}

/// Valid RAM and flash windows for the target
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct MemoryLayout {
    pub ram: AddressWindow,
    pub flash: AddressWindow,
}

impl MemoryLayout {
    /// STM32L4 layout, SRAM1 at 0x2000_0000, flash at 0x0800_0000
    pub const STM32L4: MemoryLayout = MemoryLayout {
        ram: AddressWindow::Masked { mask: 0x2FFE_0000, value: 0x2000_0000 },
        flash: AddressWindow::Masked { mask: 0xFF00_0000, value: 0x0800_0000 },
    };

    /// STM32F412 layout, 256k SRAM and application within 1M flash
    pub const STM32F412: MemoryLayout = MemoryLayout {
        ram: AddressWindow::Range { start: 0x2000_0000, end: 0x2004_0001 },
        flash: AddressWindow::Range { start: crate::image::APP_ADDR, end: 0x0810_0000 },
    };
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::STM32L4
    }
}

/// Hook allowing the bootloader to be held resident even with a valid application
pub trait BootOverride {
    /// Returns `true` to stay in the bootloader
    fn force_bootloader(&mut self) -> bool;
}

/// Override that never holds the bootloader
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOverride;

impl BootOverride for NoOverride {
    fn force_bootloader(&mut self) -> bool {
        false
    }
}

/// Override holding the bootloader while the OTA metadata requests it
#[derive(Copy, Clone, Debug)]
pub struct OtaFlagOverride(pub OtaMeta);

impl BootOverride for OtaFlagOverride {
    fn force_bootloader(&mut self) -> bool {
        self.0.holds_bootloader()
    }
}

/// Outcome of the autoboot checks
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum BootDecision {
    /// Safe to jump to the application
    Boot,
    /// Initial stack pointer outside RAM
    InvalidStackPointer(u32),
    /// Reset vector outside flash
    InvalidResetVector(u32),
    /// Vector table valid but the override requested the bootloader
    Forced,
}

impl BootDecision {
    pub fn is_boot(&self) -> bool {
        *self == BootDecision::Boot
    }
}

/// Run the autoboot checks in order, returning the first failure
pub fn evaluate<O: BootOverride>(
    layout: &MemoryLayout,
    app: &AppDescriptor,
    over: &mut O,
) -> BootDecision {
    if !layout.ram.contains(app.stack_pointer) {
        return BootDecision::InvalidStackPointer(app.stack_pointer);
    }

    if !layout.flash.contains(app.reset_vector) {
        return BootDecision::InvalidResetVector(app.reset_vector);
    }

    if over.force_bootloader() {
        return BootDecision::Forced;
    }

    BootDecision::Boot
}

/// Decide whether autoboot may proceed
pub fn decide<O: BootOverride>(layout: &MemoryLayout, app: &AppDescriptor, over: &mut O) -> bool {
    evaluate(layout, app, over).is_boot()
}
