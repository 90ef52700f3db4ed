//! Flash resident records consumed (never written) by the bootloader

/// Default application base, the application vector table lives here
pub const APP_ADDR: u32 = 0x0800_8000;
/// Default device information record address
pub const INFO_ADDR: u32 = 0x080F_F800;
/// Default OTA metadata block address
pub const META_ADDR: u32 = 0x080F_0000;

/// Expected `DeviceInfo::magic` for a programmed record ("INF0")
pub const DEVICE_INFO_MAGIC: u32 = 0x3046_4E49;
/// Expected `OtaMeta::magic` for a valid metadata block ("OTA1")
pub const OTA_MAGIC: u32 = 0x4F54_4131;

pub const OTA_FLAG_PENDING: u32 = 1 << 0;
pub const OTA_FLAG_FORCE_BL: u32 = 1 << 1;

/// First two words of the application vector table
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct AppDescriptor {
    /// Initial main stack pointer
    pub stack_pointer: u32,
    /// Reset handler address
    pub reset_vector: u32,
}

/// Device information record, programmed at production time
#[derive(Clone, PartialEq, Debug)]
pub struct DeviceInfo {
    pub magic: u32,
    pub serial: u32,
    pub hw_major: u8,
    pub hw_minor: u8,
    /// ASCII production date, NUL padded
    pub prod_date: [u8; 10],
}

impl DeviceInfo {
    /// Encoded record length
    pub const LEN: usize = 20;

    /// Decode a packed little-endian record
    pub fn from_bytes(b: &[u8; Self::LEN]) -> Self {
        let mut prod_date = [0u8; 10];
        prod_date.copy_from_slice(&b[10..20]);

        Self {
            magic: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            serial: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            hw_major: b[8],
            hw_minor: b[9],
            prod_date,
        }
    }

    /// Encode as a packed little-endian record
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        b[0..4].copy_from_slice(&self.magic.to_le_bytes());
        b[4..8].copy_from_slice(&self.serial.to_le_bytes());
        b[8] = self.hw_major;
        b[9] = self.hw_minor;
        b[10..20].copy_from_slice(&self.prod_date);
        b
    }

    /// Check whether the record has been programmed
    pub fn is_valid(&self) -> bool {
        self.magic == DEVICE_INFO_MAGIC
    }

    /// Production date up to the first NUL, if it is valid ASCII
    pub fn prod_date_str(&self) -> Option<&str> {
        let n = self.prod_date.iter().position(|b| *b == 0).unwrap_or(self.prod_date.len());
        let s = core::str::from_utf8(&self.prod_date[..n]).ok()?;
        if s.is_ascii() {
            Some(s)
        } else {
            None
        }
    }
}

/// OTA metadata block, left by an application that wants the bootloader to stay resident
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct OtaMeta {
    pub magic: u32,
    pub flags: u32,
    pub app_crc32: u32,
    pub app_size: u32,
}

impl OtaMeta {
    pub fn from_words(w: [u32; 4]) -> Self {
        Self {
            magic: w[0],
            flags: w[1],
            app_crc32: w[2],
            app_size: w[3],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == OTA_MAGIC
    }

    /// Valid block requesting the bootloader be kept (update pending or forced)
    pub fn holds_bootloader(&self) -> bool {
        self.is_valid() && (self.flags & (OTA_FLAG_PENDING | OTA_FLAG_FORCE_BL)) != 0
    }
}

/// Read access to the flash resident records
pub trait ImageSource {
    /// Read the application vector table head
    fn app_descriptor(&self) -> AppDescriptor;

    /// Read the raw device information record
    fn device_info(&self) -> [u8; DeviceInfo::LEN];
}

/// Memory mapped flash image
pub struct FlashImage {
    app_base: u32,
    info_addr: u32,
}

impl FlashImage {
    /// Create a flash image reader.
    ///
    /// # Safety
    /// Both addresses must refer to readable memory for the life of the program,
    /// `app_base` for at least 8 bytes and `info_addr` for [`DeviceInfo::LEN`] bytes.
    pub unsafe fn new(app_base: u32, info_addr: u32) -> Self {
        assert_eq!(app_base % 4, 0, "application base must be word aligned");
        assert_eq!(info_addr % 4, 0, "info record must be word aligned");

        Self { app_base, info_addr }
    }

    /// Application base address
    pub fn app_base(&self) -> u32 {
        self.app_base
    }

    /// Read an OTA metadata block.
    ///
    /// # Safety
    /// `addr` must be word aligned readable memory of at least 16 bytes.
    pub unsafe fn ota_meta(addr: u32) -> OtaMeta {
        assert_eq!(addr % 4, 0, "metadata block must be word aligned");

        let p = addr as *const u32;
        OtaMeta::from_words([
            core::ptr::read_volatile(p),
            core::ptr::read_volatile(p.add(1)),
            core::ptr::read_volatile(p.add(2)),
            core::ptr::read_volatile(p.add(3)),
        ])
    }
}

impl ImageSource for FlashImage {
    fn app_descriptor(&self) -> AppDescriptor {
        let p = self.app_base as *const u32;

        // Validity of the addresses is established in `new`
        unsafe {
            AppDescriptor {
                stack_pointer: core::ptr::read_volatile(p),
                reset_vector: core::ptr::read_volatile(p.add(1)),
            }
        }
    }

    fn device_info(&self) -> [u8; DeviceInfo::LEN] {
        let p = self.info_addr as *const u8;
        let mut b = [0u8; DeviceInfo::LEN];

        for (i, v) in b.iter_mut().enumerate() {
            *v = unsafe { core::ptr::read_volatile(p.add(i)) };
        }

        b
    }
}
