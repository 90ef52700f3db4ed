//! CRC-8 (polynomial 0x07, init 0x00, MSB first, no reflection)

pub const CRC8_POLY: u8 = 0x07;

/// Compute the CRC-8 of the provided bytes
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0x00u8;

    for b in data {
        crc ^= *b;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
