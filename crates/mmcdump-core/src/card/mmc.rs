//! MMC SPI-mode command set.
//!
//! Only what a raw reader needs: reset, operating condition polling,
//! OCR, block length and single block reads.

use byteorder::{BigEndian, ByteOrder};

use super::Addressing;

/// GO_IDLE_STATE
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND (MMC)
pub const CMD1: u8 = 0x01;
/// SET_BLOCKLEN
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK
pub const CMD17: u8 = 0x11;
/// READ_OCR
pub const CMD58: u8 = 0x3A;

/// Host supports sector addressing, 2.7-3.6V.
pub const OP_COND_SECTOR_MODE: u32 = 0x40FF_8000;

pub const R1_READY_STATE: u8 = 0x00;
pub const R1_IDLE_STATE: u8 = 0x01;
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;
pub const R1_COM_CRC_ERROR: u8 = 0x08;
pub const R1_ADDRESS_ERROR: u8 = 0x20;
pub const R1_PARAMETER_ERROR: u8 = 0x40;

/// Start token of a single block read.
pub const DATA_START_BLOCK: u8 = 0xFE;

/// Bus idle level.
pub const IDLE_BYTE: u8 = 0xFF;

/// Clocks the card needs with CS high before CMD0 (80 clocks).
pub const POWER_UP_CLOCK_BYTES: usize = 10;

/// Bytes polled for an R1 after a command frame (Ncr max is 8).
pub const NCR_BYTES: usize = 8;

const OCR_POWER_UP_DONE: u32 = 1 << 31;
const OCR_ACCESS_MODE_MASK: u32 = 0b11 << 29;
const OCR_ACCESS_MODE_SECTOR: u32 = 0b10 << 29;

/// Build the 6-byte frame for `cmd` with `arg`.
pub fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let mut frame = [0u8; 6];
    frame[0] = 0x40 | (cmd & 0x3F);
    BigEndian::write_u32(&mut frame[1..5], arg);
    frame[5] = crc7(&frame[..5]);
    frame
}

/// CRC7 of a command frame, shifted with the end bit set.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().copied() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}

/// CRC16 (CCITT, zero seed) used for data blocks.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}

/// Position of the first R1 byte (MSB clear) in `bytes`.
pub fn find_r1(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| b & 0x80 == 0)
}

/// Whether an R1 says the address was outside the card.
pub fn is_out_of_range(r1: u8) -> bool {
    r1 & (R1_ADDRESS_ERROR | R1_PARAMETER_ERROR) != 0
}

/// Decode the 4 bytes following an R3 response.
pub fn parse_ocr(bytes: &[u8]) -> u32 {
    BigEndian::read_u32(bytes)
}

pub fn ocr_power_up_done(ocr: u32) -> bool {
    ocr & OCR_POWER_UP_DONE != 0
}

pub fn ocr_addressing(ocr: u32) -> Addressing {
    if ocr & OCR_ACCESS_MODE_MASK == OCR_ACCESS_MODE_SECTOR {
        Addressing::Sector
    } else {
        Addressing::Byte
    }
}

/// Command argument that addresses `cluster`, or `None` if it cannot be
/// expressed with this addressing mode.
pub fn cluster_address(addressing: Addressing, cluster: u32) -> Option<u32> {
    match addressing {
        Addressing::Sector => Some(cluster),
        Addressing::Byte => cluster.checked_mul(super::CLUSTER_SIZE as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc7_reference() {
        // CSD register of a real card, CRC is the last byte.
        let data = [
            0x00, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xC8, 0xAD, 0xDB, 0xCF, 0xFF, 0xD2, 0x40,
            0x40,
        ];
        assert_eq!(crc7(&data), 0xA5);
    }

    #[test]
    fn test_crc16_reference() {
        let data = [
            0x00, 0x26, 0x00, 0x32, 0x5F, 0x5A, 0x83, 0xAE, 0xFE, 0xFB, 0xCF, 0xFF, 0x92, 0x80,
            0x40, 0xDF,
        ];
        assert_eq!(crc16(&data), 0x9FC5);
    }

    #[test]
    fn test_well_known_frames() {
        assert_eq!(command_frame(CMD0, 0), [0x40, 0x00, 0x00, 0x00, 0x00, 0x95]);
        assert_eq!(command_frame(CMD17, 0), [0x51, 0x00, 0x00, 0x00, 0x00, 0x55]);
    }

    #[test]
    fn test_frame_argument_is_big_endian() {
        let frame = command_frame(CMD17, 0x1234_5678);
        assert_eq!(&frame[1..5], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(frame[5] & 1, 1);
    }

    #[test]
    fn test_find_r1_skips_idle_bytes() {
        assert_eq!(find_r1(&[0xFF, 0xFF, 0x01, 0xFF]), Some(2));
        assert_eq!(find_r1(&[0xFF; 8]), None);
    }

    #[test]
    fn test_ocr_decoding() {
        let ocr = parse_ocr(&[0xC0, 0xFF, 0x80, 0x00]);
        assert!(ocr_power_up_done(ocr));
        assert_eq!(ocr_addressing(ocr), Addressing::Sector);

        let ocr = parse_ocr(&[0x80, 0xFF, 0x80, 0x00]);
        assert_eq!(ocr_addressing(ocr), Addressing::Byte);
        assert!(!ocr_power_up_done(0x00FF_8000));
    }

    #[test]
    fn test_cluster_address() {
        assert_eq!(cluster_address(Addressing::Sector, 0x180), Some(0x180));
        assert_eq!(cluster_address(Addressing::Byte, 0x180), Some(0x180 * 512));
        assert_eq!(cluster_address(Addressing::Byte, 0x0080_0000), None);
    }

    #[test]
    fn test_out_of_range_bits() {
        assert!(is_out_of_range(R1_ADDRESS_ERROR));
        assert!(is_out_of_range(R1_PARAMETER_ERROR));
        assert!(!is_out_of_range(R1_COM_CRC_ERROR));
        assert!(!is_out_of_range(R1_READY_STATE));
    }
}
