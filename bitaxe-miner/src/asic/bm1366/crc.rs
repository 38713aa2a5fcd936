//! Frame checksums for the BM1366 serial protocol.
//!
//! Command frames end in a 5-bit CRC-5-USB over header, length and payload.
//! Job frames end in a 16-bit CRC-16-FALSE, transmitted big-endian.

use crc_all::CrcAlgo;

const CRC5_INIT: u8 = 0x1f;

const CRC5_USB: CrcAlgo<u8> = CrcAlgo::<u8>::new(
    0x5,       // polynomial
    5,         // width
    CRC5_INIT, // init
    0,         // xorout
    false,     // reflect
);

const CRC16_INIT: u16 = 0xffff;

const CRC16_FALSE: CrcAlgo<u16> = CrcAlgo::<u16>::new(
    0x1021,     // polynomial
    16,         // width
    CRC16_INIT, // init
    0,          // xorout
    false,      // reflect
);

/// CRC-5-USB (poly 0x05, init 0x1f, no reflection, no output XOR).
///
/// The chip treats the frame as a bit stream; computing it bytewise over the
/// same bytes gives the same result.
pub fn crc5(data: &[u8]) -> u8 {
    let mut crc = CRC5_INIT;
    CRC5_USB.update_crc(&mut crc, data);
    CRC5_USB.finish_crc(&crc)
}

/// CRC-16-FALSE (poly 0x1021, init 0xffff, no reflection, no output XOR).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    CRC16_FALSE.update_crc(&mut crc, data);
    CRC16_FALSE.finish_crc(&crc)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    // Frames the chip is known to accept. Skip the two preamble bytes and the trailing CRC.
    #[test_case(&[0x55, 0xaa, 0x52, 0x05, 0x00, 0x00, 0x0a]; "read_register_0")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0x28, 0x11, 0x30, 0x02, 0x00, 0x03]; "set_baud")]
    #[test_case(&[0x55, 0xaa, 0x53, 0x05, 0x00, 0x00, 0x03]; "chain_inactive")]
    #[test_case(&[0x55, 0xaa, 0x40, 0x05, 0x00, 0x00, 0x1c]; "set_address_0")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0x18, 0xff, 0x0f, 0xc1, 0x00, 0x00]; "zero_crc")]
    #[test_case(&[0x55, 0xaa, 0x41, 0x09, 0x00, 0x2c, 0x00, 0x7c, 0x00, 0x03, 0x03]; "single_chip_write")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0xff, 0xff, 0x1c]; "version_mask")]
    fn crc5_golden_frames(frame: &[u8]) {
        let crc = super::crc5(&frame[2..frame.len() - 1]);
        let expect = frame[frame.len() - 1];
        assert_eq!(crc, expect);
    }

    #[test]
    fn crc16_check_value() {
        assert_eq!(super::crc16(b"123456789"), 0x29b1);
    }
}
