//! BM1366 wire format.
//!
//! Outbound frames are `55 AA | header | length | payload | crc`, where the
//! length counts every byte after the preamble. Command frames carry a CRC-5
//! in the final byte, job frames a big-endian CRC-16 in the final two.
//! Inbound result frames are a fixed 11 bytes beginning `AA 55`.

use bitvec::prelude::*;
use bytes::{BufMut, BytesMut};
use std::{fmt, io};
use tokio_util::codec::Encoder;

use super::crc::{crc5, crc16};
use super::error::ProtocolError;
use crate::job_builder::AsicJob;
use crate::tracing::prelude::*;

pub const COMMAND_PREAMBLE: [u8; 2] = [0x55, 0xaa];
pub const RESPONSE_PREAMBLE: [u8; 2] = [0xaa, 0x55];

/// Every chip response, register read or nonce, is this long.
pub const RESPONSE_LEN: usize = 11;

/// Register addresses written during bring-up.
pub mod reg {
    pub const CHIP_ADDRESS: u8 = 0x00;
    pub const PLL0_PARAMETER: u8 = 0x08;
    pub const HASH_COUNTING: u8 = 0x10;
    pub const TICKET_MASK: u8 = 0x14;
    pub const MISC_CONTROL: u8 = 0x18;
    pub const FAST_UART: u8 = 0x28;
    pub const UART_RELAY: u8 = 0x2c;
    pub const CORE_REGISTER: u8 = 0x3c;
    pub const ANALOG_MUX: u8 = 0x54;
    pub const IO_DRIVER_STRENGTH: u8 = 0x58;
    pub const VERSION_MASK: u8 = 0xa4;
    pub const INIT_CONTROL: u8 = 0xa8;
}

/// Formats a byte slice as space-separated hex for logging.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[repr(u8)]
#[derive(Clone, Copy)]
enum PacketType {
    Job = 1,
    Command = 2,
}

#[repr(u8)]
#[derive(Clone, Copy)]
enum Opcode {
    SetAddress = 0,
    Write = 1,
    Read = 2,
    ChainInactive = 3,
}

/// Packs the header byte: bits 5-6 packet type, bit 4 broadcast, bits 0-3 opcode.
fn header(packet_type: PacketType, broadcast: bool, opcode: Opcode) -> u8 {
    let mut field = 0u8;
    let view = field.view_bits_mut::<Lsb0>();
    view[5..7].store(packet_type as u8);
    view[4..5].store(broadcast as u8);
    view[0..4].store(opcode as u8);
    field
}

/// A mining job as the chip expects it.
///
/// Multi-byte integers go out little-endian; the two hashes are already in
/// wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPacket {
    pub job_id: u8,
    pub num_midstates: u8,
    pub starting_nonce: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub merkle_root: [u8; 32],
    pub prev_block_hash: [u8; 32],
    pub version: u32,
}

impl JobPacket {
    /// Packs `job` under chip job id `job_id`.
    ///
    /// The chip rolls versions itself, so a single midstate slot is
    /// advertised whatever the job carries.
    pub fn new(job_id: u8, job: &AsicJob) -> Self {
        JobPacket {
            job_id,
            num_midstates: 1,
            starting_nonce: job.starting_nonce,
            nbits: job.nbits,
            ntime: job.ntime,
            merkle_root: job.merkle_root_be,
            prev_block_hash: job.prev_block_hash_be,
            version: job.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChipAddress {
        chip_address: u8,
    },
    ChainInactive,
    ReadRegister {
        broadcast: bool,
        chip_address: u8,
        register: u8,
    },
    WriteRegister {
        broadcast: bool,
        chip_address: u8,
        register: u8,
        value: [u8; 4],
    },
    Job(JobPacket),
}

impl Command {
    /// Broadcast register write, the common case during bring-up.
    pub fn write_all(register: u8, value: [u8; 4]) -> Self {
        Command::WriteRegister {
            broadcast: true,
            chip_address: 0,
            register,
            value,
        }
    }

    /// Register write addressed to one chip.
    pub fn write_chip(chip_address: u8, register: u8, value: [u8; 4]) -> Self {
        Command::WriteRegister {
            broadcast: false,
            chip_address,
            register,
            value,
        }
    }

    fn header(&self) -> u8 {
        match self {
            Command::SetChipAddress { .. } => {
                header(PacketType::Command, false, Opcode::SetAddress)
            }
            Command::ChainInactive => header(PacketType::Command, true, Opcode::ChainInactive),
            Command::ReadRegister { broadcast, .. } => {
                header(PacketType::Command, *broadcast, Opcode::Read)
            }
            Command::WriteRegister { broadcast, .. } => {
                header(PacketType::Command, *broadcast, Opcode::Write)
            }
            Command::Job(_) => header(PacketType::Job, false, Opcode::Write),
        }
    }

    fn put_payload(&self, dst: &mut BytesMut) {
        match self {
            Command::SetChipAddress { chip_address } => {
                dst.put_u8(*chip_address);
                dst.put_u8(0x00);
            }
            Command::ChainInactive => {
                dst.put_u8(0x00);
                dst.put_u8(0x00);
            }
            Command::ReadRegister {
                chip_address,
                register,
                ..
            } => {
                dst.put_u8(*chip_address);
                dst.put_u8(*register);
            }
            Command::WriteRegister {
                chip_address,
                register,
                value,
                ..
            } => {
                dst.put_u8(*chip_address);
                dst.put_u8(*register);
                dst.put_slice(value);
            }
            Command::Job(job) => {
                dst.put_u8(job.job_id);
                dst.put_u8(job.num_midstates);
                dst.put_u32_le(job.starting_nonce);
                dst.put_u32_le(job.nbits);
                dst.put_u32_le(job.ntime);
                dst.put_slice(&job.merkle_root);
                dst.put_slice(&job.prev_block_hash);
                dst.put_u32_le(job.version);
            }
        }
    }

    fn crc_len(&self) -> usize {
        match self {
            Command::Job(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Command> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame_start = dst.len();
        dst.put_slice(&COMMAND_PREAMBLE);

        let body_start = dst.len();
        dst.put_u8(command.header());
        dst.put_u8(0); // length, patched below
        command.put_payload(dst);

        let length = dst.len() - body_start + command.crc_len();
        dst[body_start + 1] = u8::try_from(length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too long"))?;

        match command {
            Command::Job(_) => {
                let crc = crc16(&dst[body_start..]);
                dst.put_u16(crc);
            }
            _ => {
                let crc = crc5(&dst[body_start..]);
                dst.put_u8(crc);
            }
        }

        trace!(frame = %HexBytes(&dst[frame_start..]), "TX BM1366");
        Ok(())
    }
}

/// A nonce report decoded from an 11-byte result frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsicResult {
    /// Job id with the sub-core bits masked off.
    pub job_id: u8,
    pub small_core_id: u8,
    pub core_id: u8,
    pub nonce: u32,
    /// Rolled version bits, already shifted into header position.
    pub version_bits: u32,
}

impl AsicResult {
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() != RESPONSE_LEN {
            return Err(ProtocolError::BadLength {
                expected: RESPONSE_LEN,
                actual: frame.len(),
            });
        }

        if frame[..2] != RESPONSE_PREAMBLE {
            return Err(ProtocolError::BadPreamble([frame[0], frame[1]]));
        }

        // Layout: preamble(2) nonce(4, LE) midstate(1) job(1) version(2, BE) crc(1)
        let nonce = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        let job = frame[7];
        let version = u16::from_be_bytes([frame[8], frame[9]]);

        Ok(AsicResult {
            job_id: job & 0xf8,
            small_core_id: job & 0x07,
            core_id: ((nonce.swap_bytes() >> 25) & 0x7f) as u8,
            nonce,
            version_bits: u32::from(version) << 13,
        })
    }

    /// The version actually hashed, given the version the job was sent with.
    pub fn rolled_version(&self, job_version: u32) -> u32 {
        job_version | self.version_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn encode(command: Command) -> Vec<u8> {
        let mut frame = BytesMut::new();
        FrameCodec.encode(command, &mut frame).unwrap();
        frame.to_vec()
    }

    #[test_case(Command::SetChipAddress { chip_address: 0 }, &[0x55, 0xaa, 0x40, 0x05, 0x00, 0x00, 0x1c]; "set_address")]
    #[test_case(Command::ChainInactive, &[0x55, 0xaa, 0x53, 0x05, 0x00, 0x00, 0x03]; "chain_inactive")]
    #[test_case(Command::ReadRegister { broadcast: true, chip_address: 0, register: reg::CHIP_ADDRESS }, &[0x55, 0xaa, 0x52, 0x05, 0x00, 0x00, 0x0a]; "read_chip_id")]
    #[test_case(Command::write_all(reg::FAST_UART, [0x11, 0x30, 0x02, 0x00]), &[0x55, 0xaa, 0x51, 0x09, 0x00, 0x28, 0x11, 0x30, 0x02, 0x00, 0x03]; "fast_uart")]
    #[test_case(Command::write_all(reg::VERSION_MASK, [0x90, 0x00, 0xff, 0xff]), &[0x55, 0xaa, 0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0xff, 0xff, 0x1c]; "version_mask")]
    #[test_case(Command::write_chip(0, reg::UART_RELAY, [0x00, 0x7c, 0x00, 0x03]), &[0x55, 0xaa, 0x41, 0x09, 0x00, 0x2c, 0x00, 0x7c, 0x00, 0x03, 0x03]; "single_chip_write")]
    fn command_frames(command: Command, expect: &[u8]) {
        assert_eq!(encode(command), expect, "\nexpected: {}", HexBytes(expect));
    }

    #[test]
    fn job_frame_matches_capture() {
        let expect = hex::decode(concat!(
            "55aa2156680100000000043a0217d7685468",
            "5519a7cb044f88726355919e61a98bcf71a0c28795ea54db8c36414b06ddf5f0",
            "0000000000000000965201001d3996bca3f4670dfcd4f201c162b96dfd55646b",
            "00000020721c",
        ))
        .unwrap();

        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&expect[18..50]);
        let mut prev_block_hash = [0u8; 32];
        prev_block_hash.copy_from_slice(&expect[50..82]);

        let frame = encode(Command::Job(JobPacket {
            job_id: 0x68,
            num_midstates: 1,
            starting_nonce: 0,
            nbits: 0x17023a04,
            ntime: 0x685468d7,
            merkle_root,
            prev_block_hash,
            version: 0x20000000,
        }));

        assert_eq!(frame.len(), 88);
        assert_eq!(frame, expect);
    }

    #[test]
    fn result_frame_decodes() {
        let frame = [0xaa, 0x55, 0x4c, 0x03, 0x52, 0x75, 0x0c, 0x1a, 0x05, 0xa2, 0x9c];
        let result = AsicResult::parse(&frame).unwrap();

        assert_eq!(result.nonce, 0x7552034c);
        assert_eq!(result.job_id, 0x18);
        assert_eq!(result.small_core_id, 2);
        assert_eq!(result.core_id, 0x26);
        assert_eq!(result.version_bits, 0x00b44000);
        assert_eq!(result.rolled_version(0x20000000), 0x20b44000);
    }

    #[test]
    fn result_frame_rejects_short_read() {
        let err = AsicResult::parse(&[0xaa, 0x55, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BadLength {
                expected: 11,
                actual: 3
            }
        ));
    }

    #[test]
    fn result_frame_rejects_bad_preamble() {
        let frame = [0x55, 0xaa, 0x4c, 0x03, 0x52, 0x75, 0x0c, 0x1a, 0x05, 0xa2, 0x9c];
        assert!(matches!(
            AsicResult::parse(&frame),
            Err(ProtocolError::BadPreamble([0x55, 0xaa]))
        ));
    }
}
