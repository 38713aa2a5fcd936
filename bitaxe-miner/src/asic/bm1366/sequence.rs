//! Command sequences for BM1366 bring-up and reconfiguration.
//!
//! Sequences are data. [`BOOT`] lists the bring-up in order; the driver
//! walks it and expands the entries that depend on runtime state (chip
//! count, difficulty, target frequency). Porting to a sibling chip means
//! writing a new table, not a new state machine.

use std::time::Duration;

use super::pll::PllConfig;
use super::protocol::{Command, reg};
use crate::types::Frequency;

/// Version bits the chip rolls until the pool says otherwise.
pub const DEFAULT_VERSION_MASK: u32 = 0x1fffe000;

/// Frequency the PLL comes out of reset at.
pub const BASELINE_MHZ: f32 = 56.25;

const RAMP_STEP_MHZ: f32 = 6.25;
const RAMP_SETTLE: Duration = Duration::from_millis(100);

/// A command plus how long to wait after sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub command: Command,
    pub wait_after: Option<Duration>,
}

impl Step {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            wait_after: None,
        }
    }

    pub fn with_delay(command: Command, delay: Duration) -> Self {
        Self {
            command,
            wait_after: Some(delay),
        }
    }
}

/// One row of the bring-up table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStep {
    /// Broadcast register write.
    Write {
        register: u8,
        value: [u8; 4],
    },
    /// Register write addressed to the first chip only.
    WriteFirstChip {
        register: u8,
        value: [u8; 4],
    },
    /// Register writes repeated for each chip, all rows for one chip first.
    PerChip(&'static [(u8, [u8; 4])]),
    VersionMask(u32),
    /// Probe and count chips.
    Enumerate,
    ChainInactive,
    /// Address chips evenly across the 8-bit address space.
    AssignAddresses,
    DifficultyMask,
    FrequencyRamp,
}

pub const BOOT: &[BootStep] = &[
    BootStep::VersionMask(DEFAULT_VERSION_MASK),
    BootStep::VersionMask(DEFAULT_VERSION_MASK),
    BootStep::VersionMask(DEFAULT_VERSION_MASK),
    BootStep::Enumerate,
    BootStep::Write {
        register: reg::INIT_CONTROL,
        value: [0x00, 0x07, 0x00, 0x00],
    },
    BootStep::Write {
        register: reg::MISC_CONTROL,
        value: [0xff, 0x0f, 0xc1, 0x00],
    },
    BootStep::ChainInactive,
    BootStep::AssignAddresses,
    BootStep::Write {
        register: reg::CORE_REGISTER,
        value: [0x80, 0x00, 0x85, 0x40],
    },
    BootStep::Write {
        register: reg::CORE_REGISTER,
        value: [0x80, 0x00, 0x80, 0x20],
    },
    BootStep::DifficultyMask,
    BootStep::Write {
        register: reg::ANALOG_MUX,
        value: [0x00, 0x00, 0x00, 0x03],
    },
    BootStep::Write {
        register: reg::IO_DRIVER_STRENGTH,
        value: [0x02, 0x11, 0x11, 0x11],
    },
    BootStep::WriteFirstChip {
        register: reg::UART_RELAY,
        value: [0x00, 0x7c, 0x00, 0x03],
    },
    BootStep::PerChip(&[
        (reg::INIT_CONTROL, [0x00, 0x07, 0x01, 0xf0]),
        (reg::MISC_CONTROL, [0xf0, 0x00, 0xc1, 0x00]),
        (reg::CORE_REGISTER, [0x80, 0x00, 0x85, 0x40]),
        (reg::CORE_REGISTER, [0x80, 0x00, 0x80, 0x20]),
        (reg::CORE_REGISTER, [0x80, 0x00, 0x82, 0xaa]),
    ]),
    BootStep::FrequencyRamp,
    BootStep::Write {
        register: reg::HASH_COUNTING,
        value: [0x00, 0x00, 0x15, 0x1c],
    },
    BootStep::Write {
        register: reg::VERSION_MASK,
        value: [0x90, 0x00, 0xff, 0xff],
    },
];

pub fn version_mask(mask: u32) -> Command {
    let rolled = ((mask >> 13) & 0xffff) as u16;
    let [hi, lo] = rolled.to_be_bytes();
    Command::write_all(reg::VERSION_MASK, [0x90, 0x00, hi, lo])
}

pub fn pll(config: PllConfig) -> Command {
    Command::write_all(reg::PLL0_PARAMETER, config.register_value())
}

/// Switches the chain UART to 1 Mbaud.
pub fn max_baud() -> (Command, u32) {
    (
        Command::write_all(reg::FAST_UART, [0x11, 0x30, 0x02, 0x00]),
        1_000_000,
    )
}

/// Restores the power-on UART rate.
pub fn default_baud() -> (Command, u32) {
    (
        Command::write_all(reg::MISC_CONTROL, [0x00, 0x00, 0x7a, 0x31]),
        115_749,
    )
}

/// Largest power of two not above `difficulty`, minus one.
pub fn ticket_mask_value(difficulty: u32) -> u32 {
    match difficulty {
        0 => 0,
        d => (1u32 << d.ilog2()) - 1,
    }
}

/// Ticket mask register write for the given share difficulty.
///
/// The chip expects each byte of the mask bit-reversed, least significant
/// byte last.
pub fn ticket_mask(difficulty: u32) -> Command {
    let mask = ticket_mask_value(difficulty);
    let mut value = [0u8; 4];
    for (i, byte) in mask.to_le_bytes().into_iter().enumerate() {
        value[3 - i] = byte.reverse_bits();
    }
    Command::write_all(reg::TICKET_MASK, value)
}

/// PLL writes walking from `from` to `to` in bounded increments.
///
/// An off-grid starting point is first snapped to the 6.25 MHz grid in the
/// direction of travel. The target is always written last, even when the
/// walk already landed on it.
pub fn frequency_ramp(from: Frequency, to: Frequency) -> Vec<Step> {
    let target = to.mhz();
    let mut current = from.mhz();
    let up = target > current;
    let mut steps = vec![];

    let write = |mhz: f32| pll(PllConfig::for_frequency(Frequency::from_mhz(mhz)));

    if current % RAMP_STEP_MHZ != 0.0 {
        current = if up {
            (current / RAMP_STEP_MHZ).ceil() * RAMP_STEP_MHZ
        } else {
            (current / RAMP_STEP_MHZ).floor() * RAMP_STEP_MHZ
        };
        steps.push(Step::with_delay(write(current), RAMP_SETTLE));
    }

    while (up && current < target) || (!up && current > target) {
        let step = RAMP_STEP_MHZ.min((target - current).abs());
        current += if up { step } else { -step };
        steps.push(Step::with_delay(write(current), RAMP_SETTLE));
    }

    steps.push(Step::new(write(target)));
    steps
}
