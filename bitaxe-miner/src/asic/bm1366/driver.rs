//! BM1366 chain driver.
//!
//! [`Bm1366`] owns the serial link through bring-up. Once the chain is
//! mining it splits into a [`WorkSender`] and a [`ResultReceiver`] so the
//! send and receive paths can run as separate tasks over the same port.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::{self, Instant};
use tokio_util::codec::Encoder;

use super::error::{DriverError, DriverResult};
use super::protocol::{
    AsicResult, Command, FrameCodec, HexBytes, JobPacket, RESPONSE_LEN, RESPONSE_PREAMBLE, reg,
};
use super::sequence::{self, BASELINE_MHZ, BOOT, BootStep, Step};
use crate::context::{JOB_ID_CYCLE, JOB_ID_STRIDE, MiningContext};
use crate::job_builder::AsicJob;
use crate::tracing::prelude::*;
use crate::transport::{Received, SerialPort};
use crate::types::Frequency;

/// Share difficulty programmed into the ticket mask.
pub const ASIC_DIFFICULTY: u32 = 256;

/// Pause between jobs handed to the chain.
pub const JOB_INTERVAL: Duration = Duration::from_millis(2000);

/// Discovery stops counting here even if more chips answer.
pub const MAX_CHIPS: usize = 64;

const PROBE_TIMEOUT: Duration = Duration::from_millis(1000);
const RESULT_TIMEOUT: Duration = Duration::from_millis(10_000);
const TIMEOUT_THRESHOLD: u32 = 2;
const RESET_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Reset,
    Detect,
    Configure,
    Mining,
}

pub struct Bm1366<P> {
    port: Arc<P>,
    state: DriverState,
    chip_count: usize,
    frequency: Frequency,
}

impl<P: SerialPort> Bm1366<P> {
    pub fn new(port: P) -> Self {
        Self {
            port: Arc::new(port),
            state: DriverState::Reset,
            chip_count: 0,
            frequency: Frequency::from_mhz(BASELINE_MHZ),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn chip_count(&self) -> usize {
        self.chip_count
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Brings the chain from power-on to mining at `target`.
    ///
    /// Returns the number of chips found. A count different from
    /// `expected_chips` is logged but not fatal.
    pub async fn init(&mut self, target: Frequency, expected_chips: usize) -> DriverResult<usize> {
        self.reset().await?;

        for step in BOOT {
            match *step {
                BootStep::Write { register, value } => {
                    self.send(Command::write_all(register, value)).await?;
                }
                BootStep::WriteFirstChip { register, value } => {
                    self.send(Command::write_chip(0, register, value)).await?;
                }
                BootStep::PerChip(rows) => {
                    for address in self.addresses() {
                        for &(register, value) in rows {
                            self.send(Command::write_chip(address, register, value))
                                .await?;
                        }
                    }
                }
                BootStep::VersionMask(mask) => self.set_version_mask(mask).await?,
                BootStep::Enumerate => {
                    let found = self.enumerate().await?;
                    if found != expected_chips {
                        warn!(
                            expected = expected_chips,
                            found,
                            "Chip count mismatch, continuing with available chips"
                        );
                    }
                }
                BootStep::ChainInactive => self.send(Command::ChainInactive).await?,
                BootStep::AssignAddresses => self.assign_addresses().await?,
                BootStep::DifficultyMask => self.set_difficulty_mask(ASIC_DIFFICULTY).await?,
                BootStep::FrequencyRamp => self.set_frequency(target).await?,
            }
        }

        self.state = DriverState::Mining;
        info!(chips = self.chip_count, mhz = target.mhz(), "Chain initialized");
        Ok(self.chip_count)
    }

    /// Drops anything buffered and waits for the chain to go quiet.
    ///
    /// Pulsing the reset line is board glue; by the time this runs the
    /// chips are expected to be freshly out of reset.
    pub async fn reset(&mut self) -> DriverResult<()> {
        self.state = DriverState::Reset;
        self.chip_count = 0;
        self.frequency = Frequency::from_mhz(BASELINE_MHZ);

        self.port.clear_buffer()?;
        time::sleep(RESET_SETTLE).await;
        self.port.clear_buffer()?;
        time::sleep(RESET_SETTLE).await;

        self.state = DriverState::Detect;
        Ok(())
    }

    /// Counts chips by broadcasting a chip-id read.
    ///
    /// Every chip answers with one frame. Counting stops at the first
    /// timeout, the first frame without a response preamble, or
    /// [`MAX_CHIPS`]. The chain must be quiet, otherwise stray nonce
    /// reports would be counted as chips.
    pub async fn enumerate(&mut self) -> DriverResult<usize> {
        self.send(Command::ReadRegister {
            broadcast: true,
            chip_address: 0,
            register: reg::CHIP_ADDRESS,
        })
        .await?;

        let mut count = 0;
        while count < MAX_CHIPS {
            let frame = read_frame(&*self.port, PROBE_TIMEOUT).await?;
            if frame.is_empty() {
                break;
            }
            if frame.len() != RESPONSE_LEN || frame[..2] != RESPONSE_PREAMBLE {
                warn!(frame = %HexBytes(&frame), "Unexpected discovery response");
                break;
            }
            trace!(frame = %HexBytes(&frame), "Chip answered");
            count += 1;
        }

        if count == MAX_CHIPS {
            warn!(max = MAX_CHIPS, "Discovery hit the chip cap");
        }
        if count == 0 {
            return Err(DriverError::NoChips);
        }

        info!(chips = count, "Chips detected");
        self.chip_count = count;
        self.state = DriverState::Configure;
        Ok(count)
    }

    /// Addresses spread evenly over 0..=255 by chain position.
    pub fn addresses(&self) -> Vec<u8> {
        if self.chip_count == 0 {
            return vec![];
        }
        let interval = 256 / self.chip_count;
        (0..self.chip_count).map(|i| (i * interval) as u8).collect()
    }

    async fn assign_addresses(&self) -> DriverResult<()> {
        for chip_address in self.addresses() {
            self.send(Command::SetChipAddress { chip_address }).await?;
        }
        Ok(())
    }

    /// Walks the PLL from the current frequency to `target`.
    pub async fn set_frequency(&mut self, target: Frequency) -> DriverResult<()> {
        let steps = sequence::frequency_ramp(self.frequency, target);
        debug!(
            from_mhz = self.frequency.mhz(),
            to_mhz = target.mhz(),
            steps = steps.len(),
            "Ramping frequency"
        );
        self.run(steps).await?;
        self.frequency = target;
        info!(mhz = target.mhz(), "Frequency set");
        Ok(())
    }

    pub async fn set_version_mask(&self, mask: u32) -> DriverResult<()> {
        self.send(sequence::version_mask(mask)).await
    }

    pub async fn set_difficulty_mask(&self, difficulty: u32) -> DriverResult<()> {
        debug!(difficulty, "Setting ticket mask");
        self.send(sequence::ticket_mask(difficulty)).await
    }

    /// Switches chips and port to the fast UART rate. Returns the new rate.
    pub async fn set_max_baud(&self) -> DriverResult<u32> {
        self.switch_baud(sequence::max_baud()).await
    }

    /// Puts chips and port back on the power-on UART rate.
    pub async fn set_default_baud(&self) -> DriverResult<u32> {
        self.switch_baud(sequence::default_baud()).await
    }

    async fn switch_baud(&self, (command, baud_rate): (Command, u32)) -> DriverResult<u32> {
        self.send(command).await?;
        self.port.set_baud_rate(baud_rate)?;
        info!(baud_rate, "Serial rate changed");
        Ok(baud_rate)
    }

    /// Hands the port to separate send and receive halves.
    pub fn split(
        self,
        ctx: Arc<MiningContext>,
    ) -> DriverResult<(WorkSender<P>, ResultReceiver<P>)> {
        if self.state != DriverState::Mining {
            return Err(DriverError::WrongState {
                expected: DriverState::Mining,
                actual: self.state,
            });
        }

        let sender = WorkSender {
            port: Arc::clone(&self.port),
            ctx,
            next_id: 0,
        };
        let receiver = ResultReceiver {
            port: self.port,
            timeouts: 0,
        };
        Ok((sender, receiver))
    }

    async fn run(&self, steps: Vec<Step>) -> DriverResult<()> {
        for step in steps {
            self.send(step.command).await?;
            if let Some(delay) = step.wait_after {
                time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> DriverResult<()> {
        send_command(&*self.port, command).await
    }
}

/// Sending half of a mining chain.
pub struct WorkSender<P> {
    port: Arc<P>,
    ctx: Arc<MiningContext>,
    next_id: u8,
}

impl<P: SerialPort> WorkSender<P> {
    /// Installs `job` under the next rolling id and sends it. Returns the id.
    ///
    /// The job is live in the context before the chip sees it, so a result
    /// can never arrive for an id the processor does not know.
    pub async fn send_work(&mut self, job: Arc<AsicJob>) -> DriverResult<u8> {
        self.next_id =
            ((usize::from(self.next_id) + usize::from(JOB_ID_STRIDE)) % JOB_ID_CYCLE) as u8;
        let job_id = self.next_id;

        let packet = JobPacket::new(job_id, &job);
        if let Some(retired) = self.ctx.install_job(job_id, job) {
            trace!(job_id, template = %retired.template_job_id, "Retired job");
        }

        debug!(job_id, "Send job");
        send_command(&*self.port, Command::Job(packet)).await?;
        Ok(job_id)
    }

    pub async fn set_version_mask(&self, mask: u32) -> DriverResult<()> {
        debug!(mask = format_args!("{:08x}", mask), "Setting version mask");
        send_command(&*self.port, sequence::version_mask(mask)).await
    }
}

/// Receiving half of a mining chain.
pub struct ResultReceiver<P> {
    port: Arc<P>,
    timeouts: u32,
}

impl<P: SerialPort> ResultReceiver<P> {
    /// Waits for one nonce report.
    ///
    /// `Ok(None)` covers a quiet chain and a garbled frame; both are
    /// recoverable. Garbled input is discarded along with anything still
    /// buffered behind it.
    pub async fn receive_work(&mut self) -> DriverResult<Option<AsicResult>> {
        let frame = read_frame(&*self.port, RESULT_TIMEOUT).await?;

        if frame.is_empty() {
            if self.timeouts >= TIMEOUT_THRESHOLD {
                error!("ASIC not sending data");
                self.timeouts = 0;
            }
            self.timeouts += 1;
            return Ok(None);
        }

        match AsicResult::parse(&frame) {
            Ok(result) => {
                self.timeouts = 0;
                trace!(frame = %HexBytes(&frame), "RX BM1366");
                debug!(
                    job_id = result.job_id,
                    core = result.core_id,
                    small_core = result.small_core_id,
                    version_bits = format_args!("{:08x}", result.version_bits),
                    "Result"
                );
                Ok(Some(result))
            }
            Err(e) => {
                warn!(frame = %HexBytes(&frame), error = %e, "Serial RX invalid");
                self.port.clear_buffer()?;
                Ok(None)
            }
        }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.timeouts
    }
}

async fn send_command<P: SerialPort + ?Sized>(port: &P, command: Command) -> DriverResult<()> {
    let mut frame = BytesMut::new();
    FrameCodec.encode(command, &mut frame)?;
    port.send(&frame).await?;
    Ok(())
}

/// Reads up to one response frame, stopping early on timeout.
///
/// An empty result means nothing arrived at all.
async fn read_frame<P: SerialPort + ?Sized>(port: &P, timeout: Duration) -> DriverResult<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut frame = Vec::with_capacity(RESPONSE_LEN);

    while frame.len() < RESPONSE_LEN {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match port.receive(RESPONSE_LEN - frame.len(), remaining).await? {
            Received::Data(bytes) => frame.extend_from_slice(&bytes),
            Received::Timeout => break,
        }
    }

    Ok(frame)
}
