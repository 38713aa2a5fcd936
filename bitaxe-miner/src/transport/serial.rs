//! Serial port over a Linux tty.
//!
//! ## Why not use tokio-serial?
//!
//! The chain boots at 115 749 baud and is switched to 1 Mbaud once the chips
//! are told to expect it, while a receive may be pending on another task.
//! tokio-serial's split consumes the stream, after which it can no longer be
//! reconfigured. Here the non-blocking descriptor is shared behind `&self`
//! and reconfigured in place with termios.

use std::io;
use std::os::unix::io::AsFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags, open};
use rustix::io::Errno;
use rustix::termios::{
    ControlModes, OptionalActions, QueueSelector, tcdrain, tcflush, tcgetattr, tcsetattr,
};
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;

use super::{Received, SerialPort};
use crate::tracing::prelude::*;

/// Baud rate the chain comes out of reset at.
pub const DEFAULT_BAUD_RATE: u32 = 115_749;

pub struct SerialStream {
    fd: AsyncFd<OwnedFd>,
    baud_rate: AtomicU32,
}

/// Raw 8N1 at `baud_rate`.
fn apply_serial_config<Fd: AsFd>(fd: &Fd, baud_rate: u32) -> io::Result<()> {
    let mut termios = tcgetattr(fd)?;

    // Raw mode for binary communication
    termios.make_raw();
    termios.set_speed(baud_rate)?;

    termios.control_modes &= !(ControlModes::CSIZE | ControlModes::PARENB | ControlModes::CSTOPB);
    termios.control_modes |= ControlModes::CS8 | ControlModes::CREAD | ControlModes::CLOCAL;

    tcsetattr(fd, OptionalActions::Now, &termios)?;
    Ok(())
}

/// Maps tty errnos onto io errors the driver can reason about.
fn map_errno(errno: Errno) -> io::Error {
    match errno {
        Errno::AGAIN => io::Error::from(io::ErrorKind::WouldBlock),
        // EIO can mean various hardware errors, not just disconnection
        Errno::IO => io::Error::other("serial hardware error"),
        Errno::PIPE => io::Error::new(io::ErrorKind::BrokenPipe, "serial port disconnected"),
        e => e.into(),
    }
}

impl SerialStream {
    /// Open `path` as a raw 8N1 port at `baud_rate`.
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let fd = open(
            path,
            OFlags::RDWR | OFlags::NOCTTY | OFlags::NONBLOCK,
            Mode::empty(),
        )?;
        debug!(path, baud_rate, "Opened serial port");
        Self::from_fd(fd, baud_rate)
    }

    /// Wrap an already open descriptor, configuring it for the chain.
    pub(crate) fn from_fd(fd: OwnedFd, baud_rate: u32) -> io::Result<Self> {
        apply_serial_config(&fd, baud_rate)?;

        let flags = rustix::fs::fcntl_getfl(&fd)?;
        rustix::fs::fcntl_setfl(&fd, flags | OFlags::NONBLOCK)?;

        Ok(Self {
            fd: AsyncFd::new(fd)?,
            baud_rate: AtomicU32::new(baud_rate),
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SerialPort for SerialStream {
    async fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let mut guard = self.fd.writable().await?;
            let result = guard.try_io(|fd| {
                rustix::io::write(fd.get_ref(), &data[written..]).map_err(map_errno)
            });
            match result {
                Ok(result) => written += result?,
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn receive(&self, max_len: usize, timeout: Duration) -> io::Result<Received> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;

        while filled < max_len {
            let Ok(guard) = tokio::time::timeout_at(deadline, self.fd.readable()).await else {
                break;
            };
            let mut guard = guard?;
            let result = guard.try_io(|fd| {
                rustix::io::read(fd.get_ref(), &mut buf[filled..]).map_err(map_errno)
            });
            match result {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial port closed",
                    ));
                }
                Ok(result) => filled += result?,
                Err(_would_block) => continue,
            }
        }

        if filled == 0 {
            return Ok(Received::Timeout);
        }
        buf.truncate(filled);
        Ok(Received::Data(buf))
    }

    fn clear_buffer(&self) -> io::Result<()> {
        tcflush(self.fd.get_ref(), QueueSelector::IFlush)?;
        Ok(())
    }

    fn set_baud_rate(&self, baud_rate: u32) -> io::Result<()> {
        let fd = self.fd.get_ref();
        let mut termios = tcgetattr(fd)?;
        termios.set_speed(baud_rate)?;

        // Apply once queued output has drained so in-flight frames keep
        // their rate.
        tcsetattr(fd, OptionalActions::Drain, &termios)?;

        self.baud_rate.store(baud_rate, Ordering::Release);
        debug!(baud_rate, "Changed serial baud rate");
        Ok(())
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        // Best effort drain; the descriptor closes with the OwnedFd.
        let _ = tcdrain(self.fd.get_ref());
    }
}
