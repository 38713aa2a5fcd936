//! Byte-stream link to the chip chain.
//!
//! The driver talks to the chain through [`SerialPort`], so the same code
//! runs over a real tty ([`serial::SerialStream`]) or a scripted mock in
//! tests.

pub mod serial;

use std::io;
use std::time::Duration;

use async_trait::async_trait;

pub use serial::SerialStream;

/// Outcome of a [`SerialPort::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// At least one byte arrived; possibly fewer than asked for.
    Data(Vec<u8>),
    /// Nothing arrived before the timeout.
    Timeout,
}

/// Half-duplex-safe serial access.
///
/// All methods take `&self` so that one task can send while another waits
/// on `receive`. Only one task may receive at a time.
#[async_trait]
pub trait SerialPort: Send + Sync {
    /// Write all of `data`.
    async fn send(&self, data: &[u8]) -> io::Result<()>;

    /// Read up to `max_len` bytes, waiting at most `timeout` for them.
    async fn receive(&self, max_len: usize, timeout: Duration) -> io::Result<Received>;

    /// Discard whatever has been received but not yet read.
    fn clear_buffer(&self) -> io::Result<()>;

    fn set_baud_rate(&self, baud_rate: u32) -> io::Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        sent: Vec<Vec<u8>>,
        rx: VecDeque<Vec<u8>>,
        replies: Vec<(Vec<u8>, Vec<Vec<u8>>)>,
        baud_rate: u32,
        clears: usize,
    }

    /// Scripted serial port.
    ///
    /// Bytes queued with [`push_rx`](Self::push_rx) are handed out one chunk
    /// per `receive`; an empty queue sleeps out the timeout. Replies
    /// registered with [`reply_to`](Self::reply_to) are queued whenever the
    /// matching frame is sent. Clones share state.
    #[derive(Clone, Default)]
    pub struct MockSerial {
        state: Arc<Mutex<State>>,
    }

    impl MockSerial {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_rx(&self, chunk: impl Into<Vec<u8>>) {
            self.state.lock().rx.push_back(chunk.into());
        }

        pub fn reply_to(&self, frame: impl Into<Vec<u8>>, replies: Vec<Vec<u8>>) {
            self.state.lock().replies.push((frame.into(), replies));
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.state.lock().sent.clone()
        }

        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.state.lock().sent)
        }

        pub fn baud_rate(&self) -> u32 {
            self.state.lock().baud_rate
        }

        pub fn clears(&self) -> usize {
            self.state.lock().clears
        }

        pub fn pending_rx(&self) -> usize {
            self.state.lock().rx.len()
        }
    }

    #[async_trait]
    impl SerialPort for MockSerial {
        async fn send(&self, data: &[u8]) -> io::Result<()> {
            let mut state = self.state.lock();
            state.sent.push(data.to_vec());
            let replies: Vec<Vec<u8>> = state
                .replies
                .iter()
                .filter(|(frame, _)| frame == data)
                .flat_map(|(_, replies)| replies.clone())
                .collect();
            state.rx.extend(replies);
            Ok(())
        }

        async fn receive(&self, max_len: usize, timeout: Duration) -> io::Result<Received> {
            let chunk = {
                let mut state = self.state.lock();
                match state.rx.pop_front() {
                    Some(mut chunk) if chunk.len() > max_len => {
                        let rest = chunk.split_off(max_len);
                        state.rx.push_front(rest);
                        Some(chunk)
                    }
                    chunk => chunk,
                }
            };

            match chunk {
                Some(chunk) => Ok(Received::Data(chunk)),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(Received::Timeout)
                }
            }
        }

        fn clear_buffer(&self) -> io::Result<()> {
            let mut state = self.state.lock();
            state.rx.clear();
            state.clears += 1;
            Ok(())
        }

        fn set_baud_rate(&self, baud_rate: u32) -> io::Result<()> {
            self.state.lock().baud_rate = baud_rate;
            Ok(())
        }
    }
}
