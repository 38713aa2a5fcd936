//! Stratum v1 client.
//!
//! Requests are fire-and-forget: each `send` writes one line and returns the
//! id it used. Responses come back through [`StratumClient::receive_message`]
//! along with notifications, and the caller matches them up by id. There is
//! no reconnect logic here; after a fatal error the caller builds a new
//! client and runs the handshake again.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::connection::{Connection, Transport};
use super::error::{StratumError, StratumResult};
use super::messages::{JsonRpcMessage, StratumEvent, SubmitParams, classify};

/// How long the pool may stay silent before the session is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Sent in `mining.subscribe`.
pub fn user_agent() -> String {
    format!("bitaxe/BM1366/{}", env!("CARGO_PKG_VERSION"))
}

/// Stratum v1 client over any line transport.
pub struct StratumClient<T: Transport> {
    transport: T,

    /// Auto-incrementing message ID
    next_id: u64,

    idle_timeout: Duration,
}

/// Client for a real pool connection.
pub type PoolClient = StratumClient<Connection>;

impl PoolClient {
    /// Open a TCP connection to the pool.
    pub async fn connect(host: &str, port: u16) -> StratumResult<Self> {
        Ok(Self::new(Connection::connect(host, port).await?))
    }
}

impl<T: Transport> StratumClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: 1,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Start numbering requests from 1 again.
    pub fn reset_request_ids(&mut self) {
        self.next_id = 1;
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send(&mut self, method: &str, params: Value) -> StratumResult<u64> {
        let id = self.next_id();
        let line = serde_json::to_string(&JsonRpcMessage::request(id, method, params))?;
        self.transport.write_line(&line).await?;
        Ok(id)
    }

    pub async fn subscribe(&mut self) -> StratumResult<u64> {
        self.send("mining.subscribe", json!([user_agent()])).await
    }

    /// Ask for version rolling over every bit; the pool answers with the
    /// mask it actually grants.
    pub async fn configure_version_rolling(&mut self) -> StratumResult<u64> {
        self.send(
            "mining.configure",
            json!([["version-rolling"], {"version-rolling.mask": "ffffffff"}]),
        )
        .await
    }

    pub async fn authenticate(&mut self, username: &str, password: &str) -> StratumResult<u64> {
        self.send("mining.authorize", json!([username, password]))
            .await
    }

    pub async fn suggest_difficulty(&mut self, difficulty: u64) -> StratumResult<u64> {
        self.send("mining.suggest_difficulty", json!([difficulty])).await
    }

    pub async fn submit_share(&mut self, params: &SubmitParams) -> StratumResult<u64> {
        let id = self.send("mining.submit", params.to_stratum_json()).await?;
        debug!(
            id,
            job_id = %params.job_id,
            nonce = format!("{:08x}", params.nonce),
            "Submitted share"
        );
        Ok(id)
    }

    /// Send the setup requests in their fixed order.
    ///
    /// Ids restart at 1 so that the responses land on the ids reserved for
    /// setup.
    pub async fn handshake(
        &mut self,
        username: &str,
        password: &str,
        suggested_difficulty: u64,
    ) -> StratumResult<()> {
        self.reset_request_ids();
        self.subscribe().await?;
        self.configure_version_rolling().await?;
        self.authenticate(username, password).await?;
        self.suggest_difficulty(suggested_difficulty).await?;
        Ok(())
    }

    /// Wait for the next usable message from the pool.
    ///
    /// Lines that fail to parse are logged and skipped. EOF is
    /// [`StratumError::Disconnected`]; silence longer than the idle timeout
    /// is [`StratumError::Timeout`].
    pub async fn receive_message(&mut self) -> StratumResult<StratumEvent> {
        loop {
            let line = timeout(self.idle_timeout, self.transport.read_line())
                .await
                .map_err(|_| StratumError::Timeout)??
                .ok_or(StratumError::Disconnected)?;

            match classify(&line) {
                Ok(event) => {
                    trace!(?event, "Classified message");
                    return Ok(event);
                }
                Err(e) => {
                    warn!(error = %e, line = %line, "Dropping unusable message from pool");
                }
            }
        }
    }
}
