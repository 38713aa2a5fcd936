//! Daemon lifecycle for bitaxe-miner.
//!
//! Startup brings the chip up before anything talks to the pool, so a board
//! without a working chain fails fast. After that the pipeline stages run
//! as tasks until a signal arrives or a stage hits an unrecoverable error.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::asic::bm1366::Bm1366;
use crate::config::Config;
use crate::context::MiningContext;
use crate::pipeline::{self, JOB_QUEUE_DEPTH, SHARE_QUEUE_DEPTH, TEMPLATE_QUEUE_DEPTH};
use crate::result::{MiningStats, ResultProcessor};
use crate::store::{JsonFileStore, KeyValueStore, keys};
use crate::tracing::prelude::*;
use crate::transport::serial::{DEFAULT_BAUD_RATE, SerialStream};

/// Chips expected on a Bitaxe board.
const EXPECTED_CHIPS: usize = 1;

/// The main daemon that coordinates all mining operations.
pub struct Daemon {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    ///
    /// Returns an error when a stage failed in a way the pipeline cannot
    /// recover from, so the process exits non-zero.
    pub async fn run(self) -> anyhow::Result<()> {
        let store_path = Config::store_path();
        let store: Arc<dyn KeyValueStore> = Arc::new(
            JsonFileStore::open(&store_path)
                .with_context(|| format!("opening settings at {}", store_path.display()))?,
        );
        let config = Arc::new(Config::from_env(store.as_ref())?);
        let stats = MiningStats::with_best_diff(store.get_u64(keys::BEST_DIFF, 0));
        let ctx = Arc::new(MiningContext::with_stats(stats));

        let serial_path = config.serial_path.to_string_lossy();
        let port = SerialStream::open(&serial_path, DEFAULT_BAUD_RATE)
            .with_context(|| format!("opening {serial_path}"))?;
        let mut chip = Bm1366::new(port);
        let chips = chip.init(config.frequency, EXPECTED_CHIPS).await?;
        chip.set_max_baud().await?;
        let (sender, receiver) = chip.split(ctx.clone())?;
        ctx.stats.mining_started(Instant::now());
        info!(chips, frequency = %config.frequency, "Chain ready");

        let (template_tx, template_rx) = mpsc::channel(TEMPLATE_QUEUE_DEPTH);
        let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        let (share_tx, share_rx) = mpsc::channel(SHARE_QUEUE_DEPTH);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);

        let stratum =
            pipeline::stratum_task(ctx.clone(), config.clone(), template_tx, share_rx);
        self.tracker.spawn(supervise(
            "stratum",
            async move { stratum.await.map_err(anyhow::Error::from) },
            self.shutdown.clone(),
            fatal_tx.clone(),
        ));

        let source = pipeline::job_source_task(ctx.clone(), template_rx, job_tx);
        self.tracker.spawn(supervise(
            "job source",
            async move {
                source.await;
                anyhow::Ok(())
            },
            self.shutdown.clone(),
            fatal_tx.clone(),
        ));

        let send = pipeline::sender_task(ctx.clone(), sender, job_rx);
        self.tracker.spawn(supervise(
            "sender",
            async move { send.await.map_err(anyhow::Error::from) },
            self.shutdown.clone(),
            fatal_tx.clone(),
        ));

        let processor = ResultProcessor::new(ctx.clone(), store.clone());
        let results =
            pipeline::result_task(processor, receiver, share_tx, config.username.clone());
        self.tracker.spawn(supervise(
            "results",
            async move { results.await.map_err(anyhow::Error::from) },
            self.shutdown.clone(),
            fatal_tx,
        ));
        self.tracker.close();

        info!("Started.");
        info!(
            "For hardware debugging, set RUST_LOG=bitaxe_miner=trace to see \
             all serial communication"
        );

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        let failure = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
                None
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                None
            },
            Some(e) = fatal_rx.recv() => Some(e),
        };

        trace!("Shutting down.");
        self.shutdown.cancel();
        self.tracker.wait().await;

        info!(
            best = %crate::result::suffix_string(ctx.stats.best_diff()),
            accepted = ctx.stats.shares_accepted(),
            rejected = ctx.stats.shares_rejected(),
            "Exiting."
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one pipeline stage until shutdown.
///
/// Stages are meant to run for the life of the process, so a stage that
/// returns, fails, or panics first is reported on `fatal`.
async fn supervise<F>(
    stage: &'static str,
    work: F,
    shutdown: CancellationToken,
    fatal: mpsc::Sender<anyhow::Error>,
) where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut handle = tokio::spawn(work);

    tokio::select! {
        joined = &mut handle => {
            let e = match joined {
                Ok(Ok(())) => anyhow!("{stage} stopped"),
                Ok(Err(e)) => e,
                Err(e) => anyhow!("{stage} panicked: {e}"),
            };
            error!(stage, error = %e, "Pipeline stage ended");
            // Only the first failure is needed to stop the daemon.
            let _ = fatal.try_send(e);
        }
        _ = shutdown.cancelled() => {
            handle.abort();
            debug!(stage, "Stage shutting down");
        }
    }
}
