//! Turns chip results into shares.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::difficulty::{network_difficulty, share_difficulty};
use super::stats::suffix_string;
use crate::asic::bm1366::{ASIC_DIFFICULTY, AsicResult};
use crate::context::MiningContext;
use crate::job_builder::AsicJob;
use crate::store::{KeyValueStore, keys};
use crate::stratum_v1::SubmitParams;
use crate::tracing::prelude::*;

/// A chip result matched to its job and scored.
#[derive(Debug, Clone)]
pub struct ShareResult {
    pub job: Arc<AsicJob>,
    pub job_id: u8,
    pub nonce: u32,
    pub rolled_version: u32,
    pub difficulty: f64,
    pub block_found: bool,
}

impl ShareResult {
    /// Whether the pool wants this share.
    pub fn meets_pool_difficulty(&self) -> bool {
        self.difficulty > self.job.pool_difficulty
    }

    pub fn submit_params(&self, username: &str) -> SubmitParams {
        SubmitParams {
            username: username.to_string(),
            job_id: self.job.template_job_id.clone(),
            extranonce2: self.job.extranonce2,
            ntime: self.job.ntime,
            nonce: self.nonce,
            version_bits: self.rolled_version ^ self.job.version,
        }
    }
}

pub struct ResultProcessor {
    ctx: Arc<MiningContext>,
    store: Arc<dyn KeyValueStore>,
    persisting: Arc<Mutex<()>>,
}

impl ResultProcessor {
    pub fn new(ctx: Arc<MiningContext>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            ctx,
            store,
            persisting: Arc::new(Mutex::new(())),
        }
    }

    /// Writes the all-time best to the store.
    ///
    /// Store writes block on file I/O, so inside a runtime they go to the
    /// blocking pool. Writes are serialized and each stores the best as it
    /// stands when it runs, so a late write never replaces a higher value.
    fn persist_best(&self) {
        let ctx = Arc::clone(&self.ctx);
        let store = Arc::clone(&self.store);
        let persisting = Arc::clone(&self.persisting);
        let write = move || {
            let _guard = persisting.lock();
            if let Err(e) = store.set_u64(keys::BEST_DIFF, ctx.stats.best_diff()) {
                warn!(error = %e, "Failed to persist best difficulty");
            }
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }

    pub fn process(&self, result: &AsicResult) -> Option<ShareResult> {
        self.process_at(result, Instant::now())
    }

    /// Scores `result` as seen at `at`.
    ///
    /// Results for ids that are not live are dropped without touching the
    /// statistics: the job they were found for is gone.
    pub fn process_at(&self, result: &AsicResult, at: Instant) -> Option<ShareResult> {
        let Some(job) = self.ctx.lookup(result.job_id) else {
            warn!(job_id = result.job_id, "Invalid job found, dropping result");
            return None;
        };

        let rolled_version = result.rolled_version(job.version);
        let hash = job.header(rolled_version, result.nonce).block_hash();
        let difficulty = share_difficulty(&hash);

        info!(
            job_id = result.job_id,
            nonce = format_args!("{:08x}", result.nonce),
            version = format_args!("{:08x}", rolled_version),
            "Nonce difficulty {:.2} of {}",
            difficulty,
            job.pool_difficulty
        );

        let stats = &self.ctx.stats;
        let ghs = stats.record_result(at, f64::from(ASIC_DIFFICULTY));
        debug!(ghs = format_args!("{:.1}", ghs), "Hashrate");

        let best = stats.record_difficulty(difficulty);
        if best.session {
            debug!(best = %suffix_string(stats.best_session_diff()), "New session best");
        }
        if best.all_time {
            let best_diff = stats.best_diff();
            info!(best = %suffix_string(best_diff), "New best difficulty");
            self.persist_best();
        }

        let network = network_difficulty(job.nbits);
        let block_found = difficulty > network;
        if block_found {
            stats.record_block();
            info!(
                hash = %hash,
                "FOUND BLOCK!!! {} > {}",
                difficulty,
                network
            );
        }

        Some(ShareResult {
            job,
            job_id: result.job_id,
            nonce: result.nonce,
            rolled_version,
            difficulty,
            block_found,
        })
    }
}
