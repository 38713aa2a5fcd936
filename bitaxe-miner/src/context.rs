//! State shared between the pipeline stages.
//!
//! One [`MiningContext`] is created at startup and handed to every task by
//! `Arc`. Each table has its own lock so that a job install never waits on a
//! session update or the reverse.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitvec::prelude::*;
use parking_lot::{Mutex, RwLock};

use crate::job_builder::AsicJob;
use crate::result::stats::MiningStats;

/// Chip job ids step by this much.
pub const JOB_ID_STRIDE: u8 = 8;

/// Number of job id slots. Ids wrap modulo this.
pub const JOB_ID_CYCLE: usize = 128;

/// Per-connection parameters negotiated with the pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionParams {
    pub extranonce1: Vec<u8>,
    pub extranonce2_len: usize,
    pub version_mask: u32,
    pub pool_difficulty: f64,
}

pub struct MiningContext {
    session: RwLock<SessionParams>,
    jobs: RwLock<Vec<Option<Arc<AsicJob>>>>,
    valid: Mutex<BitArr!(for JOB_ID_CYCLE)>,
    epoch: AtomicU64,
    pub stats: MiningStats,
}

impl Default for MiningContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MiningContext {
    pub fn new() -> Self {
        Self::with_stats(MiningStats::default())
    }

    /// A fresh context carrying `stats`, e.g. seeded with a persisted best.
    pub fn with_stats(stats: MiningStats) -> Self {
        Self {
            session: RwLock::new(SessionParams::default()),
            jobs: RwLock::new(vec![None; JOB_ID_CYCLE]),
            valid: Mutex::new(BitArray::ZERO),
            epoch: AtomicU64::new(0),
            stats,
        }
    }

    /// Snapshot of the session parameters.
    pub fn session(&self) -> SessionParams {
        self.session.read().clone()
    }

    pub fn update_session(&self, f: impl FnOnce(&mut SessionParams)) {
        f(&mut self.session.write());
    }

    /// Puts `job` in slot `id`, retiring whatever was there.
    ///
    /// The validity lock is held across the swap, and [`lookup`](Self::lookup)
    /// holds it across its read, so a lookup sees the slot either wholly
    /// before or wholly after the install. Lock order is validity, then jobs.
    pub fn install_job(&self, id: u8, job: Arc<AsicJob>) -> Option<Arc<AsicJob>> {
        let slot = usize::from(id) % JOB_ID_CYCLE;
        let mut valid = self.valid.lock();
        let retired = self.jobs.write()[slot].replace(job);
        valid.set(slot, true);
        retired
    }

    /// The live job for `id`, if any.
    pub fn lookup(&self, id: u8) -> Option<Arc<AsicJob>> {
        let slot = usize::from(id);
        if slot >= JOB_ID_CYCLE {
            return None;
        }
        let valid = self.valid.lock();
        if !valid[slot] {
            return None;
        }
        self.jobs.read()[slot].clone()
    }

    pub fn is_valid(&self, id: u8) -> bool {
        let slot = usize::from(id);
        slot < JOB_ID_CYCLE && self.valid.lock()[slot]
    }

    /// Retires every job. Results still in flight for them will be dropped.
    pub fn invalidate_all(&self) {
        let mut valid = self.valid.lock();
        valid.fill(false);
        self.jobs.write().fill(None);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Starts a new epoch and returns it. Work stamped with an older epoch is
    /// stale.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::job_builder::build_job;
    use crate::job_builder::test_blocks::esp_miner_capture;
    use crate::stratum_v1::MiningTemplate;

    /// The captured job, built the way the daemon would.
    pub fn capture_job() -> AsicJob {
        let template =
            MiningTemplate::from_stratum_params(&esp_miner_capture::notify_params()).unwrap();
        let session = SessionParams {
            extranonce1: hex::decode(esp_miner_capture::EXTRANONCE1).unwrap(),
            extranonce2_len: esp_miner_capture::EXTRANONCE2_LEN,
            version_mask: esp_miner_capture::VERSION_MASK,
            pool_difficulty: esp_miner_capture::POOL_DIFFICULTY,
        };
        build_job(&template, &session, esp_miner_capture::EXTRANONCE2_COUNTER)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::capture_job;
    use super::*;

    fn job(ntime: u32) -> Arc<AsicJob> {
        let mut job = capture_job();
        job.ntime = ntime;
        Arc::new(job)
    }

    #[test]
    fn seventeenth_job_reuses_first_slot() {
        let ctx = MiningContext::new();
        let mut id = 0u8;
        let mut retired = vec![];

        for n in 0..17u32 {
            retired.push(ctx.install_job(id, job(n)));
            id = ((usize::from(id) + usize::from(JOB_ID_STRIDE)) % JOB_ID_CYCLE) as u8;
        }

        assert!(retired[..16].iter().all(Option::is_none));
        assert_eq!(retired[16].as_ref().map(|j| j.ntime), Some(0));
        assert_eq!(ctx.lookup(0).map(|j| j.ntime), Some(16));
        assert_eq!(ctx.lookup(8).map(|j| j.ntime), Some(1));
    }

    #[test]
    fn lookup_requires_validity() {
        let ctx = MiningContext::new();
        assert!(ctx.lookup(8).is_none());
        assert!(!ctx.is_valid(8));

        ctx.install_job(8, job(1));
        assert!(ctx.is_valid(8));
        assert!(ctx.lookup(8).is_some());
        assert!(ctx.lookup(16).is_none());
        assert!(ctx.lookup(200).is_none());
    }

    #[test]
    fn invalidate_all_retires_everything() {
        let ctx = MiningContext::new();
        ctx.install_job(0, job(1));
        ctx.install_job(8, job(2));

        ctx.invalidate_all();

        assert!(ctx.lookup(0).is_none());
        assert!(ctx.lookup(8).is_none());
    }

    #[test]
    fn install_waits_for_validity_lock() {
        let ctx = Arc::new(MiningContext::new());
        ctx.install_job(8, job(1));

        let valid = ctx.valid.lock();
        let installer = std::thread::spawn({
            let ctx = ctx.clone();
            move || ctx.install_job(8, job(2))
        });
        std::thread::sleep(std::time::Duration::from_millis(50));

        // While a reader holds the validity lock the slot cannot change
        // under it.
        assert_eq!(ctx.jobs.read()[8].as_ref().map(|j| j.ntime), Some(1));
        drop(valid);

        let retired = installer.join().unwrap();
        assert_eq!(retired.map(|j| j.ntime), Some(1));
        assert_eq!(ctx.lookup(8).map(|j| j.ntime), Some(2));
    }

    #[test]
    fn epochs_increase() {
        let ctx = MiningContext::new();
        assert_eq!(ctx.epoch(), 0);
        assert_eq!(ctx.bump_epoch(), 1);
        assert_eq!(ctx.bump_epoch(), 2);
        assert_eq!(ctx.epoch(), 2);
    }

    #[test]
    fn session_updates_are_visible() {
        let ctx = MiningContext::new();
        ctx.update_session(|s| {
            s.extranonce1 = vec![0x41, 0x28, 0x06, 0x4f];
            s.pool_difficulty = 8192.0;
        });

        let session = ctx.session();
        assert_eq!(session.extranonce1, [0x41, 0x28, 0x06, 0x4f]);
        assert_eq!(session.pool_difficulty, 8192.0);
    }
}
