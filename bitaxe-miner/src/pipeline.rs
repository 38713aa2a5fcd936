//! The four stages of the mining pipeline.
//!
//! ```text
//! pool ──> stratum ──templates──> job source ──jobs──> sender ──> chip
//!             ^                                                     │
//!             └──────shares────── result processor <── receiver <───┘
//! ```
//!
//! Templates and jobs travel stamped with the context epoch current when
//! they were made. Anything that invalidates outstanding work (a clean
//! notify, a new extranonce1, a reconnect) bumps the epoch, so stale work
//! still sitting in a queue is dropped instead of sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::asic::bm1366::{DriverResult, JOB_INTERVAL, ResultReceiver, WorkSender};
use crate::config::{Config, PoolConfig};
use crate::context::MiningContext;
use crate::job_builder::{AsicJob, build_job};
use crate::result::ResultProcessor;
use crate::stratum_v1::{
    MiningTemplate, PoolClient, StratumClient, StratumError, StratumEvent, StratumResult,
    SubmitParams, Transport,
};
use crate::tracing::prelude::*;
use crate::transport::SerialPort;

/// Wait between connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub const TEMPLATE_QUEUE_DEPTH: usize = 4;
pub const JOB_QUEUE_DEPTH: usize = 2;
pub const SHARE_QUEUE_DEPTH: usize = 16;

/// A template together with the epoch it arrived in.
#[derive(Debug)]
pub struct StampedTemplate {
    pub epoch: u64,
    pub template: MiningTemplate,
}

/// A job together with the epoch of its template.
#[derive(Debug)]
pub struct StampedJob {
    pub epoch: u64,
    pub job: Arc<AsicJob>,
}

/// Why a pool session ended without an error.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The pool sent `client.reconnect`.
    Reconnect,
    /// Nobody is listening for templates any more.
    Closed,
}

/// Drives one connected pool session until it ends.
///
/// Shares still queued from an earlier session are discarded first: their
/// jobs belong to an extranonce the pool no longer recognizes.
pub async fn run_session<T: Transport>(
    client: &mut StratumClient<T>,
    ctx: &MiningContext,
    config: &Config,
    templates: &mpsc::Sender<StampedTemplate>,
    shares: &mut mpsc::Receiver<SubmitParams>,
) -> StratumResult<SessionEnd> {
    let mut discarded = 0;
    while shares.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "Discarded shares from previous session");
    }

    client
        .handshake(
            &config.username,
            &config.password,
            config.suggested_difficulty,
        )
        .await?;

    loop {
        tokio::select! {
            event = client.receive_message() => {
                if let Some(end) = handle_event(event?, ctx, templates).await {
                    return Ok(end);
                }
            }
            Some(params) = shares.recv() => {
                let id = client.submit_share(&params).await?;
                debug!(id, job = %params.job_id, "Submitted share");
            }
        }
    }
}

async fn handle_event(
    event: StratumEvent,
    ctx: &MiningContext,
    templates: &mpsc::Sender<StampedTemplate>,
) -> Option<SessionEnd> {
    match event {
        StratumEvent::Notify(template) => {
            if template.clean_jobs {
                ctx.bump_epoch();
                ctx.invalidate_all();
            }
            debug!(
                job = %template.job_id,
                clean = template.clean_jobs,
                "New template"
            );
            let stamped = StampedTemplate {
                epoch: ctx.epoch(),
                template,
            };
            if templates.send(stamped).await.is_err() {
                return Some(SessionEnd::Closed);
            }
        }
        StratumEvent::SetDifficulty(difficulty) => {
            info!(difficulty, "Pool difficulty set");
            ctx.update_session(|s| s.pool_difficulty = difficulty);
        }
        StratumEvent::SetVersionMask(mask) | StratumEvent::VersionMaskResult(mask) => {
            info!(mask = format_args!("{:08x}", mask), "Version mask set");
            ctx.update_session(|s| s.version_mask = mask);
        }
        StratumEvent::SetupResult {
            id,
            success,
            subscription,
            reason,
        } => {
            if let Some(sub) = subscription {
                info!(
                    extranonce1 = %hex::encode(&sub.extranonce1),
                    extranonce2_len = sub.extranonce2_len,
                    "Subscribed"
                );
                ctx.update_session(|s| {
                    s.extranonce1 = sub.extranonce1;
                    s.extranonce2_len = sub.extranonce2_len;
                });
                ctx.bump_epoch();
                ctx.invalidate_all();
            } else if !success {
                warn!(
                    id,
                    reason = reason.as_deref().unwrap_or("none"),
                    "Setup request refused"
                );
            }
        }
        StratumEvent::SubmitResult {
            id,
            success,
            reason,
        } => {
            ctx.stats.record_submit_result(success);
            if success {
                info!(
                    id,
                    accepted = ctx.stats.shares_accepted(),
                    rejected = ctx.stats.shares_rejected(),
                    "Share accepted"
                );
            } else {
                warn!(
                    id,
                    reason = reason.as_deref().unwrap_or("none"),
                    rejected = ctx.stats.shares_rejected(),
                    "Share rejected"
                );
            }
        }
        StratumEvent::Reconnect => {
            info!("Pool requested reconnect");
            return Some(SessionEnd::Reconnect);
        }
        StratumEvent::Unknown => {}
    }
    None
}

/// Keeps a pool session up for the life of the process.
///
/// A failed connection or session moves on to the next configured pool; a
/// `client.reconnect` retries the same one. Every new session starts a new
/// epoch. Returns only on resource exhaustion or when the template queue
/// closes.
pub async fn stratum_task(
    ctx: Arc<MiningContext>,
    config: Arc<Config>,
    templates: mpsc::Sender<StampedTemplate>,
    mut shares: mpsc::Receiver<SubmitParams>,
) -> StratumResult<()> {
    let pools: Vec<&PoolConfig> = std::iter::once(&config.pool)
        .chain(config.fallback_pool.as_ref())
        .collect();
    let mut current = 0;

    loop {
        let pool = pools[current];
        info!(url = %pool.url, port = pool.port, "Connecting to pool");

        let failed = match PoolClient::connect(&pool.url, pool.port).await {
            Ok(mut client) => {
                let outcome =
                    run_session(&mut client, &ctx, &config, &templates, &mut shares).await;
                match outcome {
                    Ok(SessionEnd::Reconnect) => false,
                    Ok(SessionEnd::Closed) => return Ok(()),
                    Err(e @ StratumError::LineTooLong(_)) => return Err(e),
                    Err(e) => {
                        warn!(error = %e, url = %pool.url, "Pool session ended");
                        true
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, url = %pool.url, "Failed to connect to pool");
                true
            }
        };

        ctx.bump_epoch();
        ctx.invalidate_all();

        if failed {
            current = (current + 1) % pools.len();
        }
        time::sleep(RECONNECT_DELAY).await;
    }
}

/// Turns templates into a steady stream of jobs.
///
/// Each template yields one job immediately and then one per
/// [`JOB_INTERVAL`], stepping extranonce2 from 0. A newer template replaces
/// the current one at once. A template whose epoch has passed is dropped and
/// the source waits for the next.
pub async fn job_source_task(
    ctx: Arc<MiningContext>,
    mut templates: mpsc::Receiver<StampedTemplate>,
    jobs: mpsc::Sender<StampedJob>,
) {
    let mut current: Option<StampedTemplate> = None;
    let mut extranonce2: u32 = 0;

    loop {
        if current.is_none() {
            match templates.recv().await {
                Some(next) => {
                    current = Some(next);
                    extranonce2 = 0;
                }
                None => return,
            }
        }
        let Some(stamped) = &current else {
            continue;
        };

        let epoch = stamped.epoch;
        if epoch < ctx.epoch() {
            debug!(job = %stamped.template.job_id, "Template outlived its epoch");
            current = None;
            continue;
        }

        let job = build_job(&stamped.template, &ctx.session(), extranonce2);
        trace!(job = %job.template_job_id, extranonce2 = %job.extranonce2, "Built job");
        extranonce2 = extranonce2.wrapping_add(1);

        if jobs
            .send(StampedJob {
                epoch,
                job: Arc::new(job),
            })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            next = templates.recv() => match next {
                Some(next) => {
                    current = Some(next);
                    extranonce2 = 0;
                }
                None => return,
            },
            _ = time::sleep(JOB_INTERVAL) => {}
        }
    }
}

/// Feeds queued jobs to the chip, skipping those from a past epoch.
///
/// The chip's version mask follows the jobs: it is rewritten whenever a job
/// carries a different mask from the one before it.
pub async fn sender_task<P: SerialPort>(
    ctx: Arc<MiningContext>,
    mut sender: WorkSender<P>,
    mut jobs: mpsc::Receiver<StampedJob>,
) -> DriverResult<()> {
    let mut chip_mask = None;

    while let Some(StampedJob { epoch, job }) = jobs.recv().await {
        if epoch < ctx.epoch() {
            debug!(epoch, job = %job.template_job_id, "Dropping stale job");
            continue;
        }

        if chip_mask != Some(job.version_mask) {
            sender.set_version_mask(job.version_mask).await?;
            chip_mask = Some(job.version_mask);
        }
        sender.send_work(job).await?;
    }
    Ok(())
}

/// Scores every nonce the chip reports and queues the ones the pool wants.
pub async fn result_task<P: SerialPort>(
    processor: ResultProcessor,
    mut receiver: ResultReceiver<P>,
    shares: mpsc::Sender<SubmitParams>,
    username: String,
) -> DriverResult<()> {
    loop {
        let Some(result) = receiver.receive_work().await? else {
            continue;
        };
        let Some(share) = processor.process(&result) else {
            continue;
        };
        if !share.meets_pool_difficulty() {
            continue;
        }
        if shares.send(share.submit_params(&username)).await.is_err() {
            return Ok(());
        }
    }
}
