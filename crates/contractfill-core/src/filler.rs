//! The per-reader driver: owns the block loop and wires the processor,
//! reversibility manager, job queue and notification sink together.
//!
//! ```text
//! BlockSource ─► Filler::process_block ─► DataProcessor (tiers) ─► commit
//!                     │                                             │
//!                     └─ Fork ─► ReversibilityManager::undo_from    └─► NotificationSink
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{readers_table, ReaderCheckpoint};
use crate::config::FillerConfig;
use crate::db::{delete_matching, Database};
use crate::destructor::Destructor;
use crate::error::FillerError;
use crate::handler::{ContractHandler, HandlerFactory, InitContext, RegisterContext};
use crate::jobs::JobQueue;
use crate::notifier::{Notification, NotificationSink, Outbox};
use crate::processor::DataProcessor;
use crate::reversible::ReversibilityManager;
use crate::row::{Filter, NaturalKey};
use crate::source::{BlockMessage, BlockSource, ChainState, StreamMessage};
use crate::transaction::{
    reversible_tables, ContractDBTransaction, REVERSIBLE_BLOCKS_TABLE, REVERSIBLE_QUERIES_TABLE,
};

/// Longest pause between two attempts of a block or source read.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// `base_ms * 2^(attempt - 1)`, capped at [`MAX_RETRY_BACKOFF`].
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_BACKOFF)
}

// ─── ReaderProgress ───────────────────────────────────────────────────────────

/// Shared view of how far a reader got; read by periodic jobs.
#[derive(Debug, Clone, Default)]
pub struct ReaderProgress {
    head: Arc<AtomicU64>,
    last_irreversible: Arc<AtomicU64>,
}

impl ReaderProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed block.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    pub fn last_irreversible(&self) -> u64 {
        self.last_irreversible.load(Ordering::Acquire)
    }

    pub fn set_head(&self, block_num: u64) {
        self.head.store(block_num, Ordering::Release);
    }

    /// Irreversibility never moves backwards.
    pub fn advance_irreversible(&self, block_num: u64) {
        self.last_irreversible.fetch_max(block_num, Ordering::AcqRel);
    }
}

// ─── ReaderState ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Not yet prepared.
    Idle,
    /// Schema ready, handlers initialized and registered.
    Prepared,
    /// Consuming the block source.
    Running,
    /// Source ended or stop block reached.
    Stopped,
    /// Encountered an unrecoverable error.
    Failed,
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Prepared => write!(f, "prepared"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters of one [`Filler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks: u64,
    pub skipped: u64,
    pub forks: u64,
    pub last_block: Option<u64>,
}

// ─── Filler ───────────────────────────────────────────────────────────────────

pub struct Filler {
    config: FillerConfig,
    db: Arc<dyn Database>,
    chain: Arc<dyn ChainState>,
    sink: Arc<dyn NotificationSink>,
    handlers: Vec<Arc<dyn ContractHandler>>,
    processor: DataProcessor,
    jobs: JobQueue,
    reversible: ReversibilityManager,
    progress: ReaderProgress,
    checkpoint: Option<ReaderCheckpoint>,
    state: ReaderState,
    registrations: Destructor,
}

impl Filler {
    pub fn new(
        config: FillerConfig,
        db: Arc<dyn Database>,
        chain: Arc<dyn ChainState>,
        sink: Arc<dyn NotificationSink>,
        handlers: Vec<Arc<dyn ContractHandler>>,
    ) -> Self {
        let reversible = ReversibilityManager::new(config.reader.clone());
        Self {
            config,
            db,
            chain,
            sink,
            handlers,
            processor: DataProcessor::new(),
            jobs: JobQueue::new(),
            reversible,
            progress: ReaderProgress::new(),
            checkpoint: None,
            state: ReaderState::Idle,
            registrations: Destructor::noop(),
        }
    }

    /// Build every configured contract module through `factory`.
    pub fn from_factory(
        config: FillerConfig,
        factory: &HandlerFactory,
        db: Arc<dyn Database>,
        chain: Arc<dyn ChainState>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, FillerError> {
        config.validate()?;
        let handlers = config
            .contracts
            .iter()
            .map(|c| factory.build(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config, db, chain, sink, handlers))
    }

    pub fn config(&self) -> &FillerConfig {
        &self.config
    }

    pub fn processor(&self) -> &DataProcessor {
        &self.processor
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn progress(&self) -> ReaderProgress {
        self.progress.clone()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn handlers(&self) -> &[Arc<dyn ContractHandler>] {
        &self.handlers
    }

    /// Block numbers currently tracked as reversible.
    pub fn reversible_blocks(&self) -> Vec<u64> {
        self.reversible.tracked()
    }

    /// Last committed block, if any.
    pub fn last_committed(&self) -> Option<u64> {
        self.checkpoint.as_ref().map(|c| c.block_num)
    }

    /// First block the source should deliver.
    pub fn next_block(&self) -> u64 {
        self.last_committed()
            .map(|b| b + 1)
            .unwrap_or(self.config.start_block)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Bootstrap schema, optionally wipe and upgrade, initialize and register
    /// every contract module.
    pub async fn prepare(&mut self) -> Result<(), FillerError> {
        let reader = self.config.reader.clone();
        info!(reader = %reader, backend = self.db.backend(), handlers = self.handlers.len(), "preparing filler");

        let mut tx = self.db.begin().await?;
        tx.create_table(&readers_table()).await?;
        for def in reversible_tables() {
            tx.create_table(&def).await?;
        }
        for handler in &self.handlers {
            let created = handler.setup(tx.as_mut()).await?;
            if created || self.config.upgrade {
                info!(handler = handler.name(), "upgrading views and procedures");
                handler.begin_upgrade(tx.as_mut()).await?;
                handler.finish_upgrade(tx.as_mut()).await?;
            }
        }
        if self.config.delete_data {
            warn!(reader = %reader, "deleting existing contract data");
            for handler in &self.handlers {
                handler.delete_db(tx.as_mut()).await?;
            }
            ReaderCheckpoint::delete(tx.as_mut(), &reader).await?;
            let ours = Filter::new().eq("reader", reader.as_str());
            delete_matching(tx.as_mut(), REVERSIBLE_QUERIES_TABLE, &ours).await?;
            delete_matching(tx.as_mut(), REVERSIBLE_BLOCKS_TABLE, &ours).await?;
        }
        self.checkpoint = ReaderCheckpoint::load(tx.as_mut(), &reader).await?;
        self.reversible.load(tx.as_mut()).await?;
        tx.commit().await?;

        // The oldest tracked reversible block bounds what is final in storage.
        let last_irreversible = match self.reversible.tracked().first() {
            Some(&oldest) => oldest.saturating_sub(1),
            None => self.chain.get_info().await?.last_irreversible_block_num,
        };
        if let Some(cp) = &self.checkpoint {
            self.progress.set_head(cp.block_num);
        }
        self.progress.advance_irreversible(last_irreversible);

        for handler in &self.handlers {
            let ctx = InitContext {
                db: self.db.as_ref(),
                chain: self.chain.as_ref(),
                reader: &reader,
                last_irreversible,
                reconcile_threshold: self.config.reconcile_threshold,
            };
            handler.init(&ctx).await?;
        }

        let ctx = RegisterContext {
            processor: &self.processor,
            jobs: &self.jobs,
            db: Arc::clone(&self.db),
            progress: self.progress.clone(),
            reader: &reader,
        };
        let mut registrations = Destructor::noop();
        for handler in &self.handlers {
            registrations.push(Arc::clone(handler).register(&ctx)?);
        }
        self.registrations = registrations;
        self.state = ReaderState::Prepared;

        info!(
            reader = %reader,
            next_block = self.next_block(),
            reversible = self.reversible.len(),
            tiers = self.processor.tiers().len(),
            jobs = self.jobs.len(),
            "filler prepared"
        );
        Ok(())
    }

    /// Unregister every handler and job.
    pub fn shutdown(&mut self) {
        std::mem::take(&mut self.registrations).run();
        self.state = ReaderState::Stopped;
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    /// Apply one block atomically. Returns `false` if the block was already
    /// committed and got skipped.
    pub async fn process_block(&mut self, msg: &BlockMessage) -> Result<bool, FillerError> {
        let block_num = msg.block.block_num;
        if let Some(last) = self.last_committed() {
            if block_num <= last {
                debug!(block = block_num, last, "skipping already committed block");
                return Ok(false);
            }
            if block_num > last + 1 {
                warn!(block = block_num, expected = last + 1, "gap in block stream");
            }
        }

        let max_attempts = self.config.max_block_retries.max(1);
        let mut attempt = 1;
        let (outbox, pruned) = loop {
            match self.try_block(msg).await {
                Ok(done) => break done,
                Err(e) => {
                    self.reload_handlers().await;
                    if e.is_retryable() && attempt < max_attempts {
                        let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                        warn!(block = block_num, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "block failed, retrying");
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    error!(block = block_num, attempt, error = %e, "block aborted");
                    return Err(e);
                }
            }
        };

        if msg.block.reversible {
            self.reversible.track(block_num);
        }
        self.reversible.forget(&pruned);
        for handler in &self.handlers {
            handler.committed(&msg.block);
        }
        self.checkpoint = Some(ReaderCheckpoint::new(
            self.config.reader.clone(),
            block_num,
            msg.block.timestamp,
            msg.block.reversible,
        ));
        self.progress.set_head(block_num);
        self.progress.advance_irreversible(msg.last_irreversible);

        let notifications = outbox.len();
        self.publish(outbox.into_notifications()).await;
        debug!(
            block = block_num,
            reversible = msg.block.reversible,
            notifications,
            "block committed"
        );
        Ok(true)
    }

    async fn try_block(&self, msg: &BlockMessage) -> Result<(Outbox, Vec<u64>), FillerError> {
        let inner = self.db.begin().await?;
        let mut tx = ContractDBTransaction::new(inner, self.config.reader.clone(), msg.block.clone())
            .with_insert_chunk_size(self.config.insert_chunk_size);

        match self.write_block(&mut tx, msg).await {
            Ok(done) => {
                tx.commit().await?;
                Ok(done)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(block = msg.block.block_num, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn write_block(
        &self,
        tx: &mut ContractDBTransaction,
        msg: &BlockMessage,
    ) -> Result<(Outbox, Vec<u64>), FillerError> {
        let outbox = self.processor.process(tx, &msg.deltas, &msg.traces).await?;
        let pruned = self.reversible.prune(tx.raw(), msg.last_irreversible).await?;
        ReaderCheckpoint::new(
            self.config.reader.clone(),
            msg.block.block_num,
            msg.block.timestamp,
            msg.block.reversible,
        )
        .save(tx.raw())
        .await?;
        Ok((outbox, pruned))
    }

    /// Roll back every tracked block `>= block_num` and rewind the checkpoint
    /// to `block_num - 1`.
    pub async fn handle_fork(&mut self, block_num: u64) -> Result<(), FillerError> {
        let reader = self.config.reader.clone();
        let new_tip = block_num.saturating_sub(1);

        // Blocks committed as irreversible can't be undone.
        if let Some(last) = self.last_committed() {
            if let Some(final_block) =
                (block_num..=last).find(|b| !self.reversible.is_tracked(*b))
            {
                return Err(FillerError::Chain(format!(
                    "fork to block {block_num} would retract irreversible block {final_block}"
                )));
            }
        }

        warn!(reader = %reader, block = block_num, "fork detected, rolling back");
        let mut tx = self.db.begin().await?;
        let undone = self.reversible.undo_from(tx.as_mut(), block_num).await?;

        let tip_time = tx
            .get(
                REVERSIBLE_BLOCKS_TABLE,
                &NaturalKey(vec![json!(reader), json!(new_tip)]),
            )
            .await?
            .and_then(|row| row.get("timestamp").and_then(|v| v.as_i64()))
            .or_else(|| self.checkpoint.as_ref().map(|c| c.block_time))
            .unwrap_or_default();
        let rewound = match &self.checkpoint {
            Some(cp) if cp.block_num >= block_num => Some(ReaderCheckpoint::new(
                reader.clone(),
                new_tip,
                tip_time,
                cp.live,
            )),
            other => other.clone(),
        };
        if let Some(cp) = &rewound {
            cp.save(tx.as_mut()).await?;
        }
        tx.commit().await?;

        self.reversible.forget(&undone);
        self.checkpoint = rewound;
        if let Some(cp) = &self.checkpoint {
            self.progress.set_head(cp.block_num);
        }
        self.reload_handlers().await;
        info!(reader = %reader, new_tip, undone = undone.len(), "fork rollback committed");

        self.publish(vec![Notification::Fork { block_num: new_tip }])
            .await;
        Ok(())
    }

    /// Consume `source` until it ends, the stop block is reached, or a
    /// non-retryable error occurs. Periodic jobs run alongside.
    pub async fn run(&mut self, source: &mut dyn BlockSource) -> Result<RunSummary, FillerError> {
        if self.state == ReaderState::Idle {
            self.prepare().await?;
        }
        self.state = ReaderState::Running;
        let jobs = self.jobs.start(Duration::from_millis(self.config.job_tick_ms));
        info!(reader = %self.config.reader, from = self.next_block(), "filler running");

        let result = self.consume(source).await;
        jobs.stop().await;

        match result {
            Ok(summary) => {
                self.state = ReaderState::Stopped;
                info!(
                    reader = %self.config.reader,
                    blocks = summary.blocks,
                    skipped = summary.skipped,
                    forks = summary.forks,
                    "filler stopped"
                );
                Ok(summary)
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                error!(reader = %self.config.reader, error = %e, "filler failed");
                Err(e)
            }
        }
    }

    async fn consume(&mut self, source: &mut dyn BlockSource) -> Result<RunSummary, FillerError> {
        let mut summary = RunSummary::default();
        let mut source_failures = 0u32;
        loop {
            let message = match source.next().await {
                Ok(Some(message)) => {
                    source_failures = 0;
                    message
                }
                Ok(None) => break,
                Err(e) if e.is_retryable() && source_failures + 1 < self.config.max_block_retries => {
                    source_failures += 1;
                    let backoff = retry_backoff(self.config.retry_backoff_ms, source_failures);
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "block source failed, retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match message {
                StreamMessage::Block(msg) => {
                    if self.process_block(&msg).await? {
                        summary.blocks += 1;
                        summary.last_block = Some(msg.block.block_num);
                    } else {
                        summary.skipped += 1;
                    }
                    if let Some(stop) = self.config.stop_block {
                        if msg.block.block_num >= stop {
                            info!(stop, "stop block reached");
                            break;
                        }
                    }
                }
                StreamMessage::Fork { block_num } => {
                    self.handle_fork(block_num).await?;
                    summary.forks += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Err(e) = self.sink.publish(notification).await {
                warn!(error = %e, "failed to publish notification");
            }
        }
    }

    async fn reload_handlers(&self) {
        for handler in &self.handlers {
            if let Err(e) = handler.reload(self.db.as_ref()).await {
                warn!(handler = handler.name(), error = %e, "failed to reload handler state");
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
