//! Outbound notifications for downstream consumers.
//!
//! Processors queue trace notifications in the block's [`Outbox`]. The filler
//! publishes the outbox to a [`NotificationSink`] only after the block has
//! committed; an aborted block's outbox is dropped. Fork notifications are
//! published after the rollback committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::FillerError;
use crate::types::{ActionTrace, BlockRef};

/// A committed action trace forwarded to subscribers of `category`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNotification {
    pub category: String,
    pub block: BlockRef,
    /// Id of the transaction the trace belongs to.
    pub transaction: String,
    pub trace: ActionTrace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Trace(TraceNotification),
    /// The chain was rolled back; `block_num` is the new canonical tip.
    Fork { block_num: u64 },
}

/// Per-block queue of pending trace notifications.
#[derive(Debug)]
pub struct Outbox {
    block: BlockRef,
    pending: Vec<Notification>,
}

impl Outbox {
    pub fn new(block: BlockRef) -> Self {
        Self {
            block,
            pending: Vec::new(),
        }
    }

    /// Queue `trace` for subscribers of `category`.
    pub fn send(&mut self, category: impl Into<String>, trace: &ActionTrace) {
        self.pending.push(Notification::Trace(TraceNotification {
            category: category.into(),
            block: self.block,
            transaction: trace.tx_id.clone(),
            trace: trace.clone(),
        }));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn into_notifications(self) -> Vec<Notification> {
        self.pending
    }
}

/// Receiver of committed notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), FillerError>;
}

// ─── BroadcastRelay ───────────────────────────────────────────────────────────

/// Fans notifications out over a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error; the notification is
/// dropped.
pub struct BroadcastRelay {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastRelay {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Notification>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastRelay {
    async fn publish(&self, notification: Notification) -> Result<(), FillerError> {
        if self.tx.send(notification).is_err() {
            debug!("no notification subscribers");
        }
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn publish(&self, _notification: Notification) -> Result<(), FillerError> {
        Ok(())
    }
}
