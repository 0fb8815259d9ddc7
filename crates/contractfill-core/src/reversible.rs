//! Reversibility manager: tracks not-yet-final blocks and undoes their writes
//! when the chain forks.
//!
//! Undo logs are written by [`ContractDBTransaction`](crate::transaction::ContractDBTransaction)
//! as part of each reversible block's commit. This manager only keeps the set
//! of tracked block numbers in memory and replays logs backwards on a fork.
//! Methods that write take the caller's transaction and return the affected
//! block numbers; call [`forget`](ReversibilityManager::forget) once that
//! transaction committed.

use std::collections::BTreeSet;

use serde_json::json;
use tracing::{debug, info};

use crate::db::DatabaseTransaction;
use crate::error::FillerError;
use crate::row::{Filter, NaturalKey, Order, Query};
use crate::transaction::{UndoOp, REVERSIBLE_BLOCKS_TABLE, REVERSIBLE_QUERIES_TABLE};

pub struct ReversibilityManager {
    reader: String,
    tracked: BTreeSet<u64>,
}

impl ReversibilityManager {
    pub fn new(reader: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            tracked: BTreeSet::new(),
        }
    }

    /// Replace the tracked set with what is stored for this reader.
    pub async fn load(&mut self, tx: &mut dyn DatabaseTransaction) -> Result<usize, FillerError> {
        let rows = tx
            .select(
                REVERSIBLE_BLOCKS_TABLE,
                &Query::new(Filter::new().eq("reader", self.reader.as_str())),
            )
            .await?;
        self.tracked = rows
            .iter()
            .filter_map(|(_, row)| row.get("block_num").and_then(|v| v.as_u64()))
            .collect();
        debug!(reader = %self.reader, tracked = self.tracked.len(), "loaded reversible blocks");
        Ok(self.tracked.len())
    }

    /// Record that `block_num` committed as reversible.
    pub fn track(&mut self, block_num: u64) {
        self.tracked.insert(block_num);
    }

    pub fn forget(&mut self, blocks: &[u64]) {
        for block in blocks {
            self.tracked.remove(block);
        }
    }

    pub fn is_tracked(&self, block_num: u64) -> bool {
        self.tracked.contains(&block_num)
    }

    /// Tracked block numbers, ascending.
    pub fn tracked(&self) -> Vec<u64> {
        self.tracked.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Undo every tracked block `>= from`, newest first, and delete its
    /// bookkeeping. Returns the undone block numbers (descending).
    pub async fn undo_from(
        &self,
        tx: &mut dyn DatabaseTransaction,
        from: u64,
    ) -> Result<Vec<u64>, FillerError> {
        let blocks: Vec<u64> = self.tracked.range(from..).rev().copied().collect();
        for &block_num in &blocks {
            let ops = self.load_log(tx, block_num).await?;
            for (key, op) in ops.iter().rev() {
                op.apply(tx).await?;
                tx.remove(REVERSIBLE_QUERIES_TABLE, key).await?;
            }
            tx.remove(REVERSIBLE_BLOCKS_TABLE, &self.block_key(block_num))
                .await?;
            debug!(reader = %self.reader, block = block_num, ops = ops.len(), "undid reversible block");
        }
        if !blocks.is_empty() {
            info!(reader = %self.reader, from, blocks = blocks.len(), "rolled back reversible blocks");
        }
        Ok(blocks)
    }

    /// Drop bookkeeping of tracked blocks `<= irreversible`. Returns the
    /// pruned block numbers.
    pub async fn prune(
        &self,
        tx: &mut dyn DatabaseTransaction,
        irreversible: u64,
    ) -> Result<Vec<u64>, FillerError> {
        let blocks: Vec<u64> = self.tracked.range(..=irreversible).copied().collect();
        for &block_num in &blocks {
            for (key, _) in self.load_log(tx, block_num).await? {
                tx.remove(REVERSIBLE_QUERIES_TABLE, &key).await?;
            }
            tx.remove(REVERSIBLE_BLOCKS_TABLE, &self.block_key(block_num))
                .await?;
        }
        if !blocks.is_empty() {
            debug!(reader = %self.reader, irreversible, pruned = blocks.len(), "pruned reversible blocks");
        }
        Ok(blocks)
    }

    fn block_key(&self, block_num: u64) -> NaturalKey {
        NaturalKey(vec![json!(self.reader), json!(block_num)])
    }

    /// The stored undo log of one block, in recording order.
    async fn load_log(
        &self,
        tx: &mut dyn DatabaseTransaction,
        block_num: u64,
    ) -> Result<Vec<(NaturalKey, UndoOp)>, FillerError> {
        let query = Query::new(
            Filter::new()
                .eq("reader", self.reader.as_str())
                .eq("block_num", block_num),
        )
        .order_by("seq", Order::Asc);
        let mut ops = Vec::new();
        for (key, row) in tx.select(REVERSIBLE_QUERIES_TABLE, &query).await? {
            let op = row.get("op").cloned().ok_or_else(|| {
                FillerError::Storage(format!("undo entry {} has no op", key.encode()))
            })?;
            ops.push((key, serde_json::from_value(op)?));
        }
        Ok(ops)
    }
}
