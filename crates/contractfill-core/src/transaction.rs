//! Block-scoped unit of work.
//!
//! [`ContractDBTransaction`] wraps one backend transaction for the duration of
//! a block. Every write goes through it so later tiers see earlier tiers'
//! writes, and nothing becomes visible until the block commits. For reversible
//! blocks each write records its inverse as an [`UndoOp`]; the log is stored in
//! `reversible_blocks` / `reversible_queries` inside the same commit.
//!
//! An overwrite records only the columns it changed, so columns maintained
//! outside the block pipeline (e.g. by periodic jobs) survive a rollback.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::db::DatabaseTransaction;
use crate::error::FillerError;
use crate::row::{row_from, Filter, NaturalKey, Query, Row, TableDef};
use crate::types::Block;

/// Default number of rows written per `insert_new` call.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 50;

pub const REVERSIBLE_BLOCKS_TABLE: &str = "reversible_blocks";
pub const REVERSIBLE_QUERIES_TABLE: &str = "reversible_queries";

/// Bookkeeping tables for reversible blocks.
pub fn reversible_tables() -> Vec<TableDef> {
    vec![
        TableDef::new(REVERSIBLE_BLOCKS_TABLE, &["reader", "block_num"]),
        TableDef::new(REVERSIBLE_QUERIES_TABLE, &["reader", "block_num", "seq"]),
    ]
}

// ─── UndoOp ───────────────────────────────────────────────────────────────────

/// Inverse of a single row write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UndoOp {
    /// The row did not exist before the write.
    Delete { table: String, key: NaturalKey },
    /// The row existed with this content before it was deleted.
    Restore {
        table: String,
        key: NaturalKey,
        row: Row,
    },
    /// The row was overwritten: `set` holds the previous values of the
    /// changed columns, `unset` the columns the write added.
    Revert {
        table: String,
        key: NaturalKey,
        set: Row,
        #[serde(default)]
        unset: Vec<String>,
    },
}

impl UndoOp {
    /// Inverse of overwriting `previous` with `next`. `None` when nothing
    /// changed.
    fn revert(table: &str, key: &NaturalKey, previous: &Row, next: &Row) -> Option<Self> {
        let set: Row = previous
            .iter()
            .filter(|(column, value)| next.get(*column) != Some(*value))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let unset: Vec<String> = next
            .keys()
            .filter(|column| !previous.contains_key(*column))
            .cloned()
            .collect();
        if set.is_empty() && unset.is_empty() {
            return None;
        }
        Some(Self::Revert {
            table: table.to_string(),
            key: key.clone(),
            set,
            unset,
        })
    }

    /// Apply the inverse write.
    pub async fn apply(&self, tx: &mut dyn DatabaseTransaction) -> Result<(), FillerError> {
        match self {
            Self::Delete { table, key } => {
                tx.remove(table, key).await?;
            }
            Self::Restore { table, key, row } => {
                tx.put(table, key, row.clone()).await?;
            }
            Self::Revert {
                table,
                key,
                set,
                unset,
            } => {
                let mut row = tx.get(table, key).await?.ok_or_else(|| {
                    FillerError::Storage(format!(
                        "undo of '{table}' found no row for key {}",
                        key.encode()
                    ))
                })?;
                for column in unset {
                    row.remove(column);
                }
                for (column, value) in set {
                    row.insert(column.clone(), value.clone());
                }
                tx.put(table, key, row).await?;
            }
        }
        Ok(())
    }
}

// ─── ContractDBTransaction ────────────────────────────────────────────────────

/// The write context handed to every handler of one block.
pub struct ContractDBTransaction {
    inner: Box<dyn DatabaseTransaction>,
    reader: String,
    block: Block,
    insert_chunk_size: usize,
    undo: Vec<UndoOp>,
}

impl ContractDBTransaction {
    pub fn new(inner: Box<dyn DatabaseTransaction>, reader: impl Into<String>, block: Block) -> Self {
        Self {
            inner,
            reader: reader.into(),
            block,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            undo: Vec::new(),
        }
    }

    pub fn with_insert_chunk_size(mut self, size: usize) -> Self {
        self.insert_chunk_size = size.max(1);
        self
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Inverse operations recorded so far (empty for irreversible blocks).
    pub fn undo_log(&self) -> &[UndoOp] {
        &self.undo
    }

    /// Untracked access to the backend transaction, for bookkeeping writes
    /// that must not appear in the undo log.
    pub fn raw(&mut self) -> &mut dyn DatabaseTransaction {
        self.inner.as_mut()
    }

    fn record(&mut self, op: impl FnOnce() -> Option<UndoOp>) {
        if self.block.reversible {
            self.undo.extend(op());
        }
    }

    fn record_write(&mut self, table: &str, key: &NaturalKey, previous: Option<&Row>, next: &Row) {
        self.record(|| match previous {
            Some(previous) => UndoOp::revert(table, key, previous, next),
            None => Some(UndoOp::Delete {
                table: table.to_string(),
                key: key.clone(),
            }),
        });
    }

    // ─── Writes ──────────────────────────────────────────────────────────────

    /// Insert new rows.
    ///
    /// Rows sharing a natural key within `rows` collapse into one: it keeps the
    /// position of the first occurrence and the values of the last. A key that
    /// already exists in storage fails with [`FillerError::KeyConflict`].
    /// Returns the number of rows written.
    pub async fn insert(
        &mut self,
        table: &str,
        rows: Vec<Row>,
        natural_key: &[&str],
    ) -> Result<usize, FillerError> {
        let mut merged: Vec<(NaturalKey, Row)> = Vec::with_capacity(rows.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let key = NaturalKey::from_row(table, &row, natural_key)?;
            match positions.get(&key.encode()) {
                Some(&pos) => merged[pos].1 = row,
                None => {
                    positions.insert(key.encode(), merged.len());
                    merged.push((key, row));
                }
            }
        }

        let written = merged.len();
        let mut remaining = merged.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<(NaturalKey, Row)> =
                remaining.by_ref().take(self.insert_chunk_size).collect();
            let keys: Vec<NaturalKey> = chunk.iter().map(|(k, _)| k.clone()).collect();
            self.inner.insert_new(table, chunk).await?;
            for key in &keys {
                self.record(|| {
                    Some(UndoOp::Delete {
                        table: table.to_string(),
                        key: key.clone(),
                    })
                });
            }
        }
        Ok(written)
    }

    /// Upsert one row. When a row with the same key exists, every column
    /// except the key and `preserve_columns` is overwritten.
    pub async fn replace(
        &mut self,
        table: &str,
        row: Row,
        natural_key: &[&str],
        preserve_columns: &[&str],
    ) -> Result<(), FillerError> {
        let key = NaturalKey::from_row(table, &row, natural_key)?;
        let previous = self.inner.get(table, &key).await?;
        let mut next = row;
        if let Some(existing) = &previous {
            for column in preserve_columns {
                match existing.get(*column) {
                    Some(value) => {
                        next.insert(column.to_string(), value.clone());
                    }
                    None => {
                        next.remove(*column);
                    }
                }
            }
        }
        self.record_write(table, &key, previous.as_ref(), &next);
        self.inner.put(table, &key, next).await?;
        Ok(())
    }

    /// Apply `patch` to every row matching `filter`. Zero matches is not an
    /// error. The patch may not change natural-key columns.
    pub async fn update(
        &mut self,
        table: &str,
        patch: Row,
        filter: &Filter,
        natural_key: &[&str],
    ) -> Result<u64, FillerError> {
        if let Some(column) = natural_key.iter().find(|c| patch.contains_key(**c)) {
            return Err(FillerError::Other(format!(
                "update of '{table}' may not change key column '{column}'"
            )));
        }
        let matched = self.inner.select(table, &Query::new(filter.clone())).await?;
        let affected = matched.len() as u64;
        for (key, row) in matched {
            let mut next = row.clone();
            for (column, value) in &patch {
                next.insert(column.clone(), value.clone());
            }
            self.record_write(table, &key, Some(&row), &next);
            self.inner.put(table, &key, next).await?;
        }
        Ok(affected)
    }

    /// Delete every row matching `filter`. Returns the number removed.
    pub async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, FillerError> {
        let matched = self.inner.select(table, &Query::new(filter.clone())).await?;
        let affected = matched.len() as u64;
        for (key, row) in matched {
            self.inner.remove(table, &key).await?;
            self.record(|| {
                Some(UndoOp::Restore {
                    table: table.to_string(),
                    key: key.clone(),
                    row,
                })
            });
        }
        Ok(affected)
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn query(&mut self, table: &str, query: &Query) -> Result<Vec<Row>, FillerError> {
        Ok(self
            .inner
            .select(table, query)
            .await?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// First row matching `filter`, if any.
    pub async fn find_one(&mut self, table: &str, filter: Filter) -> Result<Option<Row>, FillerError> {
        Ok(self.query(table, &Query::new(filter).limit(1)).await?.pop())
    }

    pub async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64, FillerError> {
        self.inner.count(table, filter).await
    }

    // ─── Completion ──────────────────────────────────────────────────────────

    /// Commit the block. For a reversible block the undo log is stored first,
    /// in the same backend transaction.
    pub async fn commit(mut self) -> Result<(), FillerError> {
        if self.block.reversible {
            self.persist_undo_log().await?;
        }
        debug!(
            reader = %self.reader,
            block = self.block.block_num,
            undo_ops = self.undo.len(),
            "committing block transaction"
        );
        self.inner.commit().await
    }

    pub async fn rollback(self) -> Result<(), FillerError> {
        self.inner.rollback().await
    }

    async fn persist_undo_log(&mut self) -> Result<(), FillerError> {
        let reader = self.reader.clone();
        let block_num = self.block.block_num;
        let header = row_from(json!({
            "reader": reader,
            "block_num": block_num,
            "timestamp": self.block.timestamp,
            "op_count": self.undo.len(),
        }))?;
        let header_key = NaturalKey(vec![json!(reader), json!(block_num)]);
        self.inner
            .put(REVERSIBLE_BLOCKS_TABLE, &header_key, header)
            .await?;

        for (seq, op) in self.undo.iter().enumerate() {
            let row = row_from(json!({
                "reader": reader,
                "block_num": block_num,
                "seq": seq,
                "op": serde_json::to_value(op)?,
            }))?;
            let key = NaturalKey(vec![json!(reader), json!(block_num), json!(seq)]);
            self.inner.put(REVERSIBLE_QUERIES_TABLE, &key, row).await?;
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::MemoryDatabase;

    const KEY: &[&str] = &["contract", "id"];

    fn row(id: &str, name: &str) -> Row {
        row_from(json!({ "contract": "c", "id": id, "name": name, "created_at": 1 })).unwrap()
    }

    async fn setup(reversible: bool) -> (MemoryDatabase, ContractDBTransaction) {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        tx.create_table(&TableDef::new("items", KEY)).await.unwrap();
        for def in reversible_tables() {
            tx.create_table(&def).await.unwrap();
        }
        tx.commit().await.unwrap();
        let inner = db.begin().await.unwrap();
        let tx = ContractDBTransaction::new(inner, "reader", Block::new(100, 1_000, reversible));
        (db, tx)
    }

    #[tokio::test]
    async fn insert_merges_duplicate_keys_last_write_wins() {
        let (db, mut tx) = setup(false).await;
        let written = tx
            .insert("items", vec![row("1", "first"), row("2", "other"), row("1", "second")], KEY)
            .await
            .unwrap();
        assert_eq!(written, 2);
        tx.commit().await.unwrap();

        let rows = db.rows("items").await;
        assert_eq!(rows.len(), 2);
        let one = rows.iter().find(|r| r["id"] == "1").unwrap();
        assert_eq!(one["name"], "second");
    }

    #[tokio::test]
    async fn insert_conflict_is_an_error() {
        let (_db, mut tx) = setup(false).await;
        tx.insert("items", vec![row("1", "a")], KEY).await.unwrap();
        let err = tx.insert("items", vec![row("1", "b")], KEY).await.unwrap_err();
        assert!(matches!(err, FillerError::KeyConflict { .. }));
    }

    #[tokio::test]
    async fn insert_writes_in_chunks() {
        let (db, tx) = setup(false).await;
        let mut tx = tx.with_insert_chunk_size(2);
        let rows = (0..5).map(|i| row(&i.to_string(), "x")).collect();
        assert_eq!(tx.insert("items", rows, KEY).await.unwrap(), 5);
        tx.commit().await.unwrap();
        assert_eq!(db.rows("items").await.len(), 5);
    }

    #[tokio::test]
    async fn replace_preserves_columns() {
        let (db, mut tx) = setup(false).await;
        tx.replace("items", row("1", "a"), KEY, &["created_at"]).await.unwrap();

        let mut second = row("1", "b");
        second.insert("created_at".into(), json!(2));
        tx.replace("items", second.clone(), KEY, &["created_at"]).await.unwrap();
        tx.replace("items", second, KEY, &["created_at"]).await.unwrap();
        tx.commit().await.unwrap();

        let rows = db.rows("items").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "b");
        assert_eq!(rows[0]["created_at"], 1);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (_db, mut tx) = setup(false).await;
        tx.insert("items", vec![row("1", "a"), row("2", "b")], KEY).await.unwrap();

        let patch = row_from(json!({ "name": "z" })).unwrap();
        let n = tx
            .update("items", patch.clone(), &Filter::new().eq("id", "1"), KEY)
            .await
            .unwrap();
        assert_eq!(n, 1);
        let none = tx
            .update("items", patch, &Filter::new().eq("id", "9"), KEY)
            .await
            .unwrap();
        assert_eq!(none, 0);

        let bad = row_from(json!({ "id": "3" })).unwrap();
        assert!(tx.update("items", bad, &Filter::new(), KEY).await.is_err());

        assert_eq!(tx.delete("items", &Filter::new().eq("name", "z")).await.unwrap(), 1);
        assert_eq!(tx.count("items", &Filter::new()).await.unwrap(), 1);
        let remaining = tx.find_one("items", Filter::new()).await.unwrap().unwrap();
        assert_eq!(remaining["id"], "2");
    }

    #[tokio::test]
    async fn reversible_block_persists_undo_log() {
        let (db, mut tx) = setup(true).await;
        tx.insert("items", vec![row("1", "a")], KEY).await.unwrap();
        tx.replace("items", row("1", "b"), KEY, &[]).await.unwrap();
        tx.delete("items", &Filter::new()).await.unwrap();
        assert_eq!(tx.undo_log().len(), 3);
        assert!(matches!(tx.undo_log()[0], UndoOp::Delete { .. }));
        assert!(matches!(tx.undo_log()[2], UndoOp::Restore { .. }));
        tx.commit().await.unwrap();

        assert_eq!(db.rows(REVERSIBLE_BLOCKS_TABLE).await.len(), 1);
        let queries = db.rows(REVERSIBLE_QUERIES_TABLE).await;
        assert_eq!(queries.len(), 3);
        let op: UndoOp = serde_json::from_value(queries[0]["op"].clone()).unwrap();
        assert!(matches!(op, UndoOp::Delete { .. }));
    }

    #[tokio::test]
    async fn undo_reverts_only_changed_columns() {
        let (db, mut tx) = setup(false).await;
        tx.insert("items", vec![row("1", "a")], KEY).await.unwrap();
        tx.commit().await.unwrap();

        let inner = db.begin().await.unwrap();
        let mut tx = ContractDBTransaction::new(inner, "reader", Block::new(101, 2_000, true));
        let patch = row_from(json!({ "name": "b", "note": "new" })).unwrap();
        tx.update("items", patch, &Filter::new().eq("id", "1"), KEY)
            .await
            .unwrap();
        let undo = tx.undo_log().to_vec();
        assert!(matches!(undo[0], UndoOp::Revert { .. }));
        tx.commit().await.unwrap();

        // A column maintained outside of block processing.
        let key = NaturalKey(vec![json!("c"), json!("1")]);
        let mut raw = db.begin().await.unwrap();
        let mut current = raw.get("items", &key).await.unwrap().unwrap();
        current.insert("rank".into(), json!(7));
        raw.put("items", &key, current).await.unwrap();
        for op in undo.iter().rev() {
            op.apply(raw.as_mut()).await.unwrap();
        }
        raw.commit().await.unwrap();

        let rows = db.rows("items").await;
        assert_eq!(rows[0]["name"], "a");
        assert_eq!(rows[0]["rank"], 7);
        assert!(!rows[0].contains_key("note"));
    }

    #[tokio::test]
    async fn unchanged_overwrite_records_nothing() {
        let (_db, mut tx) = setup(true).await;
        tx.replace("items", row("1", "a"), KEY, &[]).await.unwrap();
        tx.replace("items", row("1", "a"), KEY, &[]).await.unwrap();
        assert_eq!(tx.undo_log().len(), 1);
    }

    #[tokio::test]
    async fn irreversible_block_records_nothing() {
        let (db, mut tx) = setup(false).await;
        tx.insert("items", vec![row("1", "a")], KEY).await.unwrap();
        assert!(tx.undo_log().is_empty());
        tx.commit().await.unwrap();
        assert!(db.rows(REVERSIBLE_BLOCKS_TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let (db, mut tx) = setup(true).await;
        tx.insert("items", vec![row("1", "a")], KEY).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.rows("items").await.is_empty());
        assert!(db.rows(REVERSIBLE_BLOCKS_TABLE).await.is_empty());
    }
}
