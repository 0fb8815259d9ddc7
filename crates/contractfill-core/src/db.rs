//! Storage abstraction used by the pipeline.
//!
//! A backend exposes transactions over keyed JSON rows plus a small catalog of
//! tables and derived schema objects. Everything above this trait
//! ([`ContractDBTransaction`](crate::transaction::ContractDBTransaction), the
//! reversibility manager, contract modules) is backend-agnostic.
//!
//! Implementations include [`MemoryDatabase`](crate::memory::MemoryDatabase)
//! and the SQLite backend in `contractfill-storage`.

use async_trait::async_trait;

use crate::error::FillerError;
use crate::row::{Filter, NaturalKey, ObjectKind, Query, Row, SchemaObject, TableDef};

/// A storage backend.
#[async_trait]
pub trait Database: Send + Sync {
    /// Open a new transaction. Nothing written through it is visible to other
    /// transactions before [`DatabaseTransaction::commit`].
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, FillerError>;

    /// Short backend name for logs (e.g. `"memory"`, `"sqlite"`).
    fn backend(&self) -> &'static str;
}

/// One all-or-nothing unit of work.
///
/// Rows are addressed by the canonical encoding of their natural key. Reads
/// observe the transaction's own writes. Operations on an unknown table fail
/// with [`FillerError::Storage`].
#[async_trait]
pub trait DatabaseTransaction: Send {
    // ─── Catalog ─────────────────────────────────────────────────────────────

    async fn table_exists(&mut self, table: &str) -> Result<bool, FillerError>;

    /// Create a table if absent. Returns `true` if it was created.
    async fn create_table(&mut self, def: &TableDef) -> Result<bool, FillerError>;

    async fn object_exists(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError>;

    /// Create (or redefine) a view or procedure.
    async fn create_object(&mut self, object: &SchemaObject) -> Result<(), FillerError>;

    /// Drop a view or procedure. Returns `false` if it did not exist.
    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError>;

    // ─── Rows ────────────────────────────────────────────────────────────────

    async fn get(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError>;

    /// Insert or overwrite the row at `key`. Returns the previous row.
    async fn put(
        &mut self,
        table: &str,
        key: &NaturalKey,
        row: Row,
    ) -> Result<Option<Row>, FillerError>;

    /// Insert rows whose keys must not exist yet; fails with
    /// [`FillerError::KeyConflict`] otherwise.
    async fn insert_new(
        &mut self,
        table: &str,
        rows: Vec<(NaturalKey, Row)>,
    ) -> Result<(), FillerError>;

    /// Remove the row at `key`. Returns it if it existed.
    async fn remove(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError>;

    /// Rows matching `query`, with their stored keys.
    async fn select(
        &mut self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<(NaturalKey, Row)>, FillerError>;

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64, FillerError>;

    // ─── Completion ──────────────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), FillerError>;

    async fn rollback(self: Box<Self>) -> Result<(), FillerError>;
}

/// Remove every row of `table` matching `filter`. Returns the number removed.
pub async fn delete_matching(
    tx: &mut dyn DatabaseTransaction,
    table: &str,
    filter: &Filter,
) -> Result<u64, FillerError> {
    let matched = tx.select(table, &Query::new(filter.clone())).await?;
    for (key, _) in &matched {
        tx.remove(table, key).await?;
    }
    Ok(matched.len() as u64)
}
