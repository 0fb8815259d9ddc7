//! Reader checkpoint, persisted in `contract_readers` for crash recovery.
//!
//! The checkpoint is written inside every block transaction, so after a
//! restart it always names the last block whose writes were committed.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::DatabaseTransaction;
use crate::error::FillerError;
use crate::row::{row_from, NaturalKey, TableDef};

pub const READERS_TABLE: &str = "contract_readers";

pub fn readers_table() -> TableDef {
    TableDef::new(READERS_TABLE, &["name"])
}

/// Position of one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderCheckpoint {
    /// Reader name.
    pub name: String,
    /// Last committed block.
    pub block_num: u64,
    /// Timestamp of that block (unix ms).
    pub block_time: i64,
    /// Whether the reader had caught up with the chain head.
    pub live: bool,
    /// Unix timestamp (ms) of when this checkpoint was saved.
    pub updated_at: i64,
}

impl ReaderCheckpoint {
    pub fn new(name: impl Into<String>, block_num: u64, block_time: i64, live: bool) -> Self {
        Self {
            name: name.into(),
            block_num,
            block_time,
            live,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn key(name: &str) -> NaturalKey {
        NaturalKey(vec![json!(name)])
    }

    pub async fn load(
        tx: &mut dyn DatabaseTransaction,
        name: &str,
    ) -> Result<Option<Self>, FillerError> {
        match tx.get(READERS_TABLE, &Self::key(name)).await? {
            Some(row) => Ok(Some(serde_json::from_value(row.into())?)),
            None => Ok(None),
        }
    }

    /// Upsert this checkpoint.
    pub async fn save(&self, tx: &mut dyn DatabaseTransaction) -> Result<(), FillerError> {
        let row = row_from(serde_json::to_value(self)?)?;
        tx.put(READERS_TABLE, &Self::key(&self.name), row).await?;
        Ok(())
    }

    /// Remove the checkpoint (used when resetting a reader).
    pub async fn delete(tx: &mut dyn DatabaseTransaction, name: &str) -> Result<bool, FillerError> {
        Ok(tx.remove(READERS_TABLE, &Self::key(name)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::memory::MemoryDatabase;

    #[tokio::test]
    async fn save_load_delete() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        tx.create_table(&readers_table()).await.unwrap();

        assert!(ReaderCheckpoint::load(tx.as_mut(), "r").await.unwrap().is_none());

        let cp = ReaderCheckpoint::new("r", 100, 5_000, false);
        cp.save(tx.as_mut()).await.unwrap();
        ReaderCheckpoint::new("r", 101, 5_500, true)
            .save(tx.as_mut())
            .await
            .unwrap();

        let loaded = ReaderCheckpoint::load(tx.as_mut(), "r").await.unwrap().unwrap();
        assert_eq!(loaded.block_num, 101);
        assert!(loaded.live);

        assert!(ReaderCheckpoint::delete(tx.as_mut(), "r").await.unwrap());
        assert!(!ReaderCheckpoint::delete(tx.as_mut(), "r").await.unwrap());
    }
}
