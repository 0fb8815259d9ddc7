//! In-memory storage backend.
//!
//! Keeps every table in RAM. Transactions work on a private copy of the state
//! and hold the database lock until they commit or roll back, so they are
//! fully serialized. Useful for tests and short-lived fills that don't need
//! persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{Database, DatabaseTransaction};
use crate::error::FillerError;
use crate::row::{Filter, NaturalKey, ObjectKind, Query, Row, SchemaObject, TableDef};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: BTreeMap<String, (NaturalKey, Row)>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    objects: BTreeMap<(ObjectKind, String), String>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable, FillerError> {
        self.tables
            .get(name)
            .ok_or_else(|| FillerError::Storage(format!("unknown table '{name}'")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, FillerError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| FillerError::Storage(format!("unknown table '{name}'")))
    }
}

/// In-memory database. All data is lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of every table (in key order), for inspection in tests.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<Row>> {
        let state = self.state.lock().await;
        state
            .tables
            .iter()
            .map(|(name, table)| {
                let rows = table.rows.values().map(|(_, row)| row.clone()).collect();
                (name.clone(), rows)
            })
            .collect()
    }

    /// Committed rows of one table (empty if the table does not exist).
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.rows.values().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    /// Names of the derived schema objects currently defined.
    pub async fn objects(&self, kind: ObjectKind) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, FillerError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Transaction over a [`MemoryDatabase`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn table_exists(&mut self, table: &str) -> Result<bool, FillerError> {
        Ok(self.working.tables.contains_key(table))
    }

    async fn create_table(&mut self, def: &TableDef) -> Result<bool, FillerError> {
        if self.working.tables.contains_key(&def.name) {
            return Ok(false);
        }
        self.working.tables.insert(
            def.name.clone(),
            MemoryTable::default(),
        );
        Ok(true)
    }

    async fn object_exists(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError> {
        Ok(self.working.objects.contains_key(&(kind, name.to_string())))
    }

    async fn create_object(&mut self, object: &SchemaObject) -> Result<(), FillerError> {
        self.working
            .objects
            .insert((object.kind, object.name.clone()), object.script.clone());
        Ok(())
    }

    async fn drop_object(&mut self, kind: ObjectKind, name: &str) -> Result<bool, FillerError> {
        Ok(self
            .working
            .objects
            .remove(&(kind, name.to_string()))
            .is_some())
    }

    async fn get(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError> {
        Ok(self
            .working
            .table(table)?
            .rows
            .get(&key.encode())
            .map(|(_, row)| row.clone()))
    }

    async fn put(
        &mut self,
        table: &str,
        key: &NaturalKey,
        row: Row,
    ) -> Result<Option<Row>, FillerError> {
        Ok(self
            .working
            .table_mut(table)?
            .rows
            .insert(key.encode(), (key.clone(), row))
            .map(|(_, previous)| previous))
    }

    async fn insert_new(
        &mut self,
        table: &str,
        rows: Vec<(NaturalKey, Row)>,
    ) -> Result<(), FillerError> {
        let target = self.working.table_mut(table)?;
        for (key, _) in &rows {
            if target.rows.contains_key(&key.encode()) {
                return Err(FillerError::KeyConflict {
                    table: table.to_string(),
                    key: key.encode(),
                });
            }
        }
        for (key, row) in rows {
            target.rows.insert(key.encode(), (key, row));
        }
        Ok(())
    }

    async fn remove(&mut self, table: &str, key: &NaturalKey) -> Result<Option<Row>, FillerError> {
        Ok(self
            .working
            .table_mut(table)?
            .rows
            .remove(&key.encode())
            .map(|(_, row)| row))
    }

    async fn select(
        &mut self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<(NaturalKey, Row)>, FillerError> {
        let mut rows: Vec<(NaturalKey, Row)> = self
            .working
            .table(table)?
            .rows
            .values()
            .filter(|(_, row)| query.filter.matches(row))
            .cloned()
            .collect();
        if !query.order_by.is_empty() {
            rows.sort_by(|(_, a), (_, b)| query.compare(a, b));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<u64, FillerError> {
        Ok(self
            .working
            .table(table)?
            .rows
            .values()
            .filter(|(_, row)| filter.matches(row))
            .count() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), FillerError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), FillerError> {
        Ok(())
    }
}
