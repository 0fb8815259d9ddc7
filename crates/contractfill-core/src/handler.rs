//! Contract modules and their lifecycle.
//!
//! A contract module implements [`ContractHandler`]. The filler drives it
//! through a fixed sequence: `setup` → (`begin_upgrade` → `finish_upgrade`) →
//! optional `delete_db` → `init` → `register`. Everything except `init` and
//! `register` has a default implementation driven by the module's declared
//! [`ContractSchema`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ContractConfig;
use crate::db::{delete_matching, Database, DatabaseTransaction};
use crate::destructor::Destructor;
use crate::error::FillerError;
use crate::filler::ReaderProgress;
use crate::jobs::JobQueue;
use crate::processor::DataProcessor;
use crate::row::{Filter, ObjectKind, SchemaObject, TableDef};
use crate::source::ChainState;
use crate::types::Block;

/// Storage objects owned by a contract module.
#[derive(Debug, Clone)]
pub struct ContractSchema {
    /// Its presence means the tables were already created.
    pub sentinel_table: String,
    pub tables: Vec<TableDef>,
    /// Derived views, in dependency order.
    pub views: Vec<SchemaObject>,
    pub procedures: Vec<SchemaObject>,
    /// Column holding the contract account in every owned table.
    pub owner_column: String,
}

/// What `init` may read.
pub struct InitContext<'a> {
    pub db: &'a dyn Database,
    pub chain: &'a dyn ChainState,
    pub reader: &'a str,
    /// Highest block whose writes can no longer be rolled back.
    pub last_irreversible: u64,
    /// Incomplete-row count above which `init` keeps backfilling.
    pub reconcile_threshold: u64,
}

/// What `register` wires into.
pub struct RegisterContext<'a> {
    pub processor: &'a DataProcessor,
    pub jobs: &'a JobQueue,
    pub db: Arc<dyn Database>,
    pub progress: ReaderProgress,
    pub reader: &'a str,
}

#[async_trait]
pub trait ContractHandler: Send + Sync {
    /// Handler kind, as used in configuration (e.g. `"atomicassets"`).
    fn name(&self) -> &str;

    /// Contract account this instance indexes.
    fn account(&self) -> &str;

    fn schema(&self) -> ContractSchema;

    /// Create the module's tables unless the sentinel table exists.
    /// Returns `true` if they were created.
    async fn setup(&self, tx: &mut dyn DatabaseTransaction) -> Result<bool, FillerError> {
        let schema = self.schema();
        if tx.table_exists(&schema.sentinel_table).await? {
            return Ok(false);
        }
        info!(handler = self.name(), "tables not found, creating them");
        for table in &schema.tables {
            tx.create_table(table).await?;
        }
        info!(handler = self.name(), tables = schema.tables.len(), "tables created");
        Ok(true)
    }

    /// Drop derived views and procedures, newest first.
    async fn begin_upgrade(&self, tx: &mut dyn DatabaseTransaction) -> Result<(), FillerError> {
        let schema = self.schema();
        for view in schema.views.iter().rev() {
            tx.drop_object(ObjectKind::View, &view.name).await?;
        }
        for procedure in schema.procedures.iter().rev() {
            tx.drop_object(ObjectKind::Procedure, &procedure.name).await?;
        }
        Ok(())
    }

    /// Recreate derived views and procedures in declared order.
    async fn finish_upgrade(&self, tx: &mut dyn DatabaseTransaction) -> Result<(), FillerError> {
        let schema = self.schema();
        for object in schema.views.iter().chain(&schema.procedures) {
            debug!(handler = self.name(), kind = %object.kind, name = %object.name, "creating schema object");
            tx.create_object(object).await?;
        }
        Ok(())
    }

    /// Load or bootstrap persistent config and reconcile derived fields.
    async fn init(&self, _ctx: &InitContext<'_>) -> Result<(), FillerError> {
        Ok(())
    }

    /// Delete every row owned by this contract account.
    async fn delete_db(&self, tx: &mut dyn DatabaseTransaction) -> Result<(), FillerError> {
        let schema = self.schema();
        let filter = Filter::new().eq(schema.owner_column.as_str(), self.account());
        for table in &schema.tables {
            let removed = delete_matching(tx, &table.name, &filter).await?;
            debug!(handler = self.name(), table = %table.name, removed, "deleted contract rows");
        }
        Ok(())
    }

    /// Wire handlers and periodic jobs. The returned destructor undoes all of it.
    fn register(self: Arc<Self>, ctx: &RegisterContext<'_>) -> Result<Destructor, FillerError>;

    /// Called after a block's transaction committed.
    fn committed(&self, _block: &Block) {}

    /// Re-read in-memory state from committed storage (after an aborted block
    /// or a fork rollback).
    async fn reload(&self, _db: &dyn Database) -> Result<(), FillerError> {
        Ok(())
    }
}

// ─── HandlerFactory ───────────────────────────────────────────────────────────

/// Builds a handler from its `args` object.
pub type HandlerConstructor = fn(&Value) -> Result<Arc<dyn ContractHandler>, FillerError>;

/// Lookup table from handler name to constructor.
#[derive(Default)]
pub struct HandlerFactory {
    constructors: HashMap<String, HandlerConstructor>,
}

impl HandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, constructor: HandlerConstructor) -> Self {
        self.register(name, constructor);
        self
    }

    pub fn register(&mut self, name: &str, constructor: HandlerConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build(&self, config: &ContractConfig) -> Result<Arc<dyn ContractHandler>, FillerError> {
        let constructor = self.constructors.get(&config.handler).ok_or_else(|| {
            FillerError::Configuration(format!("unknown contract handler '{}'", config.handler))
        })?;
        constructor(&config.args)
    }
}
