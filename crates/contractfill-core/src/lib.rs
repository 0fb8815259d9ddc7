//! contractfill-core: fork-safe, tiered contract-state filler.
//!
//! # Architecture
//!
//! ```text
//! BlockSource → Filler
//!                 ├── DataProcessor         (tiered delta/trace dispatch, tier hooks)
//!                 ├── ContractDBTransaction (one per block, undo log when reversible)
//!                 ├── ReversibilityManager  (fork rollback, irreversibility pruning)
//!                 ├── ContractHandler[]     (per-contract lifecycle)
//!                 ├── JobQueue              (periodic maintenance)
//!                 ├── NotificationSink      (post-commit fan-out)
//!                 └── Database backend      (memory / SQLite)
//! ```

pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod destructor;
pub mod error;
pub mod filler;
pub mod handler;
pub mod jobs;
pub mod memory;
pub mod notifier;
pub mod processor;
pub mod reversible;
pub mod row;
pub mod source;
pub mod transaction;
pub mod types;

pub use buffer::{BlockBuffers, BufferHandle, RowBuffer};
pub use checkpoint::ReaderCheckpoint;
pub use config::{init_tracing, ContractConfig, FillerBuilder, FillerConfig, LogConfig};
pub use db::{Database, DatabaseTransaction};
pub use destructor::Destructor;
pub use error::FillerError;
pub use filler::{Filler, ReaderProgress, ReaderState, RunSummary};
pub use handler::{
    ContractHandler, ContractSchema, HandlerFactory, InitContext, RegisterContext,
};
pub use jobs::{job_fn, JobPriority, JobQueue, JobTask};
pub use memory::MemoryDatabase;
pub use notifier::{BroadcastRelay, Notification, NotificationSink, NullSink, Outbox, TraceNotification};
pub use processor::{BlockScope, Callback, DataProcessor, DeltaHandler, TierCompleteHook, TraceHandler};
pub use reversible::ReversibilityManager;
pub use row::{Filter, NaturalKey, ObjectKind, Order, Query, Row, SchemaObject, TableDef};
pub use source::{
    BlockMessage, BlockSource, ChainInfo, ChainState, StaticChainState, StreamMessage, StreamSource,
    VecSource,
};
pub use transaction::{ContractDBTransaction, UndoOp};
pub use types::{ActionTrace, Block, BlockRef, ContractRow, EventKind, Tier};
