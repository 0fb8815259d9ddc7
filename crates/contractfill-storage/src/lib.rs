//! contractfill-storage: pluggable storage backends for ContractFill.
//!
//! Backends:
//! - [`MemoryDatabase`]: in-memory (dev/testing, no persistence), from core
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "memory")]
pub use contractfill_core::memory::MemoryDatabase;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

use std::sync::Arc;

use contractfill_core::{Database, FillerError};

/// Open a backend from a location string: `"memory"` or a SQLite path/URL.
pub async fn open(location: &str) -> Result<Arc<dyn Database>, FillerError> {
    match location {
        #[cfg(feature = "memory")]
        "memory" | ":memory:" => Ok(Arc::new(MemoryDatabase::new())),
        #[cfg(feature = "sqlite")]
        other => Ok(Arc::new(SqliteDatabase::open(other).await?)),
        #[cfg(not(feature = "sqlite"))]
        other => Err(FillerError::Configuration(format!(
            "unsupported database '{other}' (built without the sqlite feature)"
        ))),
    }
}
