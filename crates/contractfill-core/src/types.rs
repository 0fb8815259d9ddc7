//! Shared types for the block-processing pipeline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FillerError;

// ─── Block ────────────────────────────────────────────────────────────────────

/// The block whose events are being applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub block_num: u64,
    /// Block timestamp (unix milliseconds).
    pub timestamp: i64,
    /// `true` while the block may still be retracted by a fork.
    pub reversible: bool,
}

impl Block {
    pub fn new(block_num: u64, timestamp: i64, reversible: bool) -> Self {
        Self {
            block_num,
            timestamp,
            reversible,
        }
    }

    /// The `{block_num, timestamp}` pair carried by outbound notifications.
    pub fn reference(&self) -> BlockRef {
        BlockRef {
            block_num: self.block_num,
            timestamp: self.timestamp,
        }
    }
}

/// Minimal block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub block_num: u64,
    pub timestamp: i64,
}

// ─── ContractRow (delta) ──────────────────────────────────────────────────────

/// An observed contract table-row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRow {
    /// Contract account owning the table.
    pub contract: String,
    pub scope: String,
    pub table: String,
    pub primary_key: String,
    /// `false` when the row was removed.
    pub present: bool,
    /// Decoded row value.
    pub value: serde_json::Value,
}

impl ContractRow {
    /// Deserialize the row value into a typed table row.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, FillerError> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

// ─── ActionTrace ──────────────────────────────────────────────────────────────

/// A record of a contract action's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrace {
    /// Contract account the action was executed on.
    pub contract: String,
    pub action_name: String,
    /// Chain-wide unique, monotonically increasing action sequence.
    pub global_sequence: u64,
    pub block_num: u64,
    /// Transaction id (hex).
    pub tx_id: String,
    /// Decoded action arguments.
    pub data: serde_json::Value,
}

impl ActionTrace {
    /// Deserialize the action arguments into a typed struct.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, FillerError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ─── Dispatch keys ────────────────────────────────────────────────────────────

/// Kind of block event a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Contract table-row changes, keyed by table name.
    Delta,
    /// Action traces, keyed by action name.
    Trace,
}

/// A dispatch priority bucket.
///
/// Tiers order lexicographically by `(band, rank)`. A contract module owns one
/// band and declares its ranks as a single ordered enumeration, so dependency
/// order between its handlers is readable from that declaration. Modules that
/// depend on another module's rows use a higher band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tier {
    pub band: u32,
    pub rank: u32,
}

impl Tier {
    pub const fn new(band: u32, rank: u32) -> Self {
        Self { band, rank }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.band, self.rank)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
