//! Chain-state fixture files.
//!
//! ```json
//! {
//!   "info": { "head_block_num": 1200, "last_irreversible_block_num": 1000 },
//!   "tables": [
//!     { "code": "atomicassets", "scope": "atomicassets", "table": "tokenconfigs",
//!       "rows": [{ "standard": "atomicassets", "version": "1.3.1" }] }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use contractfill_core::{ChainInfo, StaticChainState};

#[derive(Debug, Deserialize)]
struct ChainFixture {
    #[serde(default)]
    info: ChainInfo,
    #[serde(default)]
    tables: Vec<TableFixture>,
}

#[derive(Debug, Deserialize)]
struct TableFixture {
    code: String,
    scope: String,
    table: String,
    #[serde(default)]
    rows: Vec<Value>,
}

pub fn load(path: &Path) -> Result<StaticChainState> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read chain state '{}'", path.display()))?;
    parse(&text).with_context(|| format!("parse chain state '{}'", path.display()))
}

pub fn empty() -> StaticChainState {
    StaticChainState::new(ChainInfo::default())
}

fn parse(text: &str) -> Result<StaticChainState> {
    let fixture: ChainFixture = serde_json::from_str(text)?;
    Ok(fixture
        .tables
        .into_iter()
        .fold(StaticChainState::new(fixture.info), |state, t| {
            state.with_table(&t.code, &t.scope, &t.table, t.rows)
        }))
}
