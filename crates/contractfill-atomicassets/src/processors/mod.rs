//! Delta and trace processors, one module per concern. Each `register`
//! returns the [`Destructor`](contractfill_core::Destructor) that unwires it.

pub mod assets;
pub mod balances;
pub mod collections;
pub mod config;
pub mod logs;
pub mod offers;
pub mod schemas;
pub mod templates;

use serde_json::{Map, Value};

use contractfill_core::{Block, Row};

/// Set `<prefix>_block` and `<prefix>_time` from `block`.
pub(crate) fn stamp(row: &mut Row, prefix: &str, block: &Block) {
    row.insert(format!("{prefix}_block"), Value::from(block.block_num));
    row.insert(format!("{prefix}_time"), Value::from(block.timestamp));
}

pub(crate) fn patch() -> Row {
    Map::new()
}
