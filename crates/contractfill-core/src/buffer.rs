//! Per-block row buffers.
//!
//! A processor that batches writes (e.g. mints) obtains a [`BufferHandle`] at
//! registration time, appends rows through it from its handlers and flushes
//! them from its tier-complete hook. The buffers themselves live in the
//! block's [`BlockBuffers`] and are dropped with the block, so nothing leaks
//! into the next block or survives an aborted one.

use std::collections::HashMap;

use crate::row::Row;

/// Address of one processor's buffer inside [`BlockBuffers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Pending rows grouped by target table, in first-use order.
#[derive(Debug, Default)]
pub struct RowBuffer {
    tables: Vec<(String, Vec<Row>)>,
}

impl RowBuffer {
    pub fn push(&mut self, table: &str, row: Row) {
        match self.tables.iter_mut().find(|(name, _)| name == table) {
            Some((_, rows)) => rows.push(row),
            None => self.tables.push((table.to_string(), vec![row])),
        }
    }

    /// Remove and return the rows pending for `table`.
    pub fn take(&mut self, table: &str) -> Vec<Row> {
        match self.tables.iter().position(|(name, _)| name == table) {
            Some(pos) => self.tables.remove(pos).1,
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All row buffers of the block being processed.
#[derive(Debug, Default)]
pub struct BlockBuffers {
    buffers: HashMap<BufferHandle, RowBuffer>,
}

impl BlockBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, handle: BufferHandle) -> &mut RowBuffer {
        self.buffers.entry(handle).or_default()
    }

    /// Total pending rows across every buffer.
    pub fn pending(&self) -> usize {
        self.buffers.values().map(RowBuffer::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from;
    use serde_json::json;

    #[test]
    fn buffers_are_isolated_per_handle() {
        let mut buffers = BlockBuffers::new();
        let a = BufferHandle(1);
        let b = BufferHandle(2);
        buffers.get(a).push("assets", row_from(json!({ "id": 1 })).unwrap());
        buffers.get(a).push("mints", row_from(json!({ "id": 1 })).unwrap());
        buffers.get(a).push("assets", row_from(json!({ "id": 2 })).unwrap());
        buffers.get(b).push("assets", row_from(json!({ "id": 3 })).unwrap());
        assert_eq!(buffers.pending(), 4);

        assert_eq!(buffers.get(a).take("assets").len(), 2);
        assert!(buffers.get(a).take("assets").is_empty());
        assert_eq!(buffers.get(a).take("mints").len(), 1);
        assert!(buffers.get(a).is_empty());
        assert_eq!(buffers.get(b).take("assets").len(), 1);
        assert_eq!(buffers.pending(), 0);
    }
}
