//! Upstream collaborators: the ordered block stream and live chain-state reads.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FillerError;
use crate::types::{ActionTrace, Block, ContractRow};

// ─── Block stream ─────────────────────────────────────────────────────────────

/// One block worth of events, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub block: Block,
    /// Highest irreversible block known when this block was emitted.
    pub last_irreversible: u64,
    #[serde(default)]
    pub deltas: Vec<ContractRow>,
    #[serde(default)]
    pub traces: Vec<ActionTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Block(BlockMessage),
    /// Every block `>= block_num` was retracted; the stream continues with a
    /// new block `block_num`.
    Fork { block_num: u64 },
}

/// Ordered supplier of blocks and fork notifications.
#[async_trait]
pub trait BlockSource: Send {
    /// Next message, or `None` once the stream ended.
    async fn next(&mut self) -> Result<Option<StreamMessage>, FillerError>;
}

/// A fixed, pre-recorded message sequence.
#[derive(Debug, Default)]
pub struct VecSource {
    messages: VecDeque<StreamMessage>,
}

impl VecSource {
    pub fn new(messages: impl IntoIterator<Item = StreamMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }
}

#[async_trait]
impl BlockSource for VecSource {
    async fn next(&mut self) -> Result<Option<StreamMessage>, FillerError> {
        Ok(self.messages.pop_front())
    }
}

/// Adapts any `futures` stream of messages into a [`BlockSource`].
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> BlockSource for StreamSource<S>
where
    S: Stream<Item = Result<StreamMessage, FillerError>> + Send + Unpin,
{
    async fn next(&mut self) -> Result<Option<StreamMessage>, FillerError> {
        self.stream.next().await.transpose()
    }
}

// ─── Chain state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainInfo {
    pub head_block_num: u64,
    pub last_irreversible_block_num: u64,
}

/// Live source-of-truth reads used while initializing contract modules.
#[async_trait]
pub trait ChainState: Send + Sync {
    async fn get_info(&self) -> Result<ChainInfo, FillerError>;

    /// All rows of a contract table scope, decoded.
    async fn get_table_rows(
        &self,
        code: &str,
        scope: &str,
        table: &str,
    ) -> Result<Vec<Value>, FillerError>;
}

/// Fixed chain state, for tests and offline replays.
#[derive(Debug, Clone, Default)]
pub struct StaticChainState {
    info: ChainInfo,
    tables: HashMap<(String, String, String), Vec<Value>>,
}

impl StaticChainState {
    pub fn new(info: ChainInfo) -> Self {
        Self {
            info,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(mut self, code: &str, scope: &str, table: &str, rows: Vec<Value>) -> Self {
        self.tables
            .insert((code.to_string(), scope.to_string(), table.to_string()), rows);
        self
    }
}

#[async_trait]
impl ChainState for StaticChainState {
    async fn get_info(&self) -> Result<ChainInfo, FillerError> {
        Ok(self.info)
    }

    async fn get_table_rows(
        &self,
        code: &str,
        scope: &str,
        table: &str,
    ) -> Result<Vec<Value>, FillerError> {
        Ok(self
            .tables
            .get(&(code.to_string(), scope.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
