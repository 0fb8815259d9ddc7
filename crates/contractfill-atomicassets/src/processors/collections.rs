//! `collections` and `authorswaps` table deltas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use contractfill_core::row::row_from;
use contractfill_core::{
    BlockScope, ContractRow, DataProcessor, DeltaHandler, Destructor, FillerError, Filter,
};

use crate::handler::AtomicAssetsHandler;
use crate::schema::{COLLECTIONS, COLLECTIONS_KEY};
use crate::tier::AtomicAssetsTier;
use crate::types::{AuthorSwapsTableRow, CollectionsTableRow};

#[derive(Debug, Clone, Copy)]
enum CollectionTable {
    Collections,
    AuthorSwaps,
}

struct CollectionProcessor {
    core: Arc<AtomicAssetsHandler>,
    table: CollectionTable,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let tier = AtomicAssetsTier::Collections.tier();
    let handler = |table| {
        Arc::new(CollectionProcessor {
            core: Arc::clone(core),
            table,
        })
    };
    Destructor::combine([
        processor.on_delta(core.contract(), "collections", handler(CollectionTable::Collections), tier),
        processor.on_delta(core.contract(), "authorswaps", handler(CollectionTable::AuthorSwaps), tier),
    ])
}

impl CollectionProcessor {
    async fn collection(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        if !delta.present {
            return Err(FillerError::integrity(
                contract,
                "a collection was deleted, which the contract does not allow",
            ));
        }
        let collection: CollectionsTableRow = delta.value_as()?;
        let format = self.core.cache().current().collection_format;
        let data = self.core.decoder().decode(&format, &collection.serialized_data)?;
        let block = scope.block().clone();

        let row = row_from(json!({
            "contract": contract,
            "collection_name": collection.collection_name,
            "author": collection.author,
            "allow_notify": truthy(&collection.allow_notify),
            "authorized_accounts": collection.authorized_accounts,
            "notify_accounts": collection.notify_accounts,
            "market_fee": collection.market_fee,
            "data": data,
            "created_at_block": block.block_num,
            "created_at_time": block.timestamp,
        }))?;
        scope
            .db
            .replace(
                COLLECTIONS,
                row,
                COLLECTIONS_KEY,
                &["created_at_block", "created_at_time", "data"],
            )
            .await
    }

    async fn author_swap(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let swap: AuthorSwapsTableRow = delta.value_as()?;
        let patch = if delta.present {
            json!({
                "new_author_name": swap.new_author,
                "new_author_date": swap.acceptance_date * 1000,
            })
        } else {
            json!({ "new_author_name": null, "new_author_date": null })
        };
        scope
            .db
            .update(
                COLLECTIONS,
                row_from(patch)?,
                &Filter::new()
                    .eq("contract", contract)
                    .eq("collection_name", swap.collection_name.as_str()),
                COLLECTIONS_KEY,
            )
            .await?;
        Ok(())
    }
}

/// `allow_notify` arrives as a bool or as 0/1.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

#[async_trait]
impl DeltaHandler for CollectionProcessor {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        match self.table {
            CollectionTable::Collections => self.collection(scope, delta).await,
            CollectionTable::AuthorSwaps => self.author_swap(scope, delta).await,
        }
    }
}
