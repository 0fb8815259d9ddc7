//! `schemas` and `schematypes` table deltas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use contractfill_core::row::row_from;
use contractfill_core::{
    BlockScope, ContractRow, DataProcessor, DeltaHandler, Destructor, FillerError, Filter,
};

use crate::handler::AtomicAssetsHandler;
use crate::schema::{SCHEMAS, SCHEMAS_KEY};
use crate::tier::AtomicAssetsTier;
use crate::types::{SchemaTypesTableRow, SchemasTableRow};

#[derive(Debug, Clone, Copy)]
enum SchemaTable {
    Schemas,
    SchemaTypes,
}

struct SchemaProcessor {
    core: Arc<AtomicAssetsHandler>,
    table: SchemaTable,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let tier = AtomicAssetsTier::Schemas.tier();
    let handler = |table| {
        Arc::new(SchemaProcessor {
            core: Arc::clone(core),
            table,
        })
    };
    Destructor::combine([
        processor.on_delta(core.contract(), "schemas", handler(SchemaTable::Schemas), tier),
        processor.on_delta(core.contract(), "schematypes", handler(SchemaTable::SchemaTypes), tier),
    ])
}

#[async_trait]
impl DeltaHandler for SchemaProcessor {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        if !delta.present {
            return Err(FillerError::integrity(
                contract,
                format!("a {} row was deleted, which the contract does not allow", delta.table),
            ));
        }
        // Schemas are scoped by collection.
        let collection_name = delta.scope.as_str();

        match self.table {
            SchemaTable::Schemas => {
                let schema: SchemasTableRow = delta.value_as()?;
                let block = scope.block().clone();
                let row = row_from(json!({
                    "contract": contract,
                    "collection_name": collection_name,
                    "schema_name": schema.schema_name,
                    "format": schema.format,
                    "created_at_block": block.block_num,
                    "created_at_time": block.timestamp,
                }))?;
                scope
                    .db
                    .replace(SCHEMAS, row, SCHEMAS_KEY, &["created_at_block", "created_at_time"])
                    .await?;
            }
            SchemaTable::SchemaTypes => {
                let types: SchemaTypesTableRow = delta.value_as()?;
                scope
                    .db
                    .update(
                        SCHEMAS,
                        row_from(json!({ "types": types.format_type }))?,
                        &Filter::new()
                            .eq("contract", contract)
                            .eq("collection_name", collection_name)
                            .eq("schema_name", types.schema_name.as_str()),
                        SCHEMAS_KEY,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
