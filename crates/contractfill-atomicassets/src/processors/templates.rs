//! `templates` and `tmplmutables` table deltas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use contractfill_core::row::row_from;
use contractfill_core::{
    BlockScope, ContractRow, DataProcessor, DeltaHandler, Destructor, FillerError, Filter,
};

use crate::handler::AtomicAssetsHandler;
use crate::schema::{SCHEMAS, TEMPLATES, TEMPLATES_KEY};
use crate::tier::AtomicAssetsTier;
use crate::types::{Format, MutableTemplatesTableRow, TemplatesTableRow};

#[derive(Debug, Clone, Copy)]
enum TemplateTable {
    Templates,
    Mutables,
}

struct TemplateProcessor {
    core: Arc<AtomicAssetsHandler>,
    table: TemplateTable,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let tier = AtomicAssetsTier::Templates.tier();
    let handler = |table| {
        Arc::new(TemplateProcessor {
            core: Arc::clone(core),
            table,
        })
    };
    Destructor::combine([
        processor.on_delta(core.contract(), "templates", handler(TemplateTable::Templates), tier),
        processor.on_delta(core.contract(), "tmplmutables", handler(TemplateTable::Mutables), tier),
    ])
}

impl TemplateProcessor {
    /// Attribute format of the template's schema.
    async fn schema_format(
        &self,
        scope: &mut BlockScope<'_>,
        collection_name: &str,
        schema_name: &str,
    ) -> Result<Vec<Format>, FillerError> {
        let contract = self.core.contract();
        let schema = scope
            .db
            .find_one(
                SCHEMAS,
                Filter::new()
                    .eq("contract", contract)
                    .eq("collection_name", collection_name)
                    .eq("schema_name", schema_name),
            )
            .await?
            .ok_or_else(|| {
                FillerError::integrity(
                    contract,
                    format!("schema {collection_name}:{schema_name} of template not found"),
                )
            })?;
        match schema.get("format") {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(format) => Ok(serde_json::from_value(format.clone())?),
        }
    }

    async fn template(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let template: TemplatesTableRow = delta.value_as()?;
        let block = scope.block().clone();
        let (deleted_block, deleted_time) = if delta.present {
            (Value::Null, Value::Null)
        } else {
            (json!(block.block_num), json!(block.timestamp))
        };
        let by_id = Filter::new()
            .eq("contract", contract)
            .eq("template_id", template.template_id);

        if scope.db.find_one(TEMPLATES, by_id.clone()).await?.is_some() {
            let patch = row_from(json!({
                "transferable": template.transferable,
                "burnable": template.burnable,
                "max_supply": template.max_supply,
                "issued_supply": template.issued_supply,
                "deleted_at_block": deleted_block,
                "deleted_at_time": deleted_time,
            }))?;
            scope.db.update(TEMPLATES, patch, &by_id, TEMPLATES_KEY).await?;
            return Ok(());
        }

        let format = self
            .schema_format(scope, &delta.scope, &template.schema_name)
            .await?;
        let immutable_data = self
            .core
            .decoder()
            .decode(&format, &template.immutable_serialized_data)?;
        let row = row_from(json!({
            "contract": contract,
            "template_id": template.template_id,
            "collection_name": delta.scope,
            "schema_name": template.schema_name,
            "transferable": template.transferable,
            "burnable": template.burnable,
            "max_supply": template.max_supply,
            "issued_supply": template.issued_supply,
            "immutable_data": immutable_data,
            "mutable_data": {},
            "created_at_block": block.block_num,
            "created_at_time": block.timestamp,
            "deleted_at_block": deleted_block,
            "deleted_at_time": deleted_time,
        }))?;
        scope.db.insert(TEMPLATES, vec![row], TEMPLATES_KEY).await?;
        Ok(())
    }

    async fn mutables(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let template: MutableTemplatesTableRow = delta.value_as()?;
        let format = self
            .schema_format(scope, &delta.scope, &template.schema_name)
            .await?;
        let mutable_data = if delta.present {
            self.core
                .decoder()
                .decode(&format, &template.mutable_serialized_data)?
        } else {
            json!({})
        };
        scope
            .db
            .update(
                TEMPLATES,
                row_from(json!({ "mutable_data": mutable_data }))?,
                &Filter::new()
                    .eq("contract", contract)
                    .eq("template_id", template.template_id),
                TEMPLATES_KEY,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeltaHandler for TemplateProcessor {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        match self.table {
            TemplateTable::Templates => self.template(scope, delta).await,
            TemplateTable::Mutables => self.mutables(scope, delta).await,
        }
    }
}
