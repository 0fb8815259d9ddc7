//! `config` and `tokenconfigs` table deltas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use contractfill_core::row::row_from;
use contractfill_core::{
    BlockScope, ContractRow, DataProcessor, DeltaHandler, Destructor, FillerError, Filter,
};

use crate::handler::AtomicAssetsHandler;
use crate::schema::{CONFIG, CONFIG_KEY, TOKENS, TOKENS_KEY};
use crate::tier::AtomicAssetsTier;
use crate::types::{ConfigTableRow, TokenConfigsTableRow};
use crate::utils::parse_symbol;

#[derive(Debug, Clone, Copy)]
enum ConfigTable {
    Config,
    TokenConfigs,
}

struct ConfigProcessor {
    core: Arc<AtomicAssetsHandler>,
    table: ConfigTable,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let contract = core.contract();
    let tier = AtomicAssetsTier::Config.tier();
    Destructor::combine([
        processor.on_delta(
            contract,
            "config",
            Arc::new(ConfigProcessor {
                core: Arc::clone(core),
                table: ConfigTable::Config,
            }),
            tier,
        ),
        processor.on_delta(
            contract,
            "tokenconfigs",
            Arc::new(ConfigProcessor {
                core: Arc::clone(core),
                table: ConfigTable::TokenConfigs,
            }),
            tier,
        ),
    ])
}

#[async_trait]
impl DeltaHandler for ConfigProcessor {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        if !delta.present {
            return Err(FillerError::integrity(
                contract,
                format!("{} row was deleted", delta.table),
            ));
        }
        let block_num = scope.block().block_num;
        let by_contract = Filter::new().eq("contract", contract);

        match self.table {
            ConfigTable::Config => {
                let config: ConfigTableRow = delta.value_as()?;
                scope
                    .db
                    .update(
                        CONFIG,
                        row_from(json!({ "collection_format": config.collection_format }))?,
                        &by_contract,
                        CONFIG_KEY,
                    )
                    .await?;

                let known = self.core.cache().current().supported_tokens;
                for token in config.supported_tokens.iter().filter(|t| !known.contains(t)) {
                    let (precision, symbol) = parse_symbol(&token.sym)?;
                    info!(contract, token = %symbol, token_contract = %token.contract, "new supported token");
                    let row = row_from(json!({
                        "contract": contract,
                        "token_symbol": symbol,
                        "token_contract": token.contract,
                        "token_precision": precision,
                    }))?;
                    scope.db.replace(TOKENS, row, TOKENS_KEY, &[]).await?;
                }

                self.core.cache().stage(block_num, |c| {
                    c.collection_format = config.collection_format;
                    c.supported_tokens = config.supported_tokens;
                });
            }
            ConfigTable::TokenConfigs => {
                let tokenconfigs: TokenConfigsTableRow = delta.value_as()?;
                scope
                    .db
                    .update(
                        CONFIG,
                        row_from(json!({ "version": tokenconfigs.version }))?,
                        &by_contract,
                        CONFIG_KEY,
                    )
                    .await?;
                self.core
                    .cache()
                    .stage(block_num, |c| c.version = tokenconfigs.version);
            }
        }
        Ok(())
    }
}
