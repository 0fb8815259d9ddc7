//! `balances` table deltas: the contract-held token balances of an account.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use contractfill_core::row::row_from;
use contractfill_core::{
    BlockScope, ContractRow, DataProcessor, DeltaHandler, Destructor, FillerError, Filter,
};

use crate::handler::AtomicAssetsHandler;
use crate::schema::{BALANCES, BALANCES_KEY};
use crate::tier::AtomicAssetsTier;
use crate::types::BalancesTableRow;
use crate::utils::split_token;

struct BalanceProcessor {
    core: Arc<AtomicAssetsHandler>,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    processor.on_delta(
        core.contract(),
        "balances",
        Arc::new(BalanceProcessor {
            core: Arc::clone(core),
        }),
        AtomicAssetsTier::Balances.tier(),
    )
}

#[async_trait]
impl DeltaHandler for BalanceProcessor {
    async fn on_delta(&self, scope: &mut BlockScope<'_>, delta: &ContractRow) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let balance: BalancesTableRow = delta.value_as()?;

        scope
            .db
            .delete(
                BALANCES,
                &Filter::new().eq("contract", contract).eq("owner", balance.owner.as_str()),
            )
            .await?;
        if !delta.present {
            return Ok(());
        }

        let block = scope.block().clone();
        let rows = balance
            .quantities
            .iter()
            .map(|quantity| {
                let token = split_token(quantity)?;
                row_from(json!({
                    "contract": contract,
                    "owner": balance.owner,
                    "token_symbol": token.symbol,
                    "amount": token.amount,
                    "updated_at_block": block.block_num,
                    "updated_at_time": block.timestamp,
                }))
            })
            .collect::<Result<Vec<_>, FillerError>>()?;
        scope.db.insert(BALANCES, rows, BALANCES_KEY).await?;
        Ok(())
    }
}
