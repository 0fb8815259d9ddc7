//! Asset lifecycle traces: mint, back, burn, data updates, transfers and moves.
//!
//! Mints are buffered per block and written in bulk by the `MintAsset` tier
//! hook, so every later tier of the block sees them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use contractfill_core::row::row_from;
use contractfill_core::{
    ActionTrace, BlockScope, BufferHandle, DataProcessor, Destructor, FillerError, Filter, Row,
    TierCompleteHook, TraceHandler,
};

use crate::decoder::convert_attribute_map;
use crate::handler::AtomicAssetsHandler;
use crate::processors::{patch, stamp};
use crate::schema::{
    ASSETS, ASSETS_KEY, BACKED_TOKENS, BACKED_TOKENS_KEY, MINTS, MINTS_KEY, MOVES, MOVES_ASSETS,
    MOVES_ASSETS_KEY, MOVES_KEY, TRANSFERS, TRANSFERS_ASSETS, TRANSFERS_ASSETS_KEY, TRANSFERS_KEY,
};
use crate::tier::AtomicAssetsTier;
use crate::types::{
    LogBackAssetActionData, LogBurnAssetActionData, LogMintAssetActionData, LogMoveActionData,
    LogSetDataActionData, LogTransferActionData,
};
use crate::utils::{add_amounts, split_token, truncate_memo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetAction {
    Mint,
    BackAsset,
    Burn,
    SetData,
    Transfer,
    Move,
}

impl AssetAction {
    fn name(self) -> &'static str {
        match self {
            Self::Mint => "logmint",
            Self::BackAsset => "logbackasset",
            Self::Burn => "logburnasset",
            Self::SetData => "logsetdata",
            Self::Transfer => "logtransfer",
            Self::Move => "logmove",
        }
    }
}

struct AssetProcessor {
    core: Arc<AtomicAssetsHandler>,
    action: AssetAction,
    mints: BufferHandle,
}

/// Writes the block's buffered mints.
struct MintFlush {
    mints: BufferHandle,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let mints = processor.buffer();
    let contract = core.contract();
    let handler = |action| {
        Arc::new(AssetProcessor {
            core: Arc::clone(core),
            action,
            mints,
        })
    };

    let mint_tier = AtomicAssetsTier::MintAsset.tier();
    let update_tier = AtomicAssetsTier::UpdateAsset.tier();
    let mut destructor = Destructor::combine([
        processor.on_trace(contract, AssetAction::Mint.name(), handler(AssetAction::Mint), mint_tier),
        processor.on_priority_complete(mint_tier, contract, Arc::new(MintFlush { mints })),
    ]);
    for action in [
        AssetAction::BackAsset,
        AssetAction::Burn,
        AssetAction::SetData,
        AssetAction::Transfer,
        AssetAction::Move,
    ] {
        destructor.push(processor.on_trace(contract, action.name(), handler(action), update_tier));
    }
    destructor
}

impl AssetProcessor {
    fn mint(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogMintAssetActionData = trace.data_as()?;
        let block = scope.block().clone();
        let template_id = (data.template_id >= 0).then_some(data.template_id);

        let mut asset = row_from(json!({
            "contract": contract,
            "asset_id": data.asset_id,
            "collection_name": data.collection_name,
            "schema_name": data.schema_name,
            "template_id": template_id,
            "template_mint": null,
            "owner": data.new_asset_owner,
            "holder": data.new_asset_owner,
            "mutable_data": convert_attribute_map(&data.mutable_data)?,
            "immutable_data": convert_attribute_map(&data.immutable_data)?,
            "burned_by_account": null,
            "burned_at_block": null,
            "burned_at_time": null,
        }))?;
        stamp(&mut asset, "transferred_at", &block);
        stamp(&mut asset, "updated_at", &block);
        stamp(&mut asset, "minted_at", &block);

        let mint = row_from(json!({
            "contract": contract,
            "asset_id": data.asset_id,
            "receiver": data.new_asset_owner,
            "minter": data.authorized_minter,
            "txid": trace.tx_id,
            "template_mint": null,
        }))?;

        let buffer = scope.buffer(self.mints);
        buffer.push(ASSETS, asset);
        buffer.push(MINTS, mint);
        scope.send("assets", trace);
        Ok(())
    }

    async fn back_asset(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogBackAssetActionData = trace.data_as()?;
        let token = split_token(&data.backed_token)?;
        let block = scope.block().clone();
        let filter = Filter::new()
            .eq("contract", contract)
            .eq("asset_id", data.asset_id.as_str())
            .eq("token_symbol", token.symbol.as_str());

        match scope.db.find_one(BACKED_TOKENS, filter.clone()).await? {
            Some(existing) => {
                let current = existing.get("amount").and_then(Value::as_str).unwrap_or("0");
                let mut update = patch();
                update.insert("amount".into(), json!(add_amounts(current, &token.amount)?));
                stamp(&mut update, "updated_at", &block);
                scope
                    .db
                    .update(BACKED_TOKENS, update, &filter, BACKED_TOKENS_KEY)
                    .await?;
            }
            None => {
                let mut row = row_from(json!({
                    "contract": contract,
                    "asset_id": data.asset_id,
                    "token_symbol": token.symbol,
                    "amount": token.amount,
                }))?;
                stamp(&mut row, "updated_at", &block);
                scope.db.insert(BACKED_TOKENS, vec![row], BACKED_TOKENS_KEY).await?;
            }
        }
        scope.send("assets", trace);
        Ok(())
    }

    async fn burn(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogBurnAssetActionData = trace.data_as()?;
        let block = scope.block().clone();
        let mut update = row_from(json!({
            "owner": null,
            "burned_by_account": data.asset_owner,
        }))?;
        stamp(&mut update, "burned_at", &block);
        stamp(&mut update, "updated_at", &block);
        scope
            .db
            .update(ASSETS, update, &by_asset(contract, &data.asset_id), ASSETS_KEY)
            .await?;
        scope.send("assets", trace);
        Ok(())
    }

    async fn set_data(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogSetDataActionData = trace.data_as()?;
        let block = scope.block().clone();
        let mut update = patch();
        update.insert(
            "mutable_data".into(),
            Value::Object(convert_attribute_map(&data.new_data)?),
        );
        stamp(&mut update, "updated_at", &block);
        scope
            .db
            .update(ASSETS, update, &by_asset(contract, &data.asset_id), ASSETS_KEY)
            .await?;
        scope.send("assets", trace);
        Ok(())
    }

    async fn transfer(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogTransferActionData = trace.data_as()?;
        let block = scope.block().clone();

        let mut update = row_from(json!({ "owner": data.to, "holder": data.to }))?;
        stamp(&mut update, "transferred_at", &block);
        stamp(&mut update, "updated_at", &block);
        let filter = Filter::new()
            .eq("contract", contract)
            .any("asset_id", data.asset_ids.iter().map(String::as_str))
            .eq("owner", data.from.as_str());
        scope.db.update(ASSETS, update, &filter, ASSETS_KEY).await?;

        if self.core.args().store_transfers {
            let mut transfer = row_from(json!({
                "contract": contract,
                "transfer_id": trace.global_sequence,
                "sender": data.from,
                "recipient": data.to,
                "memo": truncate_memo(&data.memo),
                "txid": trace.tx_id,
            }))?;
            stamp(&mut transfer, "created_at", &block);
            scope.db.insert(TRANSFERS, vec![transfer], TRANSFERS_KEY).await?;

            let items = asset_rows(contract, "transfer_id", trace.global_sequence, &data.asset_ids)?;
            scope.db.insert(TRANSFERS_ASSETS, items, TRANSFERS_ASSETS_KEY).await?;
        }
        scope.send("transfers", trace);
        Ok(())
    }

    async fn move_assets(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogMoveActionData = trace.data_as()?;
        let block = scope.block().clone();

        let mut update = row_from(json!({ "owner": data.owner, "holder": data.to }))?;
        stamp(&mut update, "transferred_at", &block);
        stamp(&mut update, "updated_at", &block);
        let filter = Filter::new()
            .eq("contract", contract)
            .any("asset_id", data.asset_ids.iter().map(String::as_str));
        scope.db.update(ASSETS, update, &filter, ASSETS_KEY).await?;

        if self.core.args().store_transfers {
            let mut record = row_from(json!({
                "contract": contract,
                "move_id": trace.global_sequence,
                "sender": data.from,
                "recipient": data.to,
                "memo": truncate_memo(&data.memo),
                "txid": trace.tx_id,
            }))?;
            stamp(&mut record, "created_at", &block);
            scope.db.insert(MOVES, vec![record], MOVES_KEY).await?;

            let items = asset_rows(contract, "move_id", trace.global_sequence, &data.asset_ids)?;
            scope.db.insert(MOVES_ASSETS, items, MOVES_ASSETS_KEY).await?;
        }
        scope.send("transfers", trace);
        Ok(())
    }
}

fn by_asset(contract: &str, asset_id: &str) -> Filter {
    Filter::new().eq("contract", contract).eq("asset_id", asset_id)
}

/// One row per asset of a transfer or move, indexed from 1.
fn asset_rows(
    contract: &str,
    id_column: &str,
    id: u64,
    asset_ids: &[String],
) -> Result<Vec<Row>, FillerError> {
    asset_ids
        .iter()
        .enumerate()
        .map(|(index, asset_id)| {
            let mut row = row_from(json!({
                "contract": contract,
                "index": index + 1,
                "asset_id": asset_id,
            }))?;
            row.insert(id_column.to_string(), json!(id));
            Ok::<_, FillerError>(row)
        })
        .collect()
}

#[async_trait]
impl TraceHandler for AssetProcessor {
    async fn on_trace(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        match self.action {
            AssetAction::Mint => self.mint(scope, trace),
            AssetAction::BackAsset => self.back_asset(scope, trace).await,
            AssetAction::Burn => self.burn(scope, trace).await,
            AssetAction::SetData => self.set_data(scope, trace).await,
            AssetAction::Transfer => self.transfer(scope, trace).await,
            AssetAction::Move => self.move_assets(scope, trace).await,
        }
    }
}

#[async_trait]
impl TierCompleteHook for MintFlush {
    async fn on_tier_complete(&self, scope: &mut BlockScope<'_>) -> Result<(), FillerError> {
        let (assets, mints) = {
            let buffer = scope.buffer(self.mints);
            (buffer.take(ASSETS), buffer.take(MINTS))
        };
        if !assets.is_empty() {
            scope.db.insert(ASSETS, assets, ASSETS_KEY).await?;
        }
        if !mints.is_empty() {
            scope.db.insert(MINTS, mints, MINTS_KEY).await?;
        }
        Ok(())
    }
}
