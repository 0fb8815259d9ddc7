//! Trade offer lifecycle traces.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use contractfill_core::row::row_from;
use contractfill_core::{
    ActionTrace, BlockScope, DataProcessor, Destructor, FillerError, Filter, Row, TraceHandler,
};

use crate::handler::AtomicAssetsHandler;
use crate::processors::{patch, stamp};
use crate::schema::{OFFERS, OFFERS_ASSETS, OFFERS_ASSETS_KEY, OFFERS_KEY};
use crate::tier::{AtomicAssetsTier, OfferState};
use crate::types::{LogNewOfferActionData, OfferUpdateActionData};
use crate::utils::truncate_memo;

#[derive(Debug, Clone, Copy)]
enum OfferAction {
    Create,
    Accept,
    Decline,
    Cancel,
}

struct OfferProcessor {
    core: Arc<AtomicAssetsHandler>,
    action: OfferAction,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let contract = core.contract();
    let handler = |action| {
        Arc::new(OfferProcessor {
            core: Arc::clone(core),
            action,
        })
    };
    let update = AtomicAssetsTier::UpdateOffer.tier();
    Destructor::combine([
        processor.on_trace(
            contract,
            "lognewoffer",
            handler(OfferAction::Create),
            AtomicAssetsTier::CreateOffer.tier(),
        ),
        processor.on_trace(contract, "acceptoffer", handler(OfferAction::Accept), update),
        processor.on_trace(contract, "declineoffer", handler(OfferAction::Decline), update),
        processor.on_trace(contract, "canceloffer", handler(OfferAction::Cancel), update),
    ])
}

impl OfferProcessor {
    async fn create(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: LogNewOfferActionData = trace.data_as()?;
        let block = scope.block().clone();

        let mut offer = row_from(json!({
            "contract": contract,
            "offer_id": data.offer_id,
            "sender": data.sender,
            "recipient": data.recipient,
            "memo": truncate_memo(&data.memo),
            "state": OfferState::Pending,
        }))?;
        stamp(&mut offer, "created_at", &block);
        stamp(&mut offer, "updated_at", &block);
        scope.db.insert(OFFERS, vec![offer], OFFERS_KEY).await?;

        let mut items: Vec<Row> = Vec::new();
        for (owner, asset_ids) in [
            (&data.sender, &data.sender_asset_ids),
            (&data.recipient, &data.recipient_asset_ids),
        ] {
            for (index, asset_id) in asset_ids.iter().enumerate() {
                items.push(row_from(json!({
                    "contract": contract,
                    "offer_id": data.offer_id,
                    "owner": owner,
                    "index": index + 1,
                    "asset_id": asset_id,
                }))?);
            }
        }
        if !items.is_empty() {
            scope.db.insert(OFFERS_ASSETS, items, OFFERS_ASSETS_KEY).await?;
        }
        Ok(())
    }

    async fn set_state(
        &self,
        scope: &mut BlockScope<'_>,
        trace: &ActionTrace,
        state: OfferState,
    ) -> Result<(), FillerError> {
        let contract = self.core.contract();
        let data: OfferUpdateActionData = trace.data_as()?;
        let block = scope.block().clone();
        let mut update = patch();
        update.insert("state".into(), json!(state));
        stamp(&mut update, "updated_at", &block);

        let filter = Filter::new()
            .eq("contract", contract)
            .eq("offer_id", data.offer_id.as_str());
        let updated = scope.db.update(OFFERS, update, &filter, OFFERS_KEY).await?;
        if updated == 0 {
            debug!(contract, offer_id = %data.offer_id, ?state, "offer state change for unknown offer");
        }
        Ok(())
    }
}

#[async_trait]
impl TraceHandler for OfferProcessor {
    async fn on_trace(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        match self.action {
            OfferAction::Create => self.create(scope, trace).await,
            OfferAction::Accept => self.set_state(scope, trace, OfferState::Accepted).await,
            OfferAction::Decline => self.set_state(scope, trace, OfferState::Declined).await,
            OfferAction::Cancel => self.set_state(scope, trace, OfferState::Cancelled).await,
        }
    }
}
