//! Per-action history in `atomicassets_logs`, registered only with
//! `store_logs`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use contractfill_core::row::row_from;
use contractfill_core::{
    ActionTrace, BlockScope, DataProcessor, Destructor, FillerError, TraceHandler,
};

use crate::handler::AtomicAssetsHandler;
use crate::processors::stamp;
use crate::schema::{LOGS, LOGS_KEY};
use crate::tier::AtomicAssetsTier;

/// Entity a logged action belongs to and the action fields forming its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Relation {
    name: &'static str,
    id_fields: &'static [&'static str],
}

const COLLECTION: Relation = Relation {
    name: "collection",
    id_fields: &["collection_name"],
};
const SCHEMA: Relation = Relation {
    name: "schema",
    id_fields: &["collection_name", "schema_name"],
};
const TEMPLATE: Relation = Relation {
    name: "template",
    id_fields: &["template_id"],
};
const ASSET: Relation = Relation {
    name: "asset",
    id_fields: &["asset_id"],
};
const OFFER: Relation = Relation {
    name: "offer",
    id_fields: &["offer_id"],
};

const LOGGED_ACTIONS: &[(&str, Relation)] = &[
    ("addcolauth", COLLECTION),
    ("addnotifyacc", COLLECTION),
    ("createcol", COLLECTION),
    ("forbidnotify", COLLECTION),
    ("remcolauth", COLLECTION),
    ("remnotifyacc", COLLECTION),
    ("setmarketfee", COLLECTION),
    ("setcoldata", COLLECTION),
    ("createschema", SCHEMA),
    ("extendschema", SCHEMA),
    ("lognewtempl", TEMPLATE),
    ("locktemplate", TEMPLATE),
    ("logmint", ASSET),
    ("logsetdata", ASSET),
    ("logbackasset", ASSET),
    ("logburnasset", ASSET),
    ("lognewoffer", OFFER),
    ("acceptoffer", OFFER),
    ("declineoffer", OFFER),
    ("canceloffer", OFFER),
];

struct LogProcessor {
    core: Arc<AtomicAssetsHandler>,
    relation: Relation,
}

pub fn register(core: &Arc<AtomicAssetsHandler>, processor: &DataProcessor) -> Destructor {
    let tier = AtomicAssetsTier::Logs.tier();
    Destructor::combine(LOGGED_ACTIONS.iter().map(|&(action, relation)| {
        processor.on_trace(
            core.contract(),
            action,
            Arc::new(LogProcessor {
                core: Arc::clone(core),
                relation,
            }),
            tier,
        )
    }))
}

impl Relation {
    /// Id of the related entity; composite ids are joined with `:`.
    fn id(&self, trace: &ActionTrace) -> Result<String, FillerError> {
        let parts = self
            .id_fields
            .iter()
            .map(|field| match trace.data.get(*field) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(FillerError::integrity(
                    &trace.contract,
                    format!(
                        "{} log without {field} (global sequence {})",
                        trace.action_name, trace.global_sequence
                    ),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(":"))
    }
}

#[async_trait]
impl TraceHandler for LogProcessor {
    async fn on_trace(&self, scope: &mut BlockScope<'_>, trace: &ActionTrace) -> Result<(), FillerError> {
        let relation_id = self.relation.id(trace)?;
        let block = scope.block().clone();
        let mut row = row_from(json!({
            "contract": self.core.contract(),
            "global_sequence": trace.global_sequence,
            "name": trace.action_name,
            "relation_name": self.relation.name,
            "relation_id": relation_id,
            "data": trace.data,
            "txid": trace.tx_id,
        }))?;
        stamp(&mut row, "created_at", &block);
        scope.db.insert(LOGS, vec![row], LOGS_KEY).await?;
        Ok(())
    }
}
