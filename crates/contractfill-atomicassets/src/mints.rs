//! Maintenance of derived asset fields: template mint numbers and per-template
//! asset counts.
//!
//! Both only read irreversible or aggregate state, so they write through their
//! own transactions without undo bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use tracing::{debug, info};

use contractfill_core::row::row_from;
use contractfill_core::{Database, FillerError, Filter, NaturalKey, Query, Row};

use crate::schema::{ASSETS, ASSET_COUNTS, MINTS};
use crate::utils::numeric_id;

/// Assets numbered per `update_atomicassets_mints` job run.
pub const MINT_UPDATE_BATCH: usize = 50_000;

fn missing_filter(contract: &str, last_irreversible: u64) -> Filter {
    Filter::new()
        .eq("contract", contract)
        .not_null("template_id")
        .is_null("template_mint")
        .lte("minted_at_block", last_irreversible)
}

/// Assets minted at or before `last_irreversible` that still lack a mint number.
pub async fn missing_mints(
    db: &dyn Database,
    contract: &str,
    last_irreversible: u64,
) -> Result<u64, FillerError> {
    let mut tx = db.begin().await?;
    let count = tx
        .count(ASSETS, &missing_filter(contract, last_irreversible))
        .await?;
    tx.rollback().await?;
    Ok(count)
}

/// Assign template mint numbers to irreversible assets.
///
/// Within a template, assets are numbered from 1 by ascending numeric asset
/// id. Templates are handled in ascending id order until at least
/// `max_assets` assets got a number. Returns the number of assets updated.
pub async fn update_mints(
    db: &dyn Database,
    contract: &str,
    last_irreversible: u64,
    max_assets: usize,
) -> Result<u64, FillerError> {
    let mut tx = db.begin().await?;
    let missing = tx
        .select(ASSETS, &Query::new(missing_filter(contract, last_irreversible)))
        .await?;
    let templates: BTreeSet<i64> = missing
        .iter()
        .filter_map(|(_, row)| row.get("template_id").and_then(Value::as_i64))
        .collect();

    let mut updated = 0u64;
    for template_id in templates {
        let filter = Filter::new()
            .eq("contract", contract)
            .eq("template_id", template_id)
            .lte("minted_at_block", last_irreversible);
        let mut assets = tx.select(ASSETS, &Query::new(filter)).await?;
        assets.sort_by_key(|(_, row)| asset_id(row).map(numeric_id).unwrap_or(u64::MAX));

        for (index, (key, mut row)) in assets.into_iter().enumerate() {
            if !row.get("template_mint").map_or(true, Value::is_null) {
                continue;
            }
            let mint = json!(index as u64 + 1);
            row.insert("template_mint".into(), mint.clone());
            tx.put(ASSETS, &key, row).await?;
            if let Some(mut record) = tx.get(MINTS, &key).await? {
                record.insert("template_mint".into(), mint);
                tx.put(MINTS, &key, record).await?;
            }
            updated += 1;
        }
        debug!(contract, template_id, updated, "template mints assigned");
        if updated as usize >= max_assets {
            break;
        }
    }
    tx.commit().await?;
    Ok(updated)
}

/// Rebuild `atomicassets_asset_counts` for `contract` from the asset table.
/// Returns the number of count rows written.
pub async fn aggregate_asset_counts(db: &dyn Database, contract: &str) -> Result<usize, FillerError> {
    #[derive(Default)]
    struct Counts {
        assets: u64,
        burned: u64,
        owned: u64,
    }

    let mut tx = db.begin().await?;
    let by_contract = Filter::new().eq("contract", contract);
    let assets = tx.select(ASSETS, &Query::new(by_contract.clone())).await?;

    // Keyed by encoded natural key so iteration order is stable.
    let mut groups: BTreeMap<String, (NaturalKey, Counts)> = BTreeMap::new();
    for (_, row) in &assets {
        let key = NaturalKey(vec![
            json!(contract),
            row.get("collection_name").cloned().unwrap_or(Value::Null),
            row.get("schema_name").cloned().unwrap_or(Value::Null),
            row.get("template_id").cloned().unwrap_or(Value::Null),
        ]);
        let (_, counts) = groups
            .entry(key.encode())
            .or_insert_with(|| (key, Counts::default()));
        counts.assets += 1;
        if row.get("owner").map_or(true, Value::is_null) {
            counts.burned += 1;
        } else {
            counts.owned += 1;
        }
    }

    let stale = tx.select(ASSET_COUNTS, &Query::new(by_contract)).await?;
    for (key, _) in stale {
        tx.remove(ASSET_COUNTS, &key).await?;
    }
    let written = groups.len();
    for (key, counts) in groups.into_values() {
        let row = row_from(json!({
            "contract": key.0[0],
            "collection_name": key.0[1],
            "schema_name": key.0[2],
            "template_id": key.0[3],
            "assets": counts.assets,
            "burned": counts.burned,
            "owned": counts.owned,
        }))?;
        tx.put(ASSET_COUNTS, &key, row).await?;
    }
    tx.commit().await?;
    info!(contract, groups = written, assets = assets.len(), "asset counts aggregated");
    Ok(written)
}

fn asset_id(row: &Row) -> Option<&str> {
    row.get("asset_id").and_then(Value::as_str)
}
