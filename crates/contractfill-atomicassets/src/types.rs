//! Decoded AtomicAssets table rows and action payloads.
//!
//! `uint64` fields (asset and offer ids) arrive as strings, smaller integers
//! as numbers. Serialized attribute data is kept as raw JSON and handed to an
//! [`AttributeDecoder`](crate::decoder::AttributeDecoder).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One attribute of a schema or of the collection format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A token entry of the `config` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedToken {
    pub contract: String,
    /// `"<precision>,<symbol>"`, e.g. `"8,WAX"`.
    pub sym: String,
}

// ─── Tables ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigTableRow {
    #[serde(default)]
    pub asset_counter: Value,
    #[serde(default)]
    pub offer_counter: Value,
    #[serde(default)]
    pub collection_format: Vec<Format>,
    #[serde(default)]
    pub supported_tokens: Vec<SupportedToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfigsTableRow {
    pub standard: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalancesTableRow {
    pub owner: String,
    #[serde(default)]
    pub quantities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionsTableRow {
    pub collection_name: String,
    pub author: String,
    pub allow_notify: Value,
    #[serde(default)]
    pub authorized_accounts: Vec<String>,
    #[serde(default)]
    pub notify_accounts: Vec<String>,
    pub market_fee: f64,
    #[serde(default)]
    pub serialized_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorSwapsTableRow {
    pub collection_name: String,
    #[serde(default)]
    pub current_author: String,
    #[serde(default)]
    pub new_author: String,
    /// Unix seconds.
    #[serde(default)]
    pub acceptance_date: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemasTableRow {
    pub schema_name: String,
    pub format: Vec<Format>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaTypesTableRow {
    pub schema_name: String,
    pub format_type: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesTableRow {
    pub template_id: i64,
    pub schema_name: String,
    pub transferable: bool,
    pub burnable: bool,
    pub max_supply: u64,
    pub issued_supply: u64,
    #[serde(default)]
    pub immutable_serialized_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MutableTemplatesTableRow {
    pub template_id: i64,
    pub schema_name: String,
    #[serde(default)]
    pub mutable_serialized_data: Value,
}

// ─── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LogMintAssetActionData {
    pub asset_id: String,
    pub authorized_minter: String,
    pub collection_name: String,
    pub schema_name: String,
    /// `-1` when the asset has no template.
    pub template_id: i64,
    pub new_asset_owner: String,
    #[serde(default)]
    pub immutable_data: Value,
    #[serde(default)]
    pub mutable_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogBackAssetActionData {
    pub asset_owner: String,
    pub asset_id: String,
    pub backed_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogBurnAssetActionData {
    pub asset_owner: String,
    pub asset_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSetDataActionData {
    pub asset_owner: String,
    pub asset_id: String,
    #[serde(default)]
    pub new_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogTransferActionData {
    pub collection_name: String,
    pub from: String,
    pub to: String,
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogMoveActionData {
    pub collection_name: String,
    pub owner: String,
    pub from: String,
    pub to: String,
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogNewOfferActionData {
    pub offer_id: String,
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub sender_asset_ids: Vec<String>,
    #[serde(default)]
    pub recipient_asset_ids: Vec<String>,
    #[serde(default)]
    pub memo: String,
}

/// `acceptoffer`, `declineoffer` and `canceloffer`.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferUpdateActionData {
    pub offer_id: String,
}
