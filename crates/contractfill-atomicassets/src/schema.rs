//! Tables, views and procedures owned by the AtomicAssets module.

use contractfill_core::{SchemaObject, TableDef};

pub const CONFIG: &str = "atomicassets_config";
pub const TOKENS: &str = "atomicassets_tokens";
pub const COLLECTIONS: &str = "atomicassets_collections";
pub const SCHEMAS: &str = "atomicassets_schemas";
pub const TEMPLATES: &str = "atomicassets_templates";
pub const ASSETS: &str = "atomicassets_assets";
pub const MINTS: &str = "atomicassets_mints";
pub const BACKED_TOKENS: &str = "atomicassets_assets_backed_tokens";
pub const BALANCES: &str = "atomicassets_balances";
pub const OFFERS: &str = "atomicassets_offers";
pub const OFFERS_ASSETS: &str = "atomicassets_offers_assets";
pub const TRANSFERS: &str = "atomicassets_transfers";
pub const TRANSFERS_ASSETS: &str = "atomicassets_transfers_assets";
pub const MOVES: &str = "atomicassets_moves";
pub const MOVES_ASSETS: &str = "atomicassets_moves_assets";
pub const LOGS: &str = "atomicassets_logs";
pub const ASSET_COUNTS: &str = "atomicassets_asset_counts";

// Natural keys.
pub const CONFIG_KEY: &[&str] = &["contract"];
pub const TOKENS_KEY: &[&str] = &["contract", "token_symbol"];
pub const COLLECTIONS_KEY: &[&str] = &["contract", "collection_name"];
pub const SCHEMAS_KEY: &[&str] = &["contract", "collection_name", "schema_name"];
pub const TEMPLATES_KEY: &[&str] = &["contract", "template_id"];
pub const ASSETS_KEY: &[&str] = &["contract", "asset_id"];
pub const MINTS_KEY: &[&str] = &["contract", "asset_id"];
pub const BACKED_TOKENS_KEY: &[&str] = &["contract", "asset_id", "token_symbol"];
pub const BALANCES_KEY: &[&str] = &["contract", "owner", "token_symbol"];
pub const OFFERS_KEY: &[&str] = &["contract", "offer_id"];
pub const OFFERS_ASSETS_KEY: &[&str] = &["contract", "offer_id", "asset_id"];
pub const TRANSFERS_KEY: &[&str] = &["contract", "transfer_id"];
pub const TRANSFERS_ASSETS_KEY: &[&str] = &["contract", "transfer_id", "asset_id"];
pub const MOVES_KEY: &[&str] = &["contract", "move_id"];
pub const MOVES_ASSETS_KEY: &[&str] = &["contract", "move_id", "asset_id"];
pub const LOGS_KEY: &[&str] = &["contract", "global_sequence"];
/// `template_id` is null for assets without a template.
pub const ASSET_COUNTS_KEY: &[&str] = &["contract", "collection_name", "schema_name", "template_id"];

pub const UPDATE_MINTS_PROCEDURE: &str = "update_atomicassets_mints";

pub fn tables() -> Vec<TableDef> {
    vec![
        TableDef::new(CONFIG, CONFIG_KEY),
        TableDef::new(TOKENS, TOKENS_KEY),
        TableDef::new(COLLECTIONS, COLLECTIONS_KEY),
        TableDef::new(SCHEMAS, SCHEMAS_KEY),
        TableDef::new(TEMPLATES, TEMPLATES_KEY),
        TableDef::new(ASSETS, ASSETS_KEY),
        TableDef::new(MINTS, MINTS_KEY),
        TableDef::new(BACKED_TOKENS, BACKED_TOKENS_KEY),
        TableDef::new(BALANCES, BALANCES_KEY),
        TableDef::new(OFFERS, OFFERS_KEY),
        TableDef::new(OFFERS_ASSETS, OFFERS_ASSETS_KEY),
        TableDef::new(TRANSFERS, TRANSFERS_KEY),
        TableDef::new(TRANSFERS_ASSETS, TRANSFERS_ASSETS_KEY),
        TableDef::new(MOVES, MOVES_KEY),
        TableDef::new(MOVES_ASSETS, MOVES_ASSETS_KEY),
        TableDef::new(LOGS, LOGS_KEY),
        TableDef::new(ASSET_COUNTS, ASSET_COUNTS_KEY),
    ]
}

/// Derived views, in dependency order.
pub fn views() -> Vec<SchemaObject> {
    vec![
        SchemaObject::view(
            "atomicassets_assets_master",
            include_str!("../definitions/views/atomicassets_assets_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_asset_mints_master",
            include_str!("../definitions/views/atomicassets_asset_mints_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_templates_master",
            include_str!("../definitions/views/atomicassets_templates_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_schemas_master",
            include_str!("../definitions/views/atomicassets_schemas_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_collections_master",
            include_str!("../definitions/views/atomicassets_collections_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_offers_master",
            include_str!("../definitions/views/atomicassets_offers_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_transfers_master",
            include_str!("../definitions/views/atomicassets_transfers_master.sql"),
        ),
        SchemaObject::view(
            "atomicassets_moves_master",
            include_str!("../definitions/views/atomicassets_moves_master.sql"),
        ),
    ]
}

pub fn procedures() -> Vec<SchemaObject> {
    vec![SchemaObject::procedure(
        UPDATE_MINTS_PROCEDURE,
        include_str!("../definitions/procedures/update_atomicassets_mints.sql"),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_is_prefixed_and_unique() {
        let tables = tables();
        assert_eq!(tables.len(), 17);
        let mut names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 17);
        assert!(tables.iter().all(|t| t.name.starts_with("atomicassets_")));
        assert!(tables.iter().all(|t| t.natural_key[0] == "contract"));
    }

    #[test]
    fn views_select_from_contract_rows() {
        for view in views() {
            assert!(view.script.contains("contract_rows"), "{}", view.name);
            assert!(!view.script.trim_end().ends_with(';'), "{}", view.name);
        }
    }
}
