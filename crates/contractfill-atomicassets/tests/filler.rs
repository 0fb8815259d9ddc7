//! End-to-end block processing for the AtomicAssets module over the
//! in-memory backend.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use contractfill_atomicassets::mints;
use contractfill_atomicassets::schema::{
    ASSETS, ASSET_COUNTS, BACKED_TOKENS, COLLECTIONS, LOGS, MINTS, OFFERS, OFFERS_ASSETS, TEMPLATES,
    TOKENS, TRANSFERS, TRANSFERS_ASSETS,
};
use contractfill_atomicassets::{AtomicAssetsArgs, AtomicAssetsHandler, OfferState, HANDLER_NAME};
use contractfill_core::{
    ActionTrace, Block, BlockMessage, BroadcastRelay, ChainInfo, ContractHandler, ContractRow,
    Filler, FillerBuilder, FillerConfig, FillerError, HandlerFactory, MemoryDatabase, Notification,
    Row, StaticChainState,
};

const CONTRACT: &str = "atomicassets";

// ─── Fixtures ─────────────────────────────────────────────────────────────────

fn timestamp(block_num: u64) -> i64 {
    1_700_000_000_000 + block_num as i64 * 500
}

fn tokenconfigs(standard: &str) -> Vec<Value> {
    vec![json!({ "standard": standard, "version": "1.3.1" })]
}

fn chain_with(rows: Vec<Value>, last_irreversible: u64) -> Arc<StaticChainState> {
    Arc::new(
        StaticChainState::new(ChainInfo {
            head_block_num: last_irreversible + 10,
            last_irreversible_block_num: last_irreversible,
        })
        .with_table(CONTRACT, CONTRACT, "tokenconfigs", rows),
    )
}

fn config(store_history: bool, reconcile_threshold: u64) -> FillerConfig {
    FillerBuilder::new()
        .reader("atomic-test")
        .start_block(100)
        .reconcile_threshold(reconcile_threshold)
        .contract(
            HANDLER_NAME,
            json!({
                "atomicassets_account": CONTRACT,
                "store_transfers": store_history,
                "store_logs": store_history,
            }),
        )
        .build_config()
}

fn factory() -> HandlerFactory {
    contractfill_atomicassets::register(HandlerFactory::new())
}

async fn prepared(
    db: &MemoryDatabase,
    store_history: bool,
) -> (Filler, broadcast::Receiver<Notification>) {
    let (relay, rx) = BroadcastRelay::new(64);
    let mut filler = Filler::from_factory(
        config(store_history, 50_000),
        &factory(),
        Arc::new(db.clone()),
        chain_with(tokenconfigs("atomicassets"), 90),
        Arc::new(relay),
    )
    .unwrap();
    filler.prepare().await.unwrap();
    (filler, rx)
}

fn trace(action: &str, global_sequence: u64, data: Value) -> ActionTrace {
    ActionTrace {
        contract: CONTRACT.into(),
        action_name: action.into(),
        global_sequence,
        block_num: 0,
        tx_id: format!("tx{global_sequence}"),
        data,
    }
}

fn delta(table: &str, scope: &str, present: bool, value: Value) -> ContractRow {
    ContractRow {
        contract: CONTRACT.into(),
        scope: scope.into(),
        table: table.into(),
        primary_key: "0".into(),
        present,
        value,
    }
}

/// A block that is final as soon as it is applied.
fn final_block(block_num: u64, deltas: Vec<ContractRow>, traces: Vec<ActionTrace>) -> BlockMessage {
    BlockMessage {
        block: Block::new(block_num, timestamp(block_num), false),
        last_irreversible: block_num,
        deltas,
        traces,
    }
}

/// A reversible block with everything up to 99 final.
fn reversible_block(
    block_num: u64,
    deltas: Vec<ContractRow>,
    traces: Vec<ActionTrace>,
) -> BlockMessage {
    BlockMessage {
        block: Block::new(block_num, timestamp(block_num), true),
        last_irreversible: 99,
        deltas,
        traces,
    }
}

fn mint(global_sequence: u64, asset_id: &str, template_id: i64, owner: &str) -> ActionTrace {
    trace(
        "logmint",
        global_sequence,
        json!({
            "asset_id": asset_id,
            "authorized_minter": "minter",
            "collection_name": "heroes",
            "schema_name": "warriors",
            "template_id": template_id,
            "new_asset_owner": owner,
            "immutable_data": [{ "key": "name", "value": ["string", "Sword"] }],
            "mutable_data": [{ "key": "power", "value": ["uint64", 9000] }],
        }),
    )
}

fn transfer(global_sequence: u64, from: &str, to: &str, asset_ids: &[&str]) -> ActionTrace {
    trace(
        "logtransfer",
        global_sequence,
        json!({
            "collection_name": "heroes",
            "from": from,
            "to": to,
            "asset_ids": asset_ids,
            "memo": "gift",
        }),
    )
}

fn find<'a>(rows: &'a [Row], column: &str, value: &str) -> &'a Row {
    rows.iter()
        .find(|row| row[column] == json!(value))
        .unwrap_or_else(|| panic!("no row with {column} = {value}"))
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut received = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        received.push(notification);
    }
    received
}

// ─── Assets ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mint_then_burn() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    filler
        .process_block(&final_block(100, vec![], vec![mint(1, "12345", -1, "alice")]))
        .await
        .unwrap();
    let assets = db.rows(ASSETS).await;
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0]["owner"], json!("alice"));
    assert_eq!(assets[0]["holder"], json!("alice"));
    assert_eq!(assets[0]["template_id"], Value::Null);
    assert_eq!(assets[0]["minted_at_block"], json!(100));
    assert_eq!(assets[0]["mutable_data"], json!({ "power": "9000" }));
    assert_eq!(db.rows(MINTS).await[0]["minter"], json!("minter"));

    let burn = trace(
        "logburnasset",
        2,
        json!({ "asset_owner": "alice", "asset_id": "12345" }),
    );
    filler
        .process_block(&final_block(101, vec![], vec![burn]))
        .await
        .unwrap();

    let asset = &db.rows(ASSETS).await[0];
    assert_eq!(asset["owner"], Value::Null);
    assert_eq!(asset["burned_by_account"], json!("alice"));
    assert_eq!(asset["burned_at_block"], json!(101));
    assert_eq!(asset["burned_at_time"], json!(timestamp(101)));
    assert_eq!(asset["immutable_data"], json!({ "name": "Sword" }));
    assert_eq!(filler.last_committed(), Some(101));
}

#[tokio::test]
async fn mints_are_visible_to_later_tiers_of_the_same_block() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    // The transfer precedes the mint in trace order but runs in a later tier.
    let block = final_block(
        100,
        vec![],
        vec![transfer(2, "alice", "bob", &["7"]), mint(1, "7", -1, "alice")],
    );
    filler.process_block(&block).await.unwrap();

    let asset = &db.rows(ASSETS).await[0];
    assert_eq!(asset["owner"], json!("bob"));
    assert_eq!(asset["transferred_at_block"], json!(100));
}

#[tokio::test]
async fn transfers_and_logs_are_stored_when_enabled() {
    let db = MemoryDatabase::new();
    let (mut filler, mut rx) = prepared(&db, true).await;

    filler
        .process_block(&final_block(
            100,
            vec![],
            vec![mint(1, "1", -1, "alice"), mint(2, "2", -1, "alice")],
        ))
        .await
        .unwrap();
    filler
        .process_block(&final_block(
            101,
            vec![],
            vec![
                transfer(500, "alice", "bob", &["1", "2"]),
                transfer(501, "carol", "dave", &["1"]),
            ],
        ))
        .await
        .unwrap();

    let assets = db.rows(ASSETS).await;
    for id in ["1", "2"] {
        let asset = find(&assets, "asset_id", id);
        assert_eq!(asset["owner"], json!("bob"));
        assert_eq!(asset["transferred_at_block"], json!(101));
    }

    let transfers = db.rows(TRANSFERS).await;
    assert_eq!(transfers.len(), 2);
    let first = transfers.iter().find(|t| t["transfer_id"] == json!(500)).unwrap();
    assert_eq!(first["sender"], json!("alice"));
    assert_eq!(first["memo"], json!("gift"));
    assert_eq!(first["txid"], json!("tx500"));

    let items = db.rows(TRANSFERS_ASSETS).await;
    let mut of_first: Vec<_> = items
        .iter()
        .filter(|i| i["transfer_id"] == json!(500))
        .map(|i| (i["index"].clone(), i["asset_id"].clone()))
        .collect();
    of_first.sort_by_key(|(index, _)| index.as_u64());
    assert_eq!(of_first, vec![(json!(1), json!("1")), (json!(2), json!("2"))]);

    let logs = db.rows(LOGS).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l["relation_name"] == json!("asset")));
    assert_eq!(find(&logs, "relation_id", "2")["global_sequence"], json!(2));

    let categories: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|n| match n {
            Notification::Trace(t) => Some(t.category),
            Notification::Fork { .. } => None,
        })
        .collect();
    assert_eq!(categories, vec!["assets", "assets", "transfers", "transfers"]);
}

#[tokio::test]
async fn backed_tokens_accumulate() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    let back = |seq| {
        trace(
            "logbackasset",
            seq,
            json!({ "asset_owner": "alice", "asset_id": "1", "backed_token": "1.50000000 WAX" }),
        )
    };
    filler
        .process_block(&final_block(100, vec![], vec![mint(1, "1", -1, "alice"), back(2)]))
        .await
        .unwrap();
    filler
        .process_block(&final_block(101, vec![], vec![back(3)]))
        .await
        .unwrap();

    let tokens = db.rows(BACKED_TOKENS).await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0]["token_symbol"], json!("WAX"));
    assert_eq!(tokens[0]["amount"], json!("300000000"));
    assert_eq!(tokens[0]["updated_at_block"], json!(101));
}

// ─── Forks ────────────────────────────────────────────────────────────────────

fn atomic_tables(snapshot: std::collections::BTreeMap<String, Vec<Row>>) -> Vec<(String, Vec<Row>)> {
    snapshot
        .into_iter()
        .filter(|(name, _)| name.starts_with("atomicassets_"))
        .collect()
}

#[tokio::test]
async fn fork_replay_matches_a_clean_run() {
    let base = reversible_block(100, vec![], vec![mint(1, "1", -1, "alice")]);
    let retracted = reversible_block(101, vec![], vec![transfer(2, "alice", "bob", &["1"])]);
    let replacement = reversible_block(101, vec![], vec![transfer(3, "alice", "carol", &["1"])]);

    let db = MemoryDatabase::new();
    let (mut filler, mut rx) = prepared(&db, true).await;
    filler.process_block(&base).await.unwrap();
    let after_base = atomic_tables(db.snapshot().await);

    filler.process_block(&retracted).await.unwrap();
    assert_eq!(filler.reversible_blocks(), vec![100, 101]);
    drain(&mut rx);

    filler.handle_fork(101).await.unwrap();
    assert_eq!(atomic_tables(db.snapshot().await), after_base);
    assert_eq!(filler.last_committed(), Some(100));
    assert_eq!(drain(&mut rx), vec![Notification::Fork { block_num: 100 }]);

    filler.process_block(&replacement).await.unwrap();

    let clean = MemoryDatabase::new();
    let (mut reference, _rx) = prepared(&clean, true).await;
    reference.process_block(&base).await.unwrap();
    reference.process_block(&replacement).await.unwrap();

    assert_eq!(
        atomic_tables(db.snapshot().await),
        atomic_tables(clean.snapshot().await)
    );
    assert_eq!(db.rows(ASSETS).await[0]["owner"], json!("carol"));
}

// ─── Integrity ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn deleted_collection_aborts_the_block() {
    let db = MemoryDatabase::new();
    let (mut filler, mut rx) = prepared(&db, false).await;

    let removed = delta(
        "collections",
        CONTRACT,
        false,
        json!({ "collection_name": "heroes", "author": "alice", "allow_notify": true, "market_fee": 0.05 }),
    );
    let block = final_block(100, vec![removed], vec![mint(1, "1", -1, "alice")]);
    let err = filler.process_block(&block).await.unwrap_err();

    assert!(matches!(err, FillerError::Integrity { .. }));
    assert!(err.is_fatal());
    assert_eq!(filler.last_committed(), None);
    assert!(db.rows(ASSETS).await.is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn template_without_schema_aborts_the_block() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    let template = delta(
        "templates",
        "heroes",
        true,
        json!({
            "template_id": 5,
            "schema_name": "warriors",
            "transferable": true,
            "burnable": true,
            "max_supply": 0,
            "issued_supply": 0,
            "immutable_serialized_data": [],
        }),
    );
    let err = filler
        .process_block(&final_block(100, vec![template], vec![]))
        .await
        .unwrap_err();
    match err {
        FillerError::Integrity { contract, reason } => {
            assert_eq!(contract, CONTRACT);
            assert!(reason.contains("heroes:warriors"), "{reason}");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(db.rows(TEMPLATES).await.is_empty());
}

// ─── Collections, schemas, templates ──────────────────────────────────────────

#[tokio::test]
async fn config_collection_schema_and_template_in_one_block() {
    let db = MemoryDatabase::new();
    let handler = Arc::new(AtomicAssetsHandler::new(AtomicAssetsArgs {
        atomicassets_account: CONTRACT.into(),
        store_transfers: false,
        store_logs: false,
    }));
    let (relay, _rx) = BroadcastRelay::new(8);
    let mut filler = Filler::new(
        config(false, 50_000),
        Arc::new(db.clone()),
        chain_with(tokenconfigs("atomicassets"), 90),
        Arc::new(relay),
        vec![Arc::clone(&handler) as Arc<dyn ContractHandler>],
    );
    filler.prepare().await.unwrap();

    let deltas = vec![
        delta(
            "config",
            CONTRACT,
            true,
            json!({
                "collection_format": [{ "name": "name", "type": "string" }],
                "supported_tokens": [{ "contract": "eosio.token", "sym": "8,WAX" }],
            }),
        ),
        delta(
            "collections",
            CONTRACT,
            true,
            json!({
                "collection_name": "heroes",
                "author": "alice",
                "allow_notify": 1,
                "authorized_accounts": ["alice"],
                "notify_accounts": [],
                "market_fee": 0.05,
                "serialized_data": { "name": "Heroes" },
            }),
        ),
        delta(
            "schemas",
            "heroes",
            true,
            json!({ "schema_name": "warriors", "format": [{ "name": "name", "type": "string" }] }),
        ),
        delta(
            "templates",
            "heroes",
            true,
            json!({
                "template_id": 5,
                "schema_name": "warriors",
                "transferable": true,
                "burnable": false,
                "max_supply": 10,
                "issued_supply": 0,
                "immutable_serialized_data": [{ "key": "name", "value": ["string", "Sword"] }],
            }),
        ),
    ];
    filler
        .process_block(&final_block(100, deltas, vec![]))
        .await
        .unwrap();

    let tokens = db.rows(TOKENS).await;
    assert_eq!(tokens[0]["token_symbol"], json!("WAX"));
    assert_eq!(tokens[0]["token_precision"], json!(8));
    assert_eq!(handler.cache().committed().collection_format.len(), 1);
    assert!(!handler.cache().has_staged());

    let collection = &db.rows(COLLECTIONS).await[0];
    assert_eq!(collection["allow_notify"], json!(true));
    assert_eq!(collection["data"], json!({ "name": "Heroes" }));

    let template = &db.rows(TEMPLATES).await[0];
    assert_eq!(template["collection_name"], json!("heroes"));
    assert_eq!(template["immutable_data"], json!({ "name": "Sword" }));
    assert_eq!(template["deleted_at_block"], Value::Null);

    // A later delta updates supply and keeps the creation stamp.
    let issued = delta(
        "templates",
        "heroes",
        true,
        json!({
            "template_id": 5,
            "schema_name": "warriors",
            "transferable": true,
            "burnable": false,
            "max_supply": 10,
            "issued_supply": 3,
        }),
    );
    filler
        .process_block(&final_block(101, vec![issued], vec![]))
        .await
        .unwrap();
    let template = &db.rows(TEMPLATES).await[0];
    assert_eq!(template["issued_supply"], json!(3));
    assert_eq!(template["created_at_block"], json!(100));
}

// ─── Offers ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn offer_lifecycle() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    let offer = trace(
        "lognewoffer",
        1,
        json!({
            "offer_id": "7",
            "sender": "alice",
            "recipient": "bob",
            "sender_asset_ids": ["1", "2"],
            "recipient_asset_ids": ["3"],
            "memo": "trade",
        }),
    );
    filler
        .process_block(&final_block(100, vec![], vec![offer]))
        .await
        .unwrap();
    let offers = db.rows(OFFERS).await;
    assert_eq!(offers[0]["state"], json!(OfferState::Pending));
    assert_eq!(db.rows(OFFERS_ASSETS).await.len(), 3);
    let bobs = db.rows(OFFERS_ASSETS).await;
    assert_eq!(find(&bobs, "asset_id", "3")["owner"], json!("bob"));

    filler
        .process_block(&final_block(
            101,
            vec![],
            vec![
                trace("acceptoffer", 2, json!({ "offer_id": "7" })),
                trace("declineoffer", 3, json!({ "offer_id": "99" })),
            ],
        ))
        .await
        .unwrap();
    let offers = db.rows(OFFERS).await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["state"], json!(3));
    assert_eq!(offers[0]["updated_at_block"], json!(101));
    assert_eq!(offers[0]["created_at_block"], json!(100));
}

// ─── Maintenance ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mint_numbers_and_asset_counts() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    filler
        .process_block(&final_block(
            100,
            vec![],
            vec![mint(1, "20", 5, "alice"), mint(2, "100", 5, "bob"), mint(3, "9", -1, "bob")],
        ))
        .await
        .unwrap();
    filler
        .process_block(&final_block(101, vec![], vec![mint(4, "3", 5, "carol")]))
        .await
        .unwrap();

    assert_eq!(mints::missing_mints(&db, CONTRACT, 100).await.unwrap(), 2);
    assert_eq!(mints::missing_mints(&db, CONTRACT, 101).await.unwrap(), 3);
    assert_eq!(mints::update_mints(&db, CONTRACT, 101, 10).await.unwrap(), 3);
    assert_eq!(mints::missing_mints(&db, CONTRACT, 101).await.unwrap(), 0);

    let assets = db.rows(ASSETS).await;
    assert_eq!(find(&assets, "asset_id", "3")["template_mint"], json!(1));
    assert_eq!(find(&assets, "asset_id", "20")["template_mint"], json!(2));
    assert_eq!(find(&assets, "asset_id", "100")["template_mint"], json!(3));
    assert_eq!(find(&assets, "asset_id", "9")["template_mint"], Value::Null);
    assert_eq!(find(&db.rows(MINTS).await, "asset_id", "100")["template_mint"], json!(3));

    let burn = trace("logburnasset", 5, json!({ "asset_owner": "alice", "asset_id": "20" }));
    filler
        .process_block(&final_block(102, vec![], vec![burn]))
        .await
        .unwrap();

    assert_eq!(mints::aggregate_asset_counts(&db, CONTRACT).await.unwrap(), 2);
    let counts = db.rows(ASSET_COUNTS).await;
    let templated = counts.iter().find(|c| c["template_id"] == json!(5)).unwrap();
    assert_eq!(templated["assets"], json!(3));
    assert_eq!(templated["burned"], json!(1));
    assert_eq!(templated["owned"], json!(2));
    let plain = counts.iter().find(|c| c["template_id"].is_null()).unwrap();
    assert_eq!(plain["assets"], json!(1));
}

#[tokio::test]
async fn fork_keeps_mint_numbers_assigned_after_the_block() {
    let db = MemoryDatabase::new();
    let (mut filler, _rx) = prepared(&db, false).await;

    filler
        .process_block(&final_block(100, vec![], vec![mint(1, "20", 5, "alice")]))
        .await
        .unwrap();
    assert_eq!(mints::update_mints(&db, CONTRACT, 100, 10).await.unwrap(), 1);

    filler
        .process_block(&reversible_block(
            101,
            vec![],
            vec![transfer(2, "alice", "bob", &["20"])],
        ))
        .await
        .unwrap();
    assert_eq!(db.rows(ASSETS).await[0]["owner"], json!("bob"));

    filler.handle_fork(101).await.unwrap();
    let assets = db.rows(ASSETS).await;
    assert_eq!(assets[0]["owner"], json!("alice"));
    assert_eq!(assets[0]["template_mint"], json!(1));
    assert_eq!(db.rows(MINTS).await[0]["template_mint"], json!(1));
}

#[tokio::test]
async fn init_backfills_missing_mints() {
    let db = MemoryDatabase::new();
    {
        let (mut filler, _rx) = prepared(&db, false).await;
        filler
            .process_block(&final_block(
                100,
                vec![],
                vec![mint(1, "2", 5, "alice"), mint(2, "1", 5, "bob"), mint(3, "5", 6, "bob")],
            ))
            .await
            .unwrap();
        filler.shutdown();
    }
    assert_eq!(mints::missing_mints(&db, CONTRACT, 100).await.unwrap(), 3);

    let (relay, _rx) = BroadcastRelay::new(8);
    let mut restarted = Filler::from_factory(
        config(false, 0),
        &factory(),
        Arc::new(db.clone()),
        chain_with(tokenconfigs("atomicassets"), 150),
        Arc::new(relay),
    )
    .unwrap();
    restarted.prepare().await.unwrap();

    assert_eq!(mints::missing_mints(&db, CONTRACT, 150).await.unwrap(), 0);
    assert_eq!(restarted.next_block(), 101);
    let assets = db.rows(ASSETS).await;
    assert_eq!(find(&assets, "asset_id", "1")["template_mint"], json!(1));
    assert_eq!(find(&assets, "asset_id", "5")["template_mint"], json!(1));
}

// ─── Startup ──────────────────────────────────────────────────────────────────

async fn prepare_error(rows: Vec<Value>) -> FillerError {
    let (relay, _rx) = BroadcastRelay::new(8);
    let mut filler = Filler::from_factory(
        config(false, 50_000),
        &factory(),
        Arc::new(MemoryDatabase::new()),
        chain_with(rows, 90),
        Arc::new(relay),
    )
    .unwrap();
    filler.prepare().await.unwrap_err()
}

#[tokio::test]
async fn init_rejects_missing_or_foreign_contract() {
    let err = prepare_error(vec![]).await;
    assert!(matches!(&err, FillerError::Configuration(m) if m.contains("tokenconfigs table empty")));

    let err = prepare_error(tokenconfigs("atomicmarket")).await;
    assert!(matches!(&err, FillerError::Configuration(m) if m.contains("not deployed")));
}

#[tokio::test]
async fn unknown_handler_is_a_configuration_error() {
    let unknown = FillerBuilder::new()
        .contract("delphioracle", json!({}))
        .build_config();
    let (relay, _rx) = BroadcastRelay::new(8);
    let err = Filler::from_factory(
        unknown,
        &factory(),
        Arc::new(MemoryDatabase::new()),
        chain_with(tokenconfigs("atomicassets"), 90),
        Arc::new(relay),
    )
    .err()
    .unwrap();
    assert!(matches!(err, FillerError::Configuration(_)));
}

#[tokio::test]
async fn config_row_is_bootstrapped_once() {
    let db = MemoryDatabase::new();
    let (filler, _rx) = prepared(&db, false).await;
    drop(filler);

    let stored = &db.rows("atomicassets_config").await[0];
    assert_eq!(stored["version"], json!("1.3.1"));
    assert_eq!(stored["collection_format"], json!([]));

    // A second start reads the stored row instead of the chain.
    let (relay, _rx) = BroadcastRelay::new(8);
    let mut again = Filler::from_factory(
        config(false, 50_000),
        &factory(),
        Arc::new(db.clone()),
        chain_with(vec![], 90),
        Arc::new(relay),
    )
    .unwrap();
    again.prepare().await.unwrap();
}
