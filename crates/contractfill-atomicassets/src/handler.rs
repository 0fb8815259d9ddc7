//! The AtomicAssets contract module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use contractfill_core::row::row_from;
use contractfill_core::{
    job_fn, Block, ContractHandler, ContractSchema, Database, Destructor, FillerError, Filter,
    InitContext, JobPriority, NaturalKey, Query, RegisterContext,
};

use crate::config::{AtomicConfig, ConfigCache};
use crate::decoder::{AttributeDecoder, JsonAttributeDecoder};
use crate::mints::{self, MINT_UPDATE_BATCH};
use crate::processors;
use crate::schema::{self, CONFIG, TOKENS};
use crate::types::{Format, SupportedToken, TokenConfigsTableRow};

pub const HANDLER_NAME: &str = "atomicassets";

pub const UPDATE_MINTS_JOB: &str = "update_atomicassets_mints";
pub const AGGREGATE_COUNTS_JOB: &str = "aggregate atomicassets_asset_counts";

const UPDATE_MINTS_INTERVAL: Duration = Duration::from_secs(30);
const AGGREGATE_COUNTS_INTERVAL: Duration = Duration::from_secs(600);

/// Construction arguments from the reader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicAssetsArgs {
    pub atomicassets_account: String,
    /// Keep `atomicassets_transfers` / `atomicassets_moves` history.
    #[serde(default)]
    pub store_transfers: bool,
    /// Keep per-action logs in `atomicassets_logs`.
    #[serde(default)]
    pub store_logs: bool,
}

impl AtomicAssetsArgs {
    pub fn from_value(args: &Value) -> Result<Self, FillerError> {
        if !args.get("atomicassets_account").is_some_and(Value::is_string) {
            return Err(FillerError::Configuration(
                "atomicassets: argument missing in atomicassets handler: atomicassets_account".into(),
            ));
        }
        serde_json::from_value(args.clone())
            .map_err(|e| FillerError::Configuration(format!("atomicassets: invalid arguments: {e}")))
    }
}

pub struct AtomicAssetsHandler {
    args: AtomicAssetsArgs,
    cache: ConfigCache,
    decoder: Arc<dyn AttributeDecoder>,
}

impl AtomicAssetsHandler {
    pub fn new(args: AtomicAssetsArgs) -> Self {
        if !args.store_logs {
            warn!(contract = %args.atomicassets_account, "atomicassets: disabled store_logs");
        }
        if !args.store_transfers {
            warn!(contract = %args.atomicassets_account, "atomicassets: disabled store_transfers");
        }
        Self {
            args,
            cache: ConfigCache::new(),
            decoder: Arc::new(JsonAttributeDecoder),
        }
    }

    /// Use `decoder` for serialized collection and template data.
    pub fn with_decoder(mut self, decoder: Arc<dyn AttributeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// [`HandlerFactory`](contractfill_core::HandlerFactory) constructor.
    pub fn from_args(args: &Value) -> Result<Arc<dyn ContractHandler>, FillerError> {
        Ok(Arc::new(Self::new(AtomicAssetsArgs::from_value(args)?)))
    }

    pub fn args(&self) -> &AtomicAssetsArgs {
        &self.args
    }

    pub fn contract(&self) -> &str {
        &self.args.atomicassets_account
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    pub fn decoder(&self) -> &dyn AttributeDecoder {
        self.decoder.as_ref()
    }

    /// Read the committed configuration of this contract from storage.
    async fn load_config(&self, db: &dyn Database) -> Result<Option<AtomicConfig>, FillerError> {
        let contract = self.contract();
        let mut tx = db.begin().await?;
        let row = tx.get(CONFIG, &NaturalKey(vec![json!(contract)])).await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let tokens = tx
            .select(TOKENS, &Query::new(Filter::new().eq("contract", contract)))
            .await?;
        tx.rollback().await?;

        let collection_format: Vec<Format> = match row.get("collection_format") {
            Some(Value::Null) | None => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())?,
        };
        let supported_tokens = tokens
            .into_iter()
            .map(|(_, token)| SupportedToken {
                contract: text(&token, "token_contract"),
                sym: format!(
                    "{},{}",
                    token.get("token_precision").and_then(Value::as_u64).unwrap_or(0),
                    text(&token, "token_symbol")
                ),
            })
            .collect();
        Ok(Some(AtomicConfig {
            version: text(&row, "version"),
            collection_format,
            supported_tokens,
        }))
    }

    /// Create the config row from the contract's `tokenconfigs` table.
    async fn bootstrap_config(&self, ctx: &InitContext<'_>) -> Result<AtomicConfig, FillerError> {
        let contract = self.contract();
        let rows = ctx.chain.get_table_rows(contract, contract, "tokenconfigs").await?;
        let first = rows.first().ok_or_else(|| {
            FillerError::Configuration(format!("atomicassets: tokenconfigs table empty on '{contract}'"))
        })?;
        let tokenconfigs: TokenConfigsTableRow = serde_json::from_value(first.clone())?;
        if tokenconfigs.standard != "atomicassets" {
            return Err(FillerError::Configuration(format!(
                "atomicassets: contract not deployed on the account '{contract}'"
            )));
        }

        let mut tx = ctx.db.begin().await?;
        let row = row_from(json!({
            "contract": contract,
            "version": tokenconfigs.version,
            "collection_format": [],
        }))?;
        tx.put(CONFIG, &NaturalKey(vec![json!(contract)]), row).await?;
        tx.commit().await?;
        info!(contract, version = %tokenconfigs.version, "atomicassets config created");

        Ok(AtomicConfig {
            version: tokenconfigs.version,
            ..Default::default()
        })
    }
}

fn text(row: &contractfill_core::Row, column: &str) -> String {
    row.get(column)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ContractHandler for AtomicAssetsHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    fn account(&self) -> &str {
        self.contract()
    }

    fn schema(&self) -> ContractSchema {
        ContractSchema {
            sentinel_table: CONFIG.to_string(),
            tables: schema::tables(),
            views: schema::views(),
            procedures: schema::procedures(),
            owner_column: "contract".to_string(),
        }
    }

    async fn init(&self, ctx: &InitContext<'_>) -> Result<(), FillerError> {
        let config = match self.load_config(ctx.db).await? {
            Some(config) => config,
            None => self.bootstrap_config(ctx).await?,
        };
        self.cache.reset(config);

        let contract = self.contract();
        let last_irreversible = ctx.last_irreversible;
        info!(contract, last_irreversible, "checking for missing asset mints");

        let batch = usize::try_from(ctx.reconcile_threshold.max(1)).unwrap_or(usize::MAX);
        let mut missing = mints::missing_mints(ctx.db, contract, last_irreversible).await?;
        while missing > ctx.reconcile_threshold {
            let updated = mints::update_mints(ctx.db, contract, last_irreversible, batch).await?;
            info!(contract, missing, updated, "filled missing asset mints");
            if updated == 0 {
                warn!(contract, missing, "mint backfill made no progress, continuing startup");
                break;
            }
            missing = mints::missing_mints(ctx.db, contract, last_irreversible).await?;
        }
        Ok(())
    }

    fn register(self: Arc<Self>, ctx: &RegisterContext<'_>) -> Result<Destructor, FillerError> {
        let mut destructor = Destructor::noop();
        destructor.push(processors::config::register(&self, ctx.processor));
        destructor.push(processors::balances::register(&self, ctx.processor));
        destructor.push(processors::collections::register(&self, ctx.processor));
        destructor.push(processors::schemas::register(&self, ctx.processor));
        destructor.push(processors::templates::register(&self, ctx.processor));
        destructor.push(processors::assets::register(&self, ctx.processor));
        destructor.push(processors::offers::register(&self, ctx.processor));
        if self.args.store_logs {
            destructor.push(processors::logs::register(&self, ctx.processor));
        }

        let db = Arc::clone(&ctx.db);
        let contract = self.contract().to_string();
        destructor.push(ctx.jobs.add(
            AGGREGATE_COUNTS_JOB,
            AGGREGATE_COUNTS_INTERVAL,
            JobPriority::Low,
            job_fn(move || {
                let db = Arc::clone(&db);
                let contract = contract.clone();
                async move {
                    mints::aggregate_asset_counts(db.as_ref(), &contract).await?;
                    Ok(())
                }
            }),
        )?);

        let db = Arc::clone(&ctx.db);
        let contract = self.contract().to_string();
        let progress = ctx.progress.clone();
        destructor.push(ctx.jobs.add(
            UPDATE_MINTS_JOB,
            UPDATE_MINTS_INTERVAL,
            JobPriority::Medium,
            job_fn(move || {
                let db = Arc::clone(&db);
                let contract = contract.clone();
                let last_irreversible = progress.last_irreversible();
                async move {
                    mints::update_mints(db.as_ref(), &contract, last_irreversible, MINT_UPDATE_BATCH)
                        .await?;
                    Ok(())
                }
            }),
        )?);

        info!(contract = self.contract(), store_logs = self.args.store_logs, "atomicassets handlers registered");
        Ok(destructor)
    }

    fn committed(&self, block: &Block) {
        self.cache.promote(block.block_num);
    }

    async fn reload(&self, db: &dyn Database) -> Result<(), FillerError> {
        let config = self.load_config(db).await?.unwrap_or_default();
        self.cache.reset(config);
        Ok(())
    }
}
