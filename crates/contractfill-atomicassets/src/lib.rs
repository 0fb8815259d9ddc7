//! contractfill-atomicassets: AtomicAssets contract module.
//!
//! Mirrors the on-chain state of an AtomicAssets deployment (collections,
//! schemas, templates, assets, backed tokens, balances and offers) plus
//! optional transfer, move and action-log history.
//!
//! ```text
//! Config → Balances → Collections → Schemas → Templates
//!        → MintAsset (buffered, flushed by tier hook)
//!        → UpdateAsset → CreateOffer → UpdateOffer → Logs
//! ```
//!
//! # Usage
//! ```rust,no_run
//! use contractfill_core::HandlerFactory;
//!
//! let factory = contractfill_atomicassets::register(HandlerFactory::new());
//! assert!(factory.names().contains(&"atomicassets".to_string()));
//! ```

pub mod config;
pub mod decoder;
pub mod handler;
pub mod mints;
pub mod processors;
pub mod schema;
pub mod tier;
pub mod types;
pub mod utils;

pub use config::{AtomicConfig, ConfigCache};
pub use decoder::{AttributeDecoder, JsonAttributeDecoder};
pub use handler::{AtomicAssetsArgs, AtomicAssetsHandler, HANDLER_NAME};
pub use tier::{AtomicAssetsTier, OfferState};

use contractfill_core::HandlerFactory;

/// Add the `atomicassets` constructor to `factory`.
pub fn register(factory: HandlerFactory) -> HandlerFactory {
    factory.with(HANDLER_NAME, AtomicAssetsHandler::from_args)
}
