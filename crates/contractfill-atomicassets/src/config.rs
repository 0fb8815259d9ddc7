//! In-memory copy of a contract's configuration.
//!
//! The cache holds the committed configuration plus at most one staged copy
//! written by the block in flight. Handlers read through
//! [`ConfigCache::current`], so later tiers of the same block see the staged
//! values. The staged copy becomes committed when its block commits and is
//! dropped when the block aborts or a fork rolls it back.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Format, SupportedToken};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicConfig {
    pub version: String,
    pub collection_format: Vec<Format>,
    pub supported_tokens: Vec<SupportedToken>,
}

#[derive(Debug, Default)]
struct CacheState {
    committed: AtomicConfig,
    /// `(block_num, config)` written by an uncommitted block.
    staged: Option<(u64, AtomicConfig)>,
}

#[derive(Debug, Default)]
pub struct ConfigCache {
    state: RwLock<CacheState>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The staged configuration if a block wrote one, else the committed one.
    pub fn current(&self) -> AtomicConfig {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &state.staged {
            Some((_, config)) => config.clone(),
            None => state.committed.clone(),
        }
    }

    pub fn committed(&self) -> AtomicConfig {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .committed
            .clone()
    }

    /// Apply `update` on top of [`current`](Self::current) for `block_num`.
    pub fn stage(&self, block_num: u64, update: impl FnOnce(&mut AtomicConfig)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = match state.staged.take() {
            Some((_, config)) => config,
            None => state.committed.clone(),
        };
        update(&mut next);
        state.staged = Some((block_num, next));
    }

    /// Promote the copy staged by `block_num`, if any.
    pub fn promote(&self, block_num: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(state.staged, Some((staged, _)) if staged == block_num) {
            if let Some((_, config)) = state.staged.take() {
                debug!(block = block_num, "config cache promoted");
                state.committed = config;
            }
        }
    }

    /// Replace everything with `config` read from storage.
    pub fn reset(&self, config: AtomicConfig) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.staged = None;
        state.committed = config;
    }

    pub fn has_staged(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .staged
            .is_some()
    }
}
