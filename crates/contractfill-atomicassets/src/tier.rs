//! Dispatch tiers and offer states.

use contractfill_core::Tier;
use serde::{Deserialize, Serialize};

/// Band of the AtomicAssets module. Modules reading its rows use a higher one.
pub const ATOMICASSETS_BAND: u32 = 10;

/// Processing order inside one block. Each variant's handlers see every row
/// written by the variants before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AtomicAssetsTier {
    Config,
    Balances,
    Collections,
    Schemas,
    Templates,
    MintAsset,
    UpdateAsset,
    CreateOffer,
    UpdateOffer,
    Logs,
}

impl AtomicAssetsTier {
    pub const ALL: [Self; 10] = [
        Self::Config,
        Self::Balances,
        Self::Collections,
        Self::Schemas,
        Self::Templates,
        Self::MintAsset,
        Self::UpdateAsset,
        Self::CreateOffer,
        Self::UpdateOffer,
        Self::Logs,
    ];

    pub const fn tier(self) -> Tier {
        Tier::new(ATOMICASSETS_BAND, self as u32)
    }
}

impl From<AtomicAssetsTier> for Tier {
    fn from(tier: AtomicAssetsTier) -> Self {
        tier.tier()
    }
}

/// Lifecycle of a trade offer, stored as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OfferState {
    Pending = 0,
    Invalid = 1,
    Unknown = 2,
    Accepted = 3,
    Declined = 4,
    Cancelled = 5,
}

impl From<OfferState> for u8 {
    fn from(state: OfferState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for OfferState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Pending,
            1 => Self::Invalid,
            2 => Self::Unknown,
            3 => Self::Accepted,
            4 => Self::Declined,
            5 => Self::Cancelled,
            other => return Err(format!("unknown offer state {other}")),
        })
    }
}
