//! Chain-state value types, derived records and action specs shared by the
//! monitor tasks and the connection-context providers.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub type PoolId = String;
pub type CurrencyId = String;

/// Static parameters of a synthetic liquidity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub owner: String,
    /// Liquidity held by the pool, raw `10^18` integer string.
    pub balance: String,
    #[serde(default)]
    pub options: Vec<PoolOption>,
}

/// One currency a pool offers synthetic issuance for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOption {
    pub currency_id: CurrencyId,
    #[serde(default)]
    pub bid_spread: Option<String>,
    #[serde(default)]
    pub ask_spread: Option<String>,
    #[serde(default)]
    pub additional_collateral_ratio: Option<String>,
    #[serde(default)]
    pub synthetic_enabled: bool,
}

/// Synthetic debt and backing collateral of one (pool, currency) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticPosition {
    pub synthetic: String,
    pub collateral: String,
}

/// Risk parameters of a synthetic currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticRatio {
    /// Parts-per-million liquidation threshold; `None` when unset on chain.
    #[serde(default)]
    pub liquidation: Option<String>,
}

/// Live risk view of one pool option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRiskSnapshot {
    pub pool_id: PoolId,
    pub currency_id: CurrencyId,
    pub owner: String,
    pub liquidity: String,
    pub bid_spread: Option<String>,
    pub ask_spread: Option<String>,
    pub additional_collateral_ratio: Option<String>,
    pub enabled: bool,
    pub collateral_ratio: String,
    pub synthetic_issuance: String,
    pub collateral_balance: String,
    pub is_safe: bool,
}

impl PoolRiskSnapshot {
    /// Initial record for an option before any position/price is known.
    pub fn from_option(pool_id: &str, info: &PoolInfo, option: &PoolOption) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            currency_id: option.currency_id.clone(),
            owner: info.owner.clone(),
            liquidity: info.balance.clone(),
            bid_spread: option.bid_spread.clone(),
            ask_spread: option.ask_spread.clone(),
            additional_collateral_ratio: option.additional_collateral_ratio.clone(),
            enabled: option.synthetic_enabled,
            collateral_ratio: "0".to_string(),
            synthetic_issuance: "0".to_string(),
            collateral_balance: "0".to_string(),
            is_safe: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: String,
    pub currency: CurrencyId,
    pub free: String,
}

/// Which pools a task watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSelector {
    All,
    Ids(Vec<PoolId>),
}

/// Which pool options a task keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrencySelector {
    All,
    /// Synthetic tokens, i.e. currency ids starting with `f`/`F`.
    SyntheticTokens,
    Ids(Vec<CurrencyId>),
}

impl CurrencySelector {
    pub fn matches(&self, currency: &str) -> bool {
        match self {
            Self::All => true,
            Self::SyntheticTokens => currency
                .chars()
                .next()
                .is_some_and(|c| c.eq_ignore_ascii_case(&'f')),
            Self::Ids(ids) => ids.iter().any(|id| id == currency),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ActionMethod {
    #[strum(serialize = "POST")]
    #[serde(rename = "POST")]
    Post,
    #[strum(serialize = "log")]
    #[serde(rename = "log")]
    Log,
}

/// What to do with every emitted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub method: ActionMethod,
    /// URL for `POST`, log label for `log`.
    pub target: String,
}
