//! Built-in monitor tasks.

mod balance;
mod pool_risk;

pub use balance::BalanceTask;
pub use pool_risk::{default_liquidation, project_options, recompute_risk, PoolRiskTask};
