//! Subscription primitives a guardian's connection context exposes to tasks.
//!
//! Every live method returns an independent, possibly infinite sequence that
//! yields the latest value whenever it changes. An `Err` item is terminal for
//! that sequence.

use std::time::Duration;

use async_trait::async_trait;
use chain_guardian_domain::{
    model::{PoolId, PoolInfo, SyntheticPosition, SyntheticRatio},
    FixedPoint, SourceResult,
};
use futures_util::stream::BoxStream;

pub type LiveStream<T> = BoxStream<'static, SourceResult<T>>;

#[async_trait]
pub trait SyntheticPoolSource: Send + Sync + 'static {
    /// Current listing of pool ids, re-emitted when it changes.
    fn pool_ids(&self) -> LiveStream<Vec<PoolId>>;

    /// One-shot lookup; `None` when the pool has no info on chain.
    async fn pool_info(&self, pool_id: &str) -> SourceResult<Option<PoolInfo>>;

    fn position(&self, pool_id: &str, currency_id: &str) -> LiveStream<SyntheticPosition>;

    fn ratio(&self, currency_id: &str) -> LiveStream<SyntheticRatio>;

    /// Oracle price in the `10^18` base, refreshed every `period`.
    fn price(&self, currency_id: &str, period: Duration) -> LiveStream<FixedPoint>;
}

pub trait BalanceSource: Send + Sync + 'static {
    /// Free balance of `account` in `currency_id`, raw integer string.
    fn balance(&self, account: &str, currency_id: &str) -> LiveStream<String>;
}
