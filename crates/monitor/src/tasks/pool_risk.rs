//! Live collateral risk of synthetic liquidity pools.
//!
//! Pipeline: resolve pool ids, fetch each pool's info, keep the options the
//! currency selector matches, then for every option recombine position, ratio
//! and oracle price into a fresh [`PoolRiskSnapshot`] whenever any of them
//! changes.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chain_guardian_domain::{
    model::{
        CurrencySelector, PoolId, PoolInfo, PoolRiskSnapshot, PoolSelector, SyntheticPosition,
        SyntheticRatio,
    },
    schema::string_or_list,
    ArgumentSchema, FieldKind, FieldSpec, FixedPoint, SourceError, SourceResult,
    ValidationError,
};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    combine::{close_as_failure, combine_latest3},
    context::SyntheticPoolSource,
    task::{RecordStream, StartTask, Task},
};

pub const DEFAULT_PERIOD_MS: u64 = 30_000;

/// Liquidation threshold assumed when a currency has none set: 0.05% of one.
const DEFAULT_LIQUIDATION_INNER: i64 = 500_000_000_000_000;

const ALL: &str = "all";
const SYNTHETIC_TOKENS: &str = "fTokens";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRiskTask {
    pool: PoolSelector,
    currency: CurrencySelector,
    period: Duration,
}

impl PoolRiskTask {
    pub fn pool(&self) -> &PoolSelector {
        &self.pool
    }

    pub fn currency(&self) -> &CurrencySelector {
        &self.currency
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Task for PoolRiskTask {
    const NAME: &'static str = "synthetic.poolRisk";

    type Output = PoolRiskSnapshot;

    fn validation_schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .field(FieldSpec::required(
                "poolId",
                FieldKind::OneOf(vec![
                    FieldKind::Literal(ALL),
                    FieldKind::String,
                    FieldKind::StringList,
                ]),
            ))
            .field(FieldSpec::required(
                "currencyId",
                FieldKind::OneOf(vec![
                    FieldKind::Literal(ALL),
                    FieldKind::Literal(SYNTHETIC_TOKENS),
                    FieldKind::String,
                    FieldKind::StringList,
                ]),
            ))
            .field(
                FieldSpec::optional("period", FieldKind::Integer { min: 1 })
                    .with_default(json!(DEFAULT_PERIOD_MS)),
            )
    }

    fn from_arguments(arguments: Map<String, Value>) -> Result<Self, ValidationError> {
        let pool = match arguments.get("poolId") {
            Some(Value::String(id)) if id == ALL => PoolSelector::All,
            Some(value) => PoolSelector::Ids(
                string_or_list(value)
                    .ok_or_else(|| ValidationError::new("poolId", "must be an id or list"))?,
            ),
            None => return Err(ValidationError::new("poolId", "is required")),
        };
        let currency = match arguments.get("currencyId") {
            Some(Value::String(id)) if id == ALL => CurrencySelector::All,
            Some(Value::String(id)) if id == SYNTHETIC_TOKENS => CurrencySelector::SyntheticTokens,
            Some(value) => CurrencySelector::Ids(
                string_or_list(value)
                    .ok_or_else(|| ValidationError::new("currencyId", "must be an id or list"))?,
            ),
            None => return Err(ValidationError::new("currencyId", "is required")),
        };
        let period = arguments
            .get("period")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_PERIOD_MS);

        Ok(Self {
            pool,
            currency,
            period: Duration::from_millis(period),
        })
    }
}

impl<C: SyntheticPoolSource> StartTask<C> for PoolRiskTask {
    fn start(&self, context: Arc<C>) -> RecordStream<PoolRiskSnapshot> {
        let currency = Arc::new(self.currency.clone());
        let period = self.period;

        resolve_pool_ids(&self.pool, context.as_ref())
            .flat_map_unordered(None, move |pool_id| match pool_id {
                Ok(pool_id) => watch_pool(context.clone(), pool_id, currency.clone(), period),
                Err(err) => stream::iter([Err(err)]).boxed(),
            })
            .boxed()
    }
}

/// Finite, ordered ids for an explicit selector; the deduplicated live
/// listing for `all`.
fn resolve_pool_ids<C: SyntheticPoolSource>(
    selector: &PoolSelector,
    context: &C,
) -> RecordStream<PoolId> {
    match selector {
        PoolSelector::Ids(ids) => stream::iter(ids.clone().into_iter().map(Ok)).boxed(),
        PoolSelector::All => {
            let mut seen = HashSet::new();
            close_as_failure("pool ids", context.pool_ids())
                .flat_map(move |listing| {
                    let batch: Vec<SourceResult<PoolId>> = match listing {
                        Ok(ids) => ids
                            .into_iter()
                            .filter(|id| seen.insert(id.clone()))
                            .map(Ok)
                            .collect(),
                        Err(err) => vec![Err(err)],
                    };
                    stream::iter(batch)
                })
                .boxed()
        }
    }
}

fn watch_pool<C: SyntheticPoolSource>(
    context: Arc<C>,
    pool_id: PoolId,
    currency: Arc<CurrencySelector>,
    period: Duration,
) -> RecordStream<PoolRiskSnapshot> {
    let lookup = context.clone();
    let lookup_id = pool_id.clone();

    stream::once(async move { lookup.pool_info(&lookup_id).await })
        .flat_map(move |info| match info {
            Ok(Some(info)) => {
                let units: Vec<_> = project_options(&pool_id, &info, &currency)
                    .into_iter()
                    .map(|snapshot| watch_risk(context.clone(), snapshot, period))
                    .collect();
                stream::select_all(units).boxed()
            }
            Ok(None) => {
                debug!(pool_id = %pool_id, "pool has no info; skipping");
                stream::empty().boxed()
            }
            Err(err) => stream::iter([Err(err)]).boxed(),
        })
        .boxed()
}

/// Initial snapshots for the options `currency` keeps, in pool order.
pub fn project_options(
    pool_id: &str,
    info: &PoolInfo,
    currency: &CurrencySelector,
) -> Vec<PoolRiskSnapshot> {
    info.options
        .iter()
        .filter(|option| currency.matches(&option.currency_id))
        .map(|option| PoolRiskSnapshot::from_option(pool_id, info, option))
        .collect()
}

fn watch_risk<C: SyntheticPoolSource>(
    context: Arc<C>,
    base: PoolRiskSnapshot,
    period: Duration,
) -> RecordStream<PoolRiskSnapshot> {
    let position = context.position(&base.pool_id, &base.currency_id);
    let ratio = context.ratio(&base.currency_id);
    let price = context.price(&base.currency_id, period);

    combine_latest3(("position", position), ("ratio", ratio), ("price", price))
        .filter_map(move |latest| {
            let outcome = match latest {
                Ok((position, ratio, price)) => {
                    recompute_risk(&base, &position, &ratio, &price).transpose()
                }
                Err(err) => Some(Err(err)),
            };
            futures_util::future::ready(outcome)
        })
        .boxed()
}

pub fn default_liquidation() -> FixedPoint {
    FixedPoint::from_integer(DEFAULT_LIQUIDATION_INNER)
}

/// Derives a new snapshot from the latest position, ratio and price.
///
/// Zero synthetic debt yields `base` unchanged. A price that makes the
/// synthetic value zero leaves the ratio unbounded; that update is skipped.
pub fn recompute_risk(
    base: &PoolRiskSnapshot,
    position: &SyntheticPosition,
    ratio: &SyntheticRatio,
    price: &FixedPoint,
) -> SourceResult<Option<PoolRiskSnapshot>> {
    let one = FixedPoint::one();
    let synthetic = parse_amount("synthetic", &position.synthetic)?;
    if synthetic.is_zero() {
        return Ok(Some(base.clone()));
    }

    let liquidation = match &ratio.liquidation {
        Some(raw) => FixedPoint::from_per_million(&parse_amount("liquidation", raw)?),
        None => default_liquidation(),
    };
    let collateral = parse_amount("collateral", &position.collateral)?;

    let synthetic_value = price.mul(&synthetic).div(&one)?;
    if synthetic_value.is_zero() {
        warn!(
            pool_id = %base.pool_id,
            currency_id = %base.currency_id,
            "synthetic value is zero; skipping risk update"
        );
        return Ok(None);
    }

    let collateral_ratio = collateral.div(&synthetic_value)?;
    let safe_ratio = FixedPoint::from_integer(1).add(&liquidation.div(&one)?);
    let is_safe = collateral_ratio.gt(&safe_ratio);

    Ok(Some(PoolRiskSnapshot {
        collateral_ratio: collateral_ratio.to_string(),
        synthetic_issuance: position.synthetic.clone(),
        collateral_balance: position.collateral.clone(),
        is_safe,
        ..base.clone()
    }))
}

fn parse_amount(field: &str, raw: &str) -> SourceResult<FixedPoint> {
    FixedPoint::parse(raw).map_err(|err| SourceError::Decode(format!("{field}: {err}")))
}
