//! JSON-RPC polling connection context.
//!
//! Each live source polls one method and emits only when the decoded value
//! differs from the last one emitted. Transport failures are retried with
//! capped exponential backoff; anything left after that ends the source.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chain_guardian_domain::{
    config::{Confirmation, GuardianConfig},
    model::{PoolId, PoolInfo, SyntheticPosition, SyntheticRatio},
    FixedPoint, SourceError, SourceResult, ValidationError,
};
use futures_util::stream::{self, StreamExt};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{BalanceSource, LiveStream, SyntheticPoolSource};

mod types;

pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Capped exponential backoff between attempts of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node answered with HTTP {0}")]
    Status(u16),
    #[error("node error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("{0}")]
    Decode(String),
}

impl RpcError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Remote { .. } | Self::Decode(_) => false,
        }
    }
}

impl From<RpcError> for SourceError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Decode(message) => SourceError::Decode(message),
            other => SourceError::Rpc(other.to_string()),
        }
    }
}

struct ClientInner {
    http: reqwest::Client,
    endpoint: String,
    at: &'static str,
    poll_interval: Duration,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to one node endpoint.
#[derive(Clone)]
pub struct RpcChainClient {
    inner: Arc<ClientInner>,
}

/// Accepts absolute `http`/`https` URLs with a host.
pub fn validate_endpoint(endpoint: Option<&str>) -> Result<String, ValidationError> {
    let raw = endpoint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ValidationError::new("nodeEndpoint", "is required"))?;
    let url = reqwest::Url::parse(raw)
        .map_err(|err| ValidationError::new("nodeEndpoint", format!("must be a URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ValidationError::new(
            "nodeEndpoint",
            "must be an http or https URL",
        ));
    }
    Ok(raw.to_string())
}

impl RpcChainClient {
    pub fn new(endpoint: &str, config: &GuardianConfig) -> Result<Self, ValidationError> {
        let endpoint = validate_endpoint(Some(endpoint))?;
        let at = match config.confirmation {
            Confirmation::Finalize => "finalized",
            Confirmation::Instant => "best",
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                http: reqwest::Client::new(),
                endpoint,
                at,
                poll_interval: config.poll_interval(),
                retry: RetryPolicy::new(config.max_retries),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(ClientInner {
                http: inner.http.clone(),
                endpoint: inner.endpoint.clone(),
                at: inner.at,
                poll_interval: inner.poll_interval,
                retry,
                next_id: AtomicU64::new(inner.next_id.load(Ordering::Relaxed)),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Issues `method` with `params` plus the confirmation marker, retrying
    /// transport failures per the client's policy.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &Map<String, Value>,
    ) -> SourceResult<T> {
        let mut attempt = 0;
        loop {
            match self.call_once(method, params).await {
                Ok(value) => {
                    counter!("rpc_calls_total", "method" => method, "result" => "ok").increment(1);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.inner.retry.max_retries => {
                    attempt += 1;
                    let delay = self.inner.retry.delay(attempt);
                    counter!("rpc_calls_total", "method" => method, "result" => "retry")
                        .increment(1);
                    warn!(method, attempt, ?delay, %err, "rpc call failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    counter!("rpc_calls_total", "method" => method, "result" => "error")
                        .increment(1);
                    return Err(err.into());
                }
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Map<String, Value>,
    ) -> Result<T, RpcError> {
        let mut params = params.clone();
        params.insert("at".to_string(), Value::from(self.inner.at));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, &params);

        let response = self
            .inner
            .http
            .post(&self.inner.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| RpcError::Decode(format!("{method}: {err}")))?;
        if let Some(error) = body.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(body.result)
            .map_err(|err| RpcError::Decode(format!("{method}: {err}")))
    }

    fn watch<T, U>(
        &self,
        method: &'static str,
        params: Map<String, Value>,
        interval: Duration,
        project: fn(T) -> SourceResult<Option<U>>,
    ) -> LiveStream<U>
    where
        T: DeserializeOwned + Send + 'static,
        U: Clone + PartialEq + Send + 'static,
    {
        let poller = Arc::new(Poller {
            client: self.clone(),
            method,
            params,
            interval,
            project,
        });
        stream::unfold(Some(WatchState::new(poller)), |state| async move {
            let mut state = state?;
            let outcome = state.next_change().await;
            match outcome {
                Ok(value) => Some((Ok(value), Some(state))),
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }
}

struct Poller<T, U> {
    client: RpcChainClient,
    method: &'static str,
    params: Map<String, Value>,
    interval: Duration,
    project: fn(T) -> SourceResult<Option<U>>,
}

struct WatchState<T, U> {
    poller: Arc<Poller<T, U>>,
    last: Option<U>,
    polled: bool,
}

impl<T: DeserializeOwned, U: Clone + PartialEq> WatchState<T, U> {
    fn new(poller: Arc<Poller<T, U>>) -> Self {
        Self {
            poller,
            last: None,
            polled: false,
        }
    }

    /// Polls until the projected value differs from the last emission.
    async fn next_change(&mut self) -> SourceResult<U> {
        loop {
            if self.polled {
                tokio::time::sleep(self.poller.interval).await;
            }
            self.polled = true;

            let raw = self
                .poller
                .client
                .call::<T>(self.poller.method, &self.poller.params)
                .await?;
            match (self.poller.project)(raw)? {
                Some(value) if self.last.as_ref() != Some(&value) => {
                    self.last = Some(value.clone());
                    return Ok(value);
                }
                _ => debug!(method = self.poller.method, "no change"),
            }
        }
    }
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::from(value)))
        .collect()
}

fn keep<T>(value: T) -> SourceResult<Option<T>> {
    Ok(Some(value))
}

/// Pool ids come back as numbers or strings depending on the node.
fn decode_pool_ids(raw: Vec<Value>) -> SourceResult<Option<Vec<PoolId>>> {
    raw.into_iter()
        .map(|id| match id {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            other => Err(SourceError::Decode(format!("unexpected pool id {other}"))),
        })
        .collect::<SourceResult<Vec<_>>>()
        .map(Some)
}

/// `null` means the oracle has no price yet; nothing is emitted.
fn decode_price(raw: Option<Value>) -> SourceResult<Option<FixedPoint>> {
    let text = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) => text,
        Some(Value::Number(number)) => number.to_string(),
        Some(other) => return Err(SourceError::Decode(format!("unexpected price {other}"))),
    };
    FixedPoint::parse(&text)
        .map(Some)
        .map_err(|err| SourceError::Decode(format!("price: {err}")))
}

#[async_trait]
impl SyntheticPoolSource for RpcChainClient {
    fn pool_ids(&self) -> LiveStream<Vec<PoolId>> {
        self.watch(
            "syntheticPools_poolIds",
            Map::new(),
            self.poll_interval(),
            decode_pool_ids,
        )
    }

    async fn pool_info(&self, pool_id: &str) -> SourceResult<Option<PoolInfo>> {
        self.call("syntheticPools_poolInfo", &params([("poolId", pool_id)]))
            .await
    }

    fn position(&self, pool_id: &str, currency_id: &str) -> LiveStream<SyntheticPosition> {
        self.watch(
            "syntheticTokens_position",
            params([("poolId", pool_id), ("currencyId", currency_id)]),
            self.poll_interval(),
            keep::<SyntheticPosition>,
        )
    }

    fn ratio(&self, currency_id: &str) -> LiveStream<SyntheticRatio> {
        self.watch(
            "syntheticTokens_ratio",
            params([("currencyId", currency_id)]),
            self.poll_interval(),
            keep::<SyntheticRatio>,
        )
    }

    fn price(&self, currency_id: &str, period: Duration) -> LiveStream<FixedPoint> {
        self.watch(
            "oracle_price",
            params([("currencyId", currency_id)]),
            period,
            decode_price,
        )
    }
}

impl BalanceSource for RpcChainClient {
    fn balance(&self, account: &str, currency_id: &str) -> LiveStream<String> {
        self.watch(
            "tokens_balance",
            params([("account", account), ("currencyId", currency_id)]),
            self.poll_interval(),
            keep::<String>,
        )
    }
}
