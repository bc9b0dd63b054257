//! In-memory chain sources and a recording dispatcher for unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chain_guardian_domain::{
    config::GuardianConfig,
    model::{ActionSpec, PoolId, PoolInfo, SyntheticPosition, SyntheticRatio},
    FixedPoint, SourceError, SourceResult, ValidationError,
};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::{
    action::{ActionDispatcher, DispatchScope},
    context::{BalanceSource, LiveStream, SyntheticPoolSource},
    guardian::{GuardianError, Network},
    task::TaskTable,
    tasks::{BalanceTask, PoolRiskTask},
};

struct Slot<T> {
    sender: mpsc::UnboundedSender<SourceResult<T>>,
    receiver: Option<mpsc::UnboundedReceiver<SourceResult<T>>>,
}

/// Keyed live feed. Values pushed before anyone subscribes are buffered;
/// each key has a single subscriber.
pub struct Feed<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Send + 'static> Feed<T> {
    fn with_slot<R>(&self, key: &str, f: impl FnOnce(&mut Slot<T>) -> R) -> R {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(key.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            Slot {
                sender,
                receiver: Some(receiver),
            }
        });
        f(slot)
    }

    pub fn push(&self, key: &str, value: T) {
        let _ = self.with_slot(key, |slot| slot.sender.send(Ok(value)));
    }

    pub fn fail(&self, key: &str, err: SourceError) {
        let _ = self.with_slot(key, |slot| slot.sender.send(Err(err)));
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.with_slot(key, |slot| slot.receiver.is_none())
    }

    /// True once the key was subscribed and that subscription was dropped.
    pub fn is_released(&self, key: &str) -> bool {
        self.with_slot(key, |slot| slot.receiver.is_none() && slot.sender.is_closed())
    }

    pub fn subscribe(&self, key: &str) -> LiveStream<T> {
        match self.with_slot(key, |slot| slot.receiver.take()) {
            Some(receiver) => stream::unfold(Some(receiver), |state| async move {
                let mut receiver = state?;
                match receiver.recv().await? {
                    Ok(value) => Some((Ok(value), Some(receiver))),
                    Err(err) => Some((Err(err), None)),
                }
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}

#[derive(Default)]
pub struct MockChainInner {
    pub pool_ids: Feed<Vec<PoolId>>,
    pub pools: Mutex<HashMap<PoolId, PoolInfo>>,
    pub positions: Feed<SyntheticPosition>,
    pub ratios: Feed<SyntheticRatio>,
    pub prices: Feed<FixedPoint>,
    pub balances: Feed<String>,
    pub price_periods: Mutex<Vec<Duration>>,
}

/// Cheaply cloneable handle so tests keep feeding a context the guardian owns.
#[derive(Clone, Default)]
pub struct MockChain {
    inner: Arc<MockChainInner>,
}

impl std::ops::Deref for MockChain {
    type Target = MockChainInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl MockChain {
    pub fn insert_pool(&self, pool_id: &str, info: PoolInfo) {
        self.pools.lock().unwrap().insert(pool_id.to_string(), info);
    }

    pub fn position_key(pool_id: &str, currency_id: &str) -> String {
        format!("{pool_id}/{currency_id}")
    }

    pub fn balance_key(account: &str, currency_id: &str) -> String {
        format!("{account}/{currency_id}")
    }
}

#[async_trait]
impl SyntheticPoolSource for MockChain {
    fn pool_ids(&self) -> LiveStream<Vec<PoolId>> {
        self.pool_ids.subscribe("")
    }

    async fn pool_info(&self, pool_id: &str) -> SourceResult<Option<PoolInfo>> {
        Ok(self.pools.lock().unwrap().get(pool_id).cloned())
    }

    fn position(&self, pool_id: &str, currency_id: &str) -> LiveStream<SyntheticPosition> {
        self.positions
            .subscribe(&Self::position_key(pool_id, currency_id))
    }

    fn ratio(&self, currency_id: &str) -> LiveStream<SyntheticRatio> {
        self.ratios.subscribe(currency_id)
    }

    fn price(&self, currency_id: &str, period: Duration) -> LiveStream<FixedPoint> {
        self.price_periods.lock().unwrap().push(period);
        self.prices.subscribe(currency_id)
    }
}

impl BalanceSource for MockChain {
    fn balance(&self, account: &str, currency_id: &str) -> LiveStream<String> {
        self.balances
            .subscribe(&Self::balance_key(account, currency_id))
    }
}

/// Network whose setup hands out a shared [`MockChain`].
pub struct MockNetwork {
    pub chain: MockChain,
    pub setups: Arc<AtomicUsize>,
    pub teardowns: Arc<AtomicUsize>,
    /// When set, setup waits for a notification before completing.
    pub gate: Option<Arc<Notify>>,
    pub fail_setup: bool,
    pub balance_only: bool,
}

impl MockNetwork {
    pub fn new(chain: MockChain) -> Self {
        Self {
            chain,
            setups: Arc::new(AtomicUsize::new(0)),
            teardowns: Arc::new(AtomicUsize::new(0)),
            gate: None,
            fail_setup: false,
            balance_only: false,
        }
    }
}

#[async_trait]
impl Network for MockNetwork {
    type Context = MockChain;

    fn from_config(_config: &GuardianConfig) -> Result<Self, ValidationError> {
        Ok(Self::new(MockChain::default()))
    }

    async fn setup(&self, _config: &GuardianConfig) -> Result<MockChain, GuardianError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_setup {
            return Err(GuardianError::Setup("node unreachable".into()));
        }
        Ok(self.chain.clone())
    }

    fn tasks(&self) -> TaskTable<MockChain> {
        let table = TaskTable::new().register::<BalanceTask>();
        if self.balance_only {
            table
        } else {
            table.register::<PoolRiskTask>()
        }
    }

    async fn teardown(&self, _context: Arc<MockChain>) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub guardian: String,
    pub monitor: String,
    pub target: String,
    pub record: Value,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<Dispatched>>,
}

impl RecordingDispatcher {
    pub fn calls(&self) -> Vec<Dispatched> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub async fn wait_for(&self, expected: usize) -> Vec<Dispatched> {
        for _ in 0..200 {
            if self.count() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.calls()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    fn dispatch(&self, scope: &DispatchScope, action: &ActionSpec, record: &Value) {
        self.calls.lock().unwrap().push(Dispatched {
            guardian: scope.guardian.clone(),
            monitor: scope.monitor.clone(),
            target: action.target.clone(),
            record: record.clone(),
        });
    }
}

/// Polls `check` until it holds or roughly a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
