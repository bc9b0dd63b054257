//! Task contract: validated arguments in, live record sequence out.
//!
//! A task is built fresh for every monitor from its raw arguments. Once built
//! it only holds those arguments; all mutable computation state lives inside
//! the sequence returned by [`StartTask::start`], and every call to `start`
//! creates an independent subscription tree.

use std::{collections::HashMap, sync::Arc};

use chain_guardian_domain::{ArgumentSchema, SourceError, ValidationError};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{context::LiveStream, worker::MonitorError};

pub type RecordStream<T> = LiveStream<T>;

pub trait Task: Sized + Send + Sync + 'static {
    /// Key monitors use to refer to this task.
    const NAME: &'static str;

    type Output: Serialize + Send + 'static;

    fn validation_schema() -> ArgumentSchema;

    /// Builds the task from an argument bag that already passed the schema
    /// with defaults applied.
    fn from_arguments(arguments: Map<String, Value>) -> Result<Self, ValidationError>;

    fn new(arguments: &Value) -> Result<Self, ValidationError> {
        let validated = Self::validation_schema().validate(arguments)?;
        Self::from_arguments(validated)
    }
}

/// Composition logic of a task against a concrete connection context.
pub trait StartTask<C>: Task {
    fn start(&self, context: Arc<C>) -> RecordStream<Self::Output>;
}

/// Type-erased task as stored in a guardian's task table. Records leave as
/// JSON so actions see one shape regardless of the task.
pub trait MonitorTask<C>: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self, context: Arc<C>) -> RecordStream<Value>;
}

struct Erased<T>(T);

impl<C, T> MonitorTask<C> for Erased<T>
where
    T: StartTask<C>,
{
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn start(&self, context: Arc<C>) -> RecordStream<Value> {
        self.0
            .start(context)
            .map(|item| {
                item.and_then(|record| serde_json::to_value(record).map_err(SourceError::decode))
            })
            .boxed()
    }
}

type TaskConstructor<C> = fn(&Value) -> Result<Box<dyn MonitorTask<C>>, ValidationError>;

fn construct<C, T>(arguments: &Value) -> Result<Box<dyn MonitorTask<C>>, ValidationError>
where
    C: 'static,
    T: StartTask<C>,
{
    Ok(Box::new(Erased(T::new(arguments)?)))
}

/// Name-keyed constructors for the tasks a network supports.
pub struct TaskTable<C> {
    constructors: HashMap<&'static str, TaskConstructor<C>>,
}

impl<C: 'static> Default for TaskTable<C> {
    fn default() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }
}

impl<C: 'static> TaskTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: StartTask<C>>(mut self) -> Self {
        self.constructors.insert(T::NAME, construct::<C, T>);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Resolves `name` and validates `arguments` against the task's schema.
    pub fn build(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<Box<dyn MonitorTask<C>>, MonitorError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| MonitorError::UnknownTask(name.to_string()))?;
        Ok(constructor(arguments)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tasks::{BalanceTask, PoolRiskTask},
        testing::MockChain,
    };
    use serde_json::json;

    fn table() -> TaskTable<MockChain> {
        TaskTable::new()
            .register::<PoolRiskTask>()
            .register::<BalanceTask>()
    }

    #[test]
    fn lists_registered_names() {
        assert_eq!(table().names(), vec!["account.balance", "synthetic.poolRisk"]);
        assert!(table().contains("account.balance"));
    }

    #[test]
    fn unknown_task_names_are_rejected() {
        let err = table().build("oracle.prices", &json!({})).err().unwrap();
        assert!(matches!(err, MonitorError::UnknownTask(name) if name == "oracle.prices"));
    }

    #[test]
    fn invalid_arguments_fail_construction() {
        let err = table()
            .build("account.balance", &json!({ "account": "alice" }))
            .err()
            .unwrap();
        match err {
            MonitorError::Validation(err) => assert_eq!(err.field, "currency"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn erased_records_leave_as_json() {
        let chain = MockChain::default();
        let task = table()
            .build("account.balance", &json!({ "account": "alice", "currency": "AUSD" }))
            .unwrap();
        assert_eq!(task.name(), "account.balance");

        chain.balances.push(&MockChain::balance_key("alice", "AUSD"), "10".to_string());
        let mut records = task.start(Arc::new(chain));
        let first = records.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            json!({ "account": "alice", "currency": "AUSD", "free": "10" })
        );
    }
}
