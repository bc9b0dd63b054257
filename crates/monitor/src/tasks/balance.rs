use std::sync::Arc;

use chain_guardian_domain::{
    model::{AccountBalance, CurrencyId},
    schema::string_or_list,
    ArgumentSchema, FieldKind, FieldSpec, ValidationError,
};
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};

use crate::{
    combine::close_as_failure,
    context::BalanceSource,
    task::{RecordStream, StartTask, Task},
};

/// Free balance of every (account, currency) pair, re-emitted on change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceTask {
    accounts: Vec<String>,
    currencies: Vec<CurrencyId>,
}

impl BalanceTask {
    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn currencies(&self) -> &[CurrencyId] {
        &self.currencies
    }
}

impl Task for BalanceTask {
    const NAME: &'static str = "account.balance";

    type Output = AccountBalance;

    fn validation_schema() -> ArgumentSchema {
        let id_or_list = || FieldKind::OneOf(vec![FieldKind::String, FieldKind::StringList]);
        ArgumentSchema::new()
            .field(FieldSpec::required("account", id_or_list()))
            .field(FieldSpec::required("currency", id_or_list()))
    }

    fn from_arguments(arguments: Map<String, Value>) -> Result<Self, ValidationError> {
        let read = |field: &'static str| {
            arguments
                .get(field)
                .and_then(string_or_list)
                .ok_or_else(|| ValidationError::new(field, "is required"))
        };

        Ok(Self {
            accounts: read("account")?,
            currencies: read("currency")?,
        })
    }
}

impl<C: BalanceSource> StartTask<C> for BalanceTask {
    fn start(&self, context: Arc<C>) -> RecordStream<AccountBalance> {
        let mut units = Vec::with_capacity(self.accounts.len() * self.currencies.len());
        for account in &self.accounts {
            for currency in &self.currencies {
                let (account, currency) = (account.clone(), currency.clone());
                let unit = close_as_failure("balance", context.balance(&account, &currency))
                    .map(move |free| {
                        free.map(|free| AccountBalance {
                            account: account.clone(),
                            currency: currency.clone(),
                            free,
                        })
                    })
                    .boxed();
                units.push(unit);
            }
        }

        stream::select_all(units).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;
    use chain_guardian_domain::SourceError;
    use serde_json::json;

    #[test]
    fn accepts_single_ids_and_lists() {
        let task =
            BalanceTask::new(&json!({ "account": "alice", "currency": ["AUSD", "LAMI"] })).unwrap();
        assert_eq!(task.accounts(), ["alice".to_string()]);
        assert_eq!(task.currencies().len(), 2);

        let err = BalanceTask::new(&json!({ "account": [], "currency": "AUSD" })).unwrap_err();
        assert_eq!(err.field, "account");
    }

    #[tokio::test]
    async fn watches_every_pair_and_isolates_failures() {
        let chain = MockChain::default();
        let task = BalanceTask::new(&json!({ "account": ["alice", "bob"], "currency": "AUSD" }))
            .unwrap();
        let mut records = task.start(Arc::new(chain.clone()));

        chain
            .balances
            .fail(&MockChain::balance_key("alice", "AUSD"), SourceError::Rpc("gone".into()));
        assert_eq!(
            records.next().await,
            Some(Err(SourceError::Rpc("gone".into())))
        );

        chain
            .balances
            .push(&MockChain::balance_key("bob", "AUSD"), "42".to_string());
        assert_eq!(
            records.next().await,
            Some(Ok(AccountBalance {
                account: "bob".into(),
                currency: "AUSD".into(),
                free: "42".into(),
            }))
        );
    }
}
