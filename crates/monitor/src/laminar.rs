use async_trait::async_trait;
use chain_guardian_domain::{config::GuardianConfig, ValidationError};
use serde_json::Map;
use tracing::info;

use crate::{
    guardian::{GuardianError, Network},
    rpc::{validate_endpoint, RpcChainClient},
    task::TaskTable,
    tasks::{BalanceTask, PoolRiskTask},
};

/// Synthetic-asset chain reached over JSON-RPC polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaminarNetwork {
    endpoint: String,
}

impl LaminarNetwork {
    pub const NETWORK_TYPE: &'static str = "laminar";

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Network for LaminarNetwork {
    type Context = RpcChainClient;

    fn from_config(config: &GuardianConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            endpoint: validate_endpoint(config.node_endpoint.as_deref())?,
        })
    }

    async fn setup(&self, config: &GuardianConfig) -> Result<RpcChainClient, GuardianError> {
        let client = RpcChainClient::new(&self.endpoint, config)?;
        let chain: String = client
            .call("system_chain", &Map::new())
            .await
            .map_err(|err| GuardianError::Setup(err.to_string()))?;
        info!(endpoint = %self.endpoint, %chain, "connected to node");
        Ok(client)
    }

    fn tasks(&self) -> TaskTable<RpcChainClient> {
        TaskTable::new()
            .register::<PoolRiskTask>()
            .register::<BalanceTask>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_validated_at_creation() {
        let config = GuardianConfig::new("laminar");
        let err = LaminarNetwork::from_config(&config).unwrap_err();
        assert_eq!(err.field, "nodeEndpoint");

        let network =
            LaminarNetwork::from_config(&config.with_endpoint(" http://127.0.0.1:9933 ")).unwrap();
        assert_eq!(network.endpoint(), "http://127.0.0.1:9933");
        assert_eq!(
            network.tasks().names(),
            vec!["account.balance", "synthetic.poolRisk"]
        );
    }
}
