//! Network-type keyed factory for guardians.
//!
//! Registration overwrites any earlier binding for the same type and can
//! happen at any time. [`GuardianRegistry::global`] is the process-wide
//! instance; tests build their own.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chain_guardian_domain::{config::GuardianConfig, ValidationError};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    action::{ActionDispatcher, HttpActionDispatcher},
    guardian::{Guardian, GuardianInstance, Network},
    laminar::LaminarNetwork,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown guardian type `{0}`")]
    UnknownGuardianType(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

type GuardianFactory = Arc<
    dyn Fn(
            String,
            GuardianConfig,
            Arc<dyn ActionDispatcher>,
        ) -> Result<Box<dyn Guardian>, ValidationError>
        + Send
        + Sync,
>;

pub struct GuardianRegistry {
    factories: RwLock<HashMap<String, GuardianFactory>>,
    dispatcher: Arc<dyn ActionDispatcher>,
}

static GLOBAL: Lazy<GuardianRegistry> = Lazy::new(|| {
    let registry = GuardianRegistry::new(Arc::new(HttpActionDispatcher::new()));
    registry.register::<LaminarNetwork>(LaminarNetwork::NETWORK_TYPE);
    registry
});

impl GuardianRegistry {
    /// Empty registry whose guardians dispatch through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            dispatcher,
        }
    }

    pub fn global() -> &'static GuardianRegistry {
        &GLOBAL
    }

    pub fn register<N: Network>(&self, network_type: impl Into<String>) {
        self.register_with(network_type, N::from_config);
    }

    /// Binds `network_type` to a custom network constructor.
    pub fn register_with<N, F>(&self, network_type: impl Into<String>, build: F)
    where
        N: Network,
        F: Fn(&GuardianConfig) -> Result<N, ValidationError> + Send + Sync + 'static,
    {
        let network_type = network_type.into();
        let factory: GuardianFactory = Arc::new(move |id, config, dispatcher| {
            let network = build(&config)?;
            Ok(Box::new(GuardianInstance::new(id, config, network, dispatcher)) as Box<dyn Guardian>)
        });

        let replaced = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network_type.clone(), factory)
            .is_some();
        info!(%network_type, replaced, "guardian type registered");
    }

    pub fn is_registered(&self, network_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(network_type)
    }

    pub fn network_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Builds an unstarted guardian. Nothing is created when the type is
    /// unknown or the configuration is rejected.
    pub fn create(
        &self,
        network_type: &str,
        id: impl Into<String>,
        config: GuardianConfig,
    ) -> Result<Box<dyn Guardian>, RegistryError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownGuardianType(network_type.to_string()))?;

        let id = id.into();
        debug!(guardian = %id, %network_type, "creating guardian");
        Ok(factory(id, config, self.dispatcher.clone())?)
    }
}
