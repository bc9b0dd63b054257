//! Guardian daemon: runs every configured guardian until Ctrl-C.

use std::io;

use chain_guardian_domain::{
    config::{BootstrapConfig, ConfigError},
    services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
};
use chain_guardian_monitor::{Guardian, GuardianRegistry};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[from] io::Error),
}

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[chain-guardian] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), BootstrapError> {
    let config = BootstrapConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("GUARDIAN");
    let telemetry = init_telemetry(&telemetry_config)?;
    let file = config.load_guardians()?;

    let registry = GuardianRegistry::global();
    let mut guardians: Vec<Box<dyn Guardian>> = Vec::with_capacity(file.guardians.len());
    for (id, guardian_config) in file.guardians {
        let network_type = guardian_config.network_type.clone();
        match registry.create(&network_type, id.clone(), guardian_config) {
            Ok(guardian) => guardians.push(guardian),
            Err(err) => error!(guardian = %id, %network_type, %err, "guardian not created"),
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let starting = join_all(guardians.iter().map(|guardian| start_guardian(guardian.as_ref())));
    // A guardian whose setup never completes must not block shutdown.
    let interrupted = tokio::select! {
        _ = starting => None,
        waited = &mut ctrl_c => Some(waited),
    };
    let waited = match interrupted {
        Some(waited) => waited,
        None => ctrl_c.await,
    };

    info!("shutting down {} guardians", guardians.len());
    for guardian in &guardians {
        guardian.stop().await;
    }

    if let Some(snapshot) = telemetry.render_metrics() {
        debug!(%snapshot, "final metrics snapshot");
    }

    waited?;
    Ok(())
}

async fn start_guardian(guardian: &dyn Guardian) {
    match guardian.start().await {
        Ok(summary) => info!(
            guardian = guardian.id(),
            started = summary.started.len(),
            failed = summary.failed.len(),
            "guardian running"
        ),
        Err(err) => warn!(guardian = guardian.id(), %err, "guardian failed to start"),
    }
}
