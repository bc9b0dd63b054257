use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chain_guardian_domain::{model::ActionSpec, ValidationError};
use futures_util::StreamExt;
use metrics::counter;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    action::{ActionDispatcher, DispatchScope},
    task::RecordStream,
};

/// Why a single monitor could not be started. Never affects sibling monitors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("unknown task `{0}`")]
    UnknownTask(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Drains one monitor's record sequence, invoking every action in order for
/// each record. Source failures are logged and counted; the loop keeps
/// draining whatever sibling units remain. Once `halted` is set no further
/// action fires.
pub(crate) async fn run_monitor(
    scope: DispatchScope,
    mut records: RecordStream<serde_json::Value>,
    actions: Arc<[ActionSpec]>,
    dispatcher: Arc<dyn ActionDispatcher>,
    halted: Arc<AtomicBool>,
) {
    while let Some(item) = records.next().await {
        if halted.load(Ordering::SeqCst) {
            return;
        }
        match item {
            Ok(record) => {
                counter!("guardian_records_emitted_total", "monitor" => scope.monitor.clone())
                    .increment(1);
                for action in actions.iter() {
                    dispatcher.dispatch(&scope, action, &record);
                }
            }
            Err(err) => {
                counter!("guardian_source_failures_total", "monitor" => scope.monitor.clone())
                    .increment(1);
                error!(
                    guardian = %scope.guardian,
                    monitor = %scope.monitor,
                    %err,
                    "monitor source failed"
                );
            }
        }
    }

    info!(
        guardian = %scope.guardian,
        monitor = %scope.monitor,
        "monitor sequence completed"
    );
}
