//! Action dispatch for emitted records.
//!
//! Dispatch is fire-and-forget: the call returns immediately, effects run on
//! their own and their failures never reach the monitor that produced the
//! record.

use chain_guardian_domain::model::{ActionMethod, ActionSpec};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchScope {
    pub guardian: String,
    pub monitor: String,
    pub task: String,
}

pub trait ActionDispatcher: Send + Sync {
    /// Must not block or panic; the caller is the monitor's drain loop.
    fn dispatch(&self, scope: &DispatchScope, action: &ActionSpec, record: &Value);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    pub guardian: String,
    pub monitor: String,
    pub task: String,
    pub dispatched_at: DateTime<Utc>,
    pub data: Value,
}

impl ActionPayload {
    pub fn new(scope: &DispatchScope, record: &Value) -> Self {
        Self {
            guardian: scope.guardian.clone(),
            monitor: scope.monitor.clone(),
            task: scope.task.clone(),
            dispatched_at: Utc::now(),
            data: record.clone(),
        }
    }
}

/// Posts records as JSON to webhooks and writes `log` actions to tracing.
#[derive(Debug, Clone, Default)]
pub struct HttpActionDispatcher {
    client: reqwest::Client,
}

impl HttpActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ActionDispatcher for HttpActionDispatcher {
    fn dispatch(&self, scope: &DispatchScope, action: &ActionSpec, record: &Value) {
        match action.method {
            ActionMethod::Log => {
                counter!("guardian_actions_dispatched_total", "result" => "logged").increment(1);
                info!(
                    target_label = %action.target,
                    guardian = %scope.guardian,
                    monitor = %scope.monitor,
                    %record,
                    "monitor record"
                );
            }
            ActionMethod::Post => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    counter!("guardian_actions_dispatched_total", "result" => "error").increment(1);
                    warn!(url = %action.target, "no async runtime; dropping action");
                    return;
                };
                let client = self.client.clone();
                let url = action.target.clone();
                let payload = ActionPayload::new(scope, record);
                runtime.spawn(async move {
                    let outcome = client
                        .post(&url)
                        .json(&payload)
                        .send()
                        .await
                        .and_then(|response| response.error_for_status());
                    match outcome {
                        Ok(_) => {
                            counter!("guardian_actions_dispatched_total", "result" => "ok")
                                .increment(1);
                        }
                        Err(err) => {
                            counter!("guardian_actions_dispatched_total", "result" => "error")
                                .increment(1);
                            warn!(%url, %err, monitor = %payload.monitor, "action dispatch failed");
                        }
                    }
                });
            }
        }
    }
}
