//! Guardian lifecycle: one connection context shared by many monitors.
//!
//! `Created -> SettingUp -> Ready -> Running -> Stopped`. Setup runs at most
//! once per instance and every caller of [`Guardian::is_ready`] awaits the
//! same outcome. Stopped is terminal.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use chain_guardian_domain::{config::GuardianConfig, ValidationError};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge};
use strum_macros::Display;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    action::{ActionDispatcher, DispatchScope},
    task::TaskTable,
    worker::{run_monitor, MonitorError},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardianError {
    #[error("guardian setup failed: {0}")]
    Setup(String),
    #[error("guardian is stopped")]
    Stopped,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GuardianState {
    Created,
    SettingUp,
    Ready,
    Running,
    Stopped,
}

/// Network-specific half of a guardian: how to connect and which tasks run
/// against the resulting context.
#[async_trait]
pub trait Network: Sized + Send + Sync + 'static {
    type Context: Send + Sync + 'static;

    /// Checks the guardian configuration; called once at creation.
    fn from_config(config: &GuardianConfig) -> Result<Self, ValidationError>;

    async fn setup(&self, config: &GuardianConfig) -> Result<Self::Context, GuardianError>;

    fn tasks(&self) -> TaskTable<Self::Context>;

    /// Releases the context after every monitor has been cancelled.
    async fn teardown(&self, _context: Arc<Self::Context>) {}
}

/// Per-start outcome. A monitor that fails to start never blocks the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSummary {
    pub started: Vec<String>,
    pub failed: Vec<(String, MonitorError)>,
}

#[async_trait]
pub trait Guardian: Send + Sync {
    fn id(&self) -> &str;

    fn network_type(&self) -> &str;

    fn state(&self) -> GuardianState;

    fn task_names(&self) -> Vec<&'static str>;

    /// Runs setup on first call; later and concurrent callers share the
    /// result. Pends for as long as setup does.
    async fn is_ready(&self) -> Result<(), GuardianError>;

    /// Starts every configured monitor not already running.
    async fn start(&self) -> Result<StartSummary, GuardianError>;

    /// Cancels every monitor and releases the context. Idempotent.
    async fn stop(&self);

    fn active_monitors(&self) -> Vec<String>;
}

/// Lifecycle state the detached setup task shares with the guardian.
struct Core<N: Network> {
    id: String,
    config: GuardianConfig,
    network: N,
    context: Mutex<Option<Arc<N::Context>>>,
    state: Mutex<GuardianState>,
    halted: Arc<AtomicBool>,
}

type SetupOutcome = Shared<BoxFuture<'static, Result<(), GuardianError>>>;

pub struct GuardianInstance<N: Network> {
    core: Arc<Core<N>>,
    tasks: TaskTable<N::Context>,
    dispatcher: Arc<dyn ActionDispatcher>,
    setup: Mutex<Option<SetupOutcome>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<N: Network> Core<N> {
    fn transition(&self, to: GuardianState) {
        let mut state = lock(&self.state);
        if *state == GuardianState::Stopped || *state == to {
            return;
        }
        let from = *state;
        info!(guardian = %self.id, %from, %to, "guardian state changed");
        *state = to;
    }

    async fn run_setup(&self) -> Result<(), GuardianError> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(GuardianError::Stopped);
        }
        self.transition(GuardianState::SettingUp);

        let context = match self.network.setup(&self.config).await {
            Ok(context) => Arc::new(context),
            Err(err) => {
                error!(guardian = %self.id, %err, "guardian setup failed");
                self.transition(GuardianState::Stopped);
                return Err(err);
            }
        };

        // stop() flips `halted` under the same lock, so the context is
        // either handed to stop() or torn down here, never both.
        let accepted = {
            let mut slot = lock(&self.context);
            if self.halted.load(Ordering::SeqCst) {
                false
            } else {
                *slot = Some(context.clone());
                true
            }
        };
        if !accepted {
            self.network.teardown(context).await;
            return Err(GuardianError::Stopped);
        }

        self.transition(GuardianState::Ready);
        Ok(())
    }
}

impl<N: Network> GuardianInstance<N> {
    pub fn new(
        id: impl Into<String>,
        config: GuardianConfig,
        network: N,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        let tasks = network.tasks();
        Self {
            core: Arc::new(Core {
                id: id.into(),
                config,
                network,
                context: Mutex::new(None),
                state: Mutex::new(GuardianState::Created),
                halted: Arc::new(AtomicBool::new(false)),
            }),
            tasks,
            dispatcher,
            setup: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> &N {
        &self.core.network
    }

    /// Setup runs on its own task so a waiter that gives up cannot cancel
    /// it; every waiter polls the same shared outcome.
    fn spawn_setup(&self) -> SetupOutcome {
        let core = self.core.clone();
        let handle = tokio::spawn(async move { core.run_setup().await });
        async move {
            handle.await.unwrap_or_else(|err| {
                Err(GuardianError::Setup(format!("setup task ended abnormally: {err}")))
            })
        }
        .boxed()
        .shared()
    }

    async fn ensure_ready(&self) -> Result<Arc<N::Context>, GuardianError> {
        let outcome = lock(&self.setup)
            .get_or_insert_with(|| self.spawn_setup())
            .clone();
        outcome.await?;
        lock(&self.core.context).clone().ok_or(GuardianError::Stopped)
    }
}

#[async_trait]
impl<N: Network> Guardian for GuardianInstance<N> {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn network_type(&self) -> &str {
        &self.core.config.network_type
    }

    fn state(&self) -> GuardianState {
        *lock(&self.core.state)
    }

    fn task_names(&self) -> Vec<&'static str> {
        self.tasks.names()
    }

    async fn is_ready(&self) -> Result<(), GuardianError> {
        self.ensure_ready().await.map(|_| ())
    }

    async fn start(&self) -> Result<StartSummary, GuardianError> {
        let core = &self.core;
        if core.halted.load(Ordering::SeqCst) {
            return Err(GuardianError::Stopped);
        }
        let context = self.ensure_ready().await?;
        let mut summary = StartSummary::default();

        for (name, monitor) in &core.config.monitors {
            // The name is claimed under the same lock stop() drains, so
            // concurrent starts never spawn a monitor twice.
            let mut subscriptions = lock(&self.subscriptions);
            if core.halted.load(Ordering::SeqCst) {
                return Err(GuardianError::Stopped);
            }
            let Entry::Vacant(slot) = subscriptions.entry(name.clone()) else {
                continue;
            };

            let task = match self.tasks.build(&monitor.task, &monitor.arguments) {
                Ok(task) => task,
                Err(err) => {
                    counter!("guardian_monitor_start_total", "result" => "failed").increment(1);
                    error!(guardian = %core.id, monitor = %name, %err, "monitor failed to start");
                    summary.failed.push((name.clone(), err));
                    continue;
                }
            };

            let scope = DispatchScope {
                guardian: core.id.clone(),
                monitor: name.clone(),
                task: task.name().to_string(),
            };
            let records = task.start(context.clone());
            slot.insert(tokio::spawn(run_monitor(
                scope,
                records,
                monitor.actions.clone().into(),
                self.dispatcher.clone(),
                core.halted.clone(),
            )));
            gauge!("guardian_monitors_active").increment(1.0);

            counter!("guardian_monitor_start_total", "result" => "started").increment(1);
            info!(guardian = %core.id, monitor = %name, task = %monitor.task, "monitor started");
            summary.started.push(name.clone());
        }

        core.transition(GuardianState::Running);
        Ok(summary)
    }

    async fn stop(&self) {
        let core = &self.core;
        let context = {
            let mut slot = lock(&core.context);
            if core.halted.swap(true, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };

        let handles: Vec<_> = lock(&self.subscriptions).drain().collect();
        for (_, handle) in &handles {
            handle.abort();
        }
        gauge!("guardian_monitors_active").decrement(handles.len() as f64);
        core.transition(GuardianState::Stopped);

        if let Some(context) = context {
            core.network.teardown(context).await;
        }
        info!(guardian = %core.id, cancelled = handles.len(), "guardian stopped");
    }

    fn active_monitors(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.subscriptions).keys().cloned().collect();
        names.sort();
        names
    }
}
