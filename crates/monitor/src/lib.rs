//! Guardian/task monitoring engine.
//!
//! A [`GuardianRegistry`] maps network types to guardian factories. Each
//! guardian owns one connection context, turns its configured monitors into
//! live task sequences and fires the bound actions on every record.

pub mod action;
pub mod combine;
pub mod context;
pub mod guardian;
pub mod laminar;
pub mod registry;
pub mod rpc;
pub mod task;
pub mod tasks;
pub mod worker;

#[cfg(test)]
mod testing;

pub use action::{ActionDispatcher, ActionPayload, DispatchScope, HttpActionDispatcher};
pub use guardian::{
    Guardian, GuardianError, GuardianInstance, GuardianState, Network, StartSummary,
};
pub use laminar::LaminarNetwork;
pub use registry::{GuardianRegistry, RegistryError};
pub use rpc::{RetryPolicy, RpcChainClient};
pub use task::{MonitorTask, StartTask, Task, TaskTable};
pub use worker::MonitorError;
