//! Process supervisors, one per launch type.
//!
//! A supervisor owns the [`ProcessRecord`]s for one backend. It registers a
//! record for every launch request before touching the backend, decides at
//! admission time whether the request fits in the slot budget, and exposes
//! a uniform poll/lookup interface to the heartbeat.
//!
//! # Components
//!
//! - [`ProcessSupervisor`]: the capability set every launch type provides
//! - [`SupervisedExec`]: launches `exec` + `argv` through a [`BackendFactory`](crate::backend::BackendFactory)
//! - [`ContainerSupervisor`]: writes a descriptor file and launches a
//!   container executable through an inner [`SupervisedExec`]
//! - [`create_supervisor`]: picks the variant from configuration

pub mod container;
pub mod direct;
pub mod factory;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::process::{ProcessMap, ProcessRecord};

pub use container::ContainerSupervisor;
pub use direct::SupervisedExec;
pub use factory::{create_supervisor, LaunchType};

pub trait ProcessSupervisor: Send + Sync {
    fn launch_type(&self) -> LaunchType;

    /// Register and admit (or reject) a launch. Always returns a record,
    /// even when the backend fails.
    fn run(&self, name: &str, parameters: &serde_json::Value) -> Arc<ProcessRecord>;

    /// Refresh backend state. Records read it lazily afterwards.
    fn poll(&self) -> Result<()>;

    /// Snapshot of every registered record.
    fn get_all(&self) -> ProcessMap;

    fn lookup(&self, name: &str) -> Option<Arc<ProcessRecord>>;

    /// Shut the whole backend down.
    fn terminate(&self);

    /// Clean up the record registered under `name`, if any.
    fn cleanup(&self, name: &str) {
        if let Some(record) = self.lookup(name) {
            record.cleanup();
        }
    }
}

/// Poll `supervisor` until `done` holds or `timeout` elapses.
///
/// Returns whether `done` held. Poll errors are logged and retried.
pub async fn poll_until<F>(
    supervisor: &dyn ProcessSupervisor,
    timeout: Duration,
    interval: Duration,
    mut done: F,
) -> bool
where
    F: FnMut(&dyn ProcessSupervisor) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Err(e) = supervisor.poll() {
            tracing::warn!(error = %e, "Poll failed");
        }
        if done(supervisor) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
