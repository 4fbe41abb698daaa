use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LaunchType, ProcessSupervisor};
use crate::backend::{BackendFactory, LaunchSpec, LocalProcessFactory};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::process::registry::admitted_count;
use crate::process::{ProcessMap, ProcessRecord, ProcessRegistry, LOST_ON_SUBMISSION};

/// Supervisor for plain `exec` + `argv` launches.
///
/// Launch parameters are `{"exec": .., "argv": [..], "working_directory": ..}`;
/// without a working directory the supervisor directory is used.
pub struct SupervisedExec {
    launch_type: LaunchType,
    slots: usize,
    directory: PathBuf,
    backend: Box<dyn BackendFactory>,
    registry: Arc<ProcessRegistry>,
}

impl SupervisedExec {
    /// Build the `direct-supervised` variant from configuration.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let directory = supervisor_directory(config)?;
        let backend = LocalProcessFactory::persistent(
            &directory,
            &config.name,
            config.launch_type.launcher.clone(),
        )?;
        Ok(Self::with_backend(
            LaunchType::DirectSupervised,
            config.slots,
            directory,
            Box::new(backend),
        ))
    }

    /// Build a supervisor over any backend, adopting whatever the backend
    /// recovered from a previous run.
    pub fn with_backend(
        launch_type: LaunchType,
        slots: usize,
        directory: impl Into<PathBuf>,
        backend: Box<dyn BackendFactory>,
    ) -> Self {
        let registry = ProcessRegistry::new();
        match backend.reload_handles() {
            Ok(handles) => {
                for (name, handle) in handles {
                    registry.register(&name).attach(handle);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload processes, starting empty");
            }
        }
        Self {
            launch_type,
            slots,
            directory: directory.into(),
            backend,
            registry,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Register `name`, build its launch with `prepare`, then admit or reject it.
    ///
    /// The record is in the map before `prepare` or the backend run, so a
    /// failure in either leaves a FAILED record instead of nothing. The slot
    /// count includes the new record and is taken under the same lock as the
    /// insert: a launch is admitted iff `admitted <= slots`, which makes
    /// `slots` an exact ceiling.
    pub fn launch_with<F>(&self, name: &str, prepare: F) -> Arc<ProcessRecord>
    where
        F: FnOnce() -> Result<LaunchSpec>,
    {
        let mut processes = self.registry.lock();
        if let Some(existing) = processes.get(name) {
            tracing::warn!(name, "Process already registered, ignoring duplicate launch");
            return existing.clone();
        }
        let record = self.registry.new_record(name);
        processes.insert(name.to_string(), record.clone());

        match prepare().and_then(|spec| self.backend.create_handle(name, spec)) {
            Ok(handle) => record.attach(handle),
            Err(e) => {
                tracing::error!(name, error = %e, "Launch request did not reach the backend");
                record.set_error_message(format!("{}: {}", LOST_ON_SUBMISSION, e));
                return record;
            }
        }

        let admitted = admitted_count(&processes);
        if admitted <= self.slots {
            tracing::info!(name, admitted, slots = self.slots, "Process admitted");
            record.start();
        } else {
            tracing::warn!(name, admitted, slots = self.slots, "No free slot, rejecting process");
            record.cancel_request();
        }
        record
    }
}

pub(crate) fn supervisor_directory(config: &AgentConfig) -> Result<PathBuf> {
    config
        .launch_type
        .supervisor_directory
        .clone()
        .ok_or_else(|| AgentError::MissingParameter("supervisor_directory".to_string()))
}

impl ProcessSupervisor for SupervisedExec {
    fn launch_type(&self) -> LaunchType {
        self.launch_type
    }

    fn run(&self, name: &str, parameters: &serde_json::Value) -> Arc<ProcessRecord> {
        self.launch_with(name, || {
            let mut spec: LaunchSpec = serde_json::from_value(parameters.clone())
                .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;
            if spec.working_directory.is_none() {
                spec.working_directory = Some(self.directory.clone());
            }
            Ok(spec)
        })
    }

    fn poll(&self) -> Result<()> {
        self.backend.poll()
    }

    fn get_all(&self) -> ProcessMap {
        self.registry.snapshot()
    }

    fn lookup(&self, name: &str) -> Option<Arc<ProcessRecord>> {
        self.registry.get(name)
    }

    fn terminate(&self) {
        tracing::info!(launch_type = %self.launch_type, "Terminating supervisor");
        self.backend.terminate();
    }
}
