use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::direct::supervisor_directory;
use super::{LaunchType, ProcessSupervisor, SupervisedExec};
use crate::backend::{file_safe_name, LaunchSpec, LocalProcessFactory};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::process::{ProcessMap, ProcessRecord};

const DEFAULT_CONTAINER_EXECUTABLE: &str = "bin/container";

#[derive(Debug, Deserialize)]
struct ContainerParameters {
    apps: serde_json::Value,
}

/// Supervisor for container launches.
///
/// Each launch carries an `apps` document. It is written to a descriptor
/// file and the container executable is started with `--rel <file>`
/// through an inner [`SupervisedExec`]. The descriptor is removed when the
/// process is cleaned up.
pub struct ContainerSupervisor {
    launch_type: LaunchType,
    container_directory: PathBuf,
    executable: PathBuf,
    container_args: Vec<String>,
    descriptor_directory: PathBuf,
    inner: SupervisedExec,
}

impl ContainerSupervisor {
    /// `container-single`: container processes with a persisted registry.
    pub fn single(config: &AgentConfig) -> Result<Self> {
        Self::build(config, LaunchType::ContainerSingle, true)
    }

    /// `container-unsupervised`: container processes that are not recovered
    /// after an agent restart.
    pub fn unsupervised(config: &AgentConfig) -> Result<Self> {
        Self::build(config, LaunchType::ContainerUnsupervised, false)
    }

    fn build(config: &AgentConfig, launch_type: LaunchType, persistent: bool) -> Result<Self> {
        let container_directory = config
            .launch_type
            .container_directory
            .clone()
            .ok_or_else(|| AgentError::MissingParameter("container_directory".to_string()))?;
        let directory = supervisor_directory(config)?;

        let executable = config
            .launch_type
            .container_executable
            .clone()
            .unwrap_or_else(|| container_directory.join(DEFAULT_CONTAINER_EXECUTABLE));
        let container_args = config
            .launch_type
            .container_args
            .as_deref()
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let launcher = config.launch_type.launcher.clone();
        let backend = if persistent {
            LocalProcessFactory::persistent(&directory, &config.name, launcher)?
        } else {
            LocalProcessFactory::new(&directory, launcher)?
        };
        let descriptor_directory = directory.join("descriptors");
        std::fs::create_dir_all(&descriptor_directory)?;

        let inner =
            SupervisedExec::with_backend(launch_type, config.slots, directory, Box::new(backend));

        Ok(Self {
            launch_type,
            container_directory,
            executable,
            container_args,
            descriptor_directory,
            inner,
        })
    }

    fn write_descriptor(&self, name: &str, apps: &serde_json::Value) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", file_safe_name(name)))
            .suffix(".json")
            .tempfile_in(&self.descriptor_directory)?;
        file.write_all(&serde_json::to_vec(apps)?)?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| AgentError::Io(e.error))?;
        tracing::debug!(name, path = %path.display(), "Wrote container descriptor");
        Ok(path)
    }

    fn launch_spec(&self, name: &str, parameters: &serde_json::Value) -> Result<LaunchSpec> {
        let params: ContainerParameters =
            serde_json::from_value(parameters.clone()).map_err(|_| {
                AgentError::InvalidParameters(
                    "apps must be in the parameters for a container run".to_string(),
                )
            })?;
        let descriptor = self.write_descriptor(name, &params.apps)?;
        Ok(
            LaunchSpec::new(self.executable.to_string_lossy().into_owned())
                .with_args(["--rel".to_string(), descriptor.to_string_lossy().into_owned()])
                .with_args(self.container_args.iter().cloned())
                .with_working_directory(&self.container_directory)
                .with_owned_file(descriptor),
        )
    }
}

impl ProcessSupervisor for ContainerSupervisor {
    fn launch_type(&self) -> LaunchType {
        self.launch_type
    }

    fn run(&self, name: &str, parameters: &serde_json::Value) -> Arc<ProcessRecord> {
        self.inner
            .launch_with(name, || self.launch_spec(name, parameters))
    }

    fn poll(&self) -> Result<()> {
        self.inner.poll()
    }

    fn get_all(&self) -> ProcessMap {
        self.inner.get_all()
    }

    fn lookup(&self, name: &str) -> Option<Arc<ProcessRecord>> {
        self.inner.lookup(name)
    }

    fn terminate(&self) {
        self.inner.terminate()
    }
}
