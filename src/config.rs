use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per launch type settings.
///
/// Every field is optional at the YAML level; each supervisor variant checks
/// the ones it needs when it is constructed and names the missing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTypeConfig {
    /// Launch type name: `direct-supervised`, `container-single` or
    /// `container-unsupervised`.
    pub name: String,

    /// Directory the supervised backend keeps its state and logs in.
    /// Also the default working directory of launched processes.
    #[serde(default)]
    pub supervisor_directory: Option<PathBuf>,

    /// Optional wrapper executable every launch is run through
    /// (e.g. `/usr/bin/nice`).
    #[serde(default)]
    pub launcher: Option<PathBuf>,

    /// Root of the container installation (container variants only).
    #[serde(default)]
    pub container_directory: Option<PathBuf>,

    /// Container executable. Defaults to `<container_directory>/bin/container`.
    #[serde(default)]
    pub container_executable: Option<PathBuf>,

    /// Extra arguments appended to every container launch, whitespace separated.
    #[serde(default)]
    pub container_args: Option<String>,
}

impl LaunchTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_supervisor_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.supervisor_directory = Some(dir.into());
        self
    }

    pub fn with_container_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.container_directory = Some(dir.into());
        self
    }

    pub fn with_container_executable(mut self, exe: impl Into<PathBuf>) -> Self {
        self.container_executable = Some(exe.into());
        self
    }

    pub fn with_container_args(mut self, args: impl Into<String>) -> Self {
        self.container_args = Some(args.into());
        self
    }

    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }
}

/// Agent configuration, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier, reported as `eeagent_id` in heartbeats.
    #[serde(default = "default_name")]
    pub name: String,

    /// Concurrency budget.
    #[serde(default = "default_slots")]
    pub slots: usize,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Backend poll cadence between heartbeats.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single heartbeat send.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Destination heartbeats are fired at.
    #[serde(default = "default_dispatcher")]
    pub dispatcher: String,

    pub launch_type: LaunchTypeConfig,
}

fn default_name() -> String {
    format!("ee-agent-{}", uuid::Uuid::new_v4())
}

fn default_slots() -> usize {
    1
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_dispatcher() -> String {
    "process_dispatcher".to_string()
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, launch_type: LaunchTypeConfig) -> Self {
        Self {
            name: name.into(),
            slots: default_slots(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            dispatcher: default_dispatcher(),
            launch_type,
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
