use std::str::FromStr;
use std::sync::Arc;

use super::{ContainerSupervisor, ProcessSupervisor, SupervisedExec};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

/// Every supported launch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchType {
    DirectSupervised,
    ContainerSingle,
    ContainerUnsupervised,
}

impl LaunchType {
    pub const ALL: [LaunchType; 3] = [
        LaunchType::DirectSupervised,
        LaunchType::ContainerSingle,
        LaunchType::ContainerUnsupervised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LaunchType::DirectSupervised => "direct-supervised",
            LaunchType::ContainerSingle => "container-single",
            LaunchType::ContainerUnsupervised => "container-unsupervised",
        }
    }
}

impl std::fmt::Display for LaunchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LaunchType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        LaunchType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AgentError::UnknownLaunchType(s.to_string()))
    }
}

/// Build the supervisor named by `config.launch_type.name`.
///
/// # Errors
///
/// [`AgentError::UnknownLaunchType`] for a name outside [`LaunchType::ALL`],
/// [`AgentError::MissingParameter`] when the chosen variant lacks a
/// mandatory field.
pub fn create_supervisor(config: &AgentConfig) -> Result<Arc<dyn ProcessSupervisor>> {
    let launch_type: LaunchType = config.launch_type.name.parse()?;
    let supervisor: Arc<dyn ProcessSupervisor> = match launch_type {
        LaunchType::DirectSupervised => Arc::new(SupervisedExec::new(config)?),
        LaunchType::ContainerSingle => Arc::new(ContainerSupervisor::single(config)?),
        LaunchType::ContainerUnsupervised => Arc::new(ContainerSupervisor::unsupervised(config)?),
    };
    tracing::info!(launch_type = %launch_type, slots = config.slots, "Supervisor created");
    Ok(supervisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_type_names_round_trip() {
        for t in LaunchType::ALL {
            assert_eq!(t.as_str().parse::<LaunchType>().unwrap(), t);
            assert_eq!(t.to_string(), t.as_str());
        }
    }

    #[test]
    fn unknown_launch_type_is_named() {
        let err = "fork".parse::<LaunchType>().unwrap_err();
        assert!(matches!(err, AgentError::UnknownLaunchType(ref name) if name == "fork"));
    }
}
