use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("the {0} parameter must be set")]
    MissingParameter(String),

    #[error("{0} is an unknown launch type")]
    UnknownLaunchType(String),

    #[error("Invalid launch parameters: {0}")]
    InvalidParameters(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transmission error: {0}")]
    Transmission(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgentError {
    /// Configuration errors are the only ones allowed to escape a constructor.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::MissingParameter(_) | AgentError::UnknownLaunchType(_) | AgentError::Yaml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
