pub mod agent;
pub mod backend;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod process;
pub mod shutdown;
pub mod supervisor;

pub use agent::{Agent, AgentCommand};
pub use error::{AgentError, Result};
