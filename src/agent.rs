use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::heartbeat::{collect_and_send, HeartbeatTicker, MessageChannel};
use crate::process::{make_id, ProcessRecord};
use crate::supervisor::{create_supervisor, LaunchType, ProcessSupervisor};

/// Request from the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    Launch {
        upid: String,
        round: u64,
        /// Launch type to use; the first configured supervisor when absent.
        #[serde(default)]
        launch_type: Option<String>,
        parameters: serde_json::Value,
    },
    Terminate {
        upid: String,
        round: u64,
    },
    Cleanup {
        upid: String,
        round: u64,
    },
    /// Send a heartbeat now.
    Dump,
}

/// The execution engine agent.
///
/// Owns the supervisors and the outbound channel, applies dispatcher
/// commands and sends heartbeats on a fixed cadence.
pub struct Agent<C: MessageChannel> {
    config: AgentConfig,
    supervisors: Vec<Arc<dyn ProcessSupervisor>>,
    channel: C,
}

impl<C: MessageChannel> Agent<C> {
    /// Build the agent and the supervisor its configuration names.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the launch type is unknown or a
    /// mandatory launch type field is missing.
    pub fn new(config: AgentConfig, channel: C) -> Result<Self> {
        let supervisor = create_supervisor(&config)?;
        Ok(Self::with_supervisors(config, vec![supervisor], channel))
    }

    pub fn with_supervisors(
        config: AgentConfig,
        supervisors: Vec<Arc<dyn ProcessSupervisor>>,
        channel: C,
    ) -> Self {
        Self {
            config,
            supervisors,
            channel,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn supervisors(&self) -> &[Arc<dyn ProcessSupervisor>] {
        &self.supervisors
    }

    fn supervisor_for(&self, launch_type: Option<&str>) -> Option<&Arc<dyn ProcessSupervisor>> {
        match launch_type {
            None => self.supervisors.first(),
            Some(name) => match name.parse::<LaunchType>() {
                Ok(launch_type) => self
                    .supervisors
                    .iter()
                    .find(|s| s.launch_type() == launch_type),
                Err(e) => {
                    tracing::warn!(error = %e, "Launch request names an unknown launch type");
                    None
                }
            },
        }
    }

    /// Find a record in whichever supervisor holds it.
    pub fn lookup(&self, name: &str) -> Option<Arc<ProcessRecord>> {
        self.supervisors.iter().find_map(|s| s.lookup(name))
    }

    /// Apply one dispatcher command.
    pub async fn handle_command(&self, command: AgentCommand) {
        match command {
            AgentCommand::Launch {
                upid,
                round,
                launch_type,
                parameters,
            } => {
                let name = make_id(&upid, round);
                match self.supervisor_for(launch_type.as_deref()) {
                    Some(supervisor) => {
                        let record = supervisor.run(&name, &parameters);
                        tracing::info!(name = %name, state = %record.state(), "Launch request handled");
                    }
                    None => {
                        tracing::warn!(name = %name, launch_type = ?launch_type, "No supervisor for launch request");
                    }
                }
            }
            AgentCommand::Terminate { upid, round } => {
                let name = make_id(&upid, round);
                match self.lookup(&name) {
                    Some(record) => record.terminate(),
                    None => tracing::warn!(name = %name, "Terminate for unknown process"),
                }
            }
            AgentCommand::Cleanup { upid, round } => {
                let name = make_id(&upid, round);
                match self.lookup(&name) {
                    Some(record) => record.cleanup(),
                    None => tracing::debug!(name = %name, "Cleanup for unknown process"),
                }
            }
            AgentCommand::Dump => {
                self.heartbeat().await;
            }
        }
    }

    /// Refresh every supervisor's backend state.
    ///
    /// Keeps finished processes from holding a slot until the next heartbeat.
    pub fn poll(&self) {
        for supervisor in &self.supervisors {
            if let Err(e) = supervisor.poll() {
                tracing::warn!(launch_type = %supervisor.launch_type(), error = %e, "Poll failed");
            }
        }
    }

    /// Send one heartbeat. Returns whether it went out.
    pub async fn heartbeat(&self) -> bool {
        collect_and_send(
            &self.config.name,
            &self.supervisors,
            &self.channel,
            &self.config.dispatcher,
            Duration::from_millis(self.config.send_timeout_ms),
        )
        .await
    }

    /// Run until `shutdown` fires.
    ///
    /// Commands are applied as they arrive, backends are polled every
    /// `poll_interval_ms` and heartbeats go out every
    /// `heartbeat_interval_ms`. On shutdown every supervisor is terminated
    /// and a final heartbeat is sent. A closed command channel does not stop
    /// the agent.
    pub async fn run(&self, mut commands: mpsc::Receiver<AgentCommand>, shutdown: CancellationToken) {
        let (tick_tx, mut tick_rx) = mpsc::channel(1);
        let ticker = HeartbeatTicker::new(self.config.heartbeat_interval_ms);
        let ticker_shutdown = shutdown.child_token();
        let ticker_handle = tokio::spawn(async move {
            ticker.run(tick_tx, ticker_shutdown).await;
        });

        tracing::info!(
            agent = %self.config.name,
            slots = self.config.slots,
            heartbeat_interval_ms = self.config.heartbeat_interval_ms,
            poll_interval_ms = self.config.poll_interval_ms,
            "Agent started"
        );

        let mut poll_tick =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("Command channel closed");
                        commands_open = false;
                    }
                },
                Some(()) = tick_rx.recv() => {
                    self.heartbeat().await;
                }
                _ = poll_tick.tick() => self.poll(),
            }
        }

        tracing::info!(agent = %self.config.name, "Agent shutting down");
        for supervisor in &self.supervisors {
            supervisor.terminate();
        }
        self.heartbeat().await;
        if let Err(e) = ticker_handle.await {
            tracing::warn!(error = %e, "Heartbeat ticker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_command_decodes() {
        let command: AgentCommand = serde_json::from_str(
            r#"{"command": "launch", "upid": "a-b", "round": 2, "parameters": {"exec": "true"}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            AgentCommand::Launch {
                upid: "a-b".to_string(),
                round: 2,
                launch_type: None,
                parameters: serde_json::json!({"exec": "true"}),
            }
        );
    }

    #[test]
    fn terminate_cleanup_and_dump_decode() {
        let command: AgentCommand =
            serde_json::from_str(r#"{"command": "terminate", "upid": "x", "round": 0}"#).unwrap();
        assert_eq!(
            command,
            AgentCommand::Terminate {
                upid: "x".to_string(),
                round: 0
            }
        );
        let command: AgentCommand =
            serde_json::from_str(r#"{"command": "cleanup", "upid": "x", "round": 1}"#).unwrap();
        assert_eq!(
            command,
            AgentCommand::Cleanup {
                upid: "x".to_string(),
                round: 1
            }
        );
        let command: AgentCommand = serde_json::from_str(r#"{"command": "dump"}"#).unwrap();
        assert_eq!(command, AgentCommand::Dump);
    }

    #[test]
    fn negative_round_is_rejected() {
        let err = serde_json::from_str::<AgentCommand>(
            r#"{"command": "cleanup", "upid": "x", "round": -1}"#,
        );
        assert!(err.is_err());
    }
}
