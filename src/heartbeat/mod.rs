//! Heartbeat reporting to the dispatcher.
//!
//! Every tick the agent polls each supervisor, flattens all of their
//! records into one [`HeartbeatSnapshot`] and fires it at the dispatcher.
//! Nothing in here is allowed to fail the agent: a supervisor whose poll
//! fails still contributes its (possibly stale) records, and a send that
//! fails or times out is logged and dropped until the next tick.
//!
//! # Components
//!
//! - [`collect`] / [`collect_and_send`]: build and transmit one heartbeat
//! - [`MessageChannel`]: the outbound publish operation
//! - [`ChannelSink`]: a [`MessageChannel`] over a tokio channel
//! - [`HeartbeatTicker`]: heartbeat pacing

pub mod channel;
pub mod sender;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::process::{unmake_id, ProcessState};
use crate::supervisor::ProcessSupervisor;

pub use channel::{ChannelSink, MessageChannel, OutboundMessage};
pub use sender::HeartbeatTicker;

pub const HEARTBEAT_TOPIC: &str = "heartbeat";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One process as reported to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub upid: String,
    pub round: String,
    pub state: ProcessState,
    pub msg: String,
}

/// Point-in-time status of every process the agent knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    pub eeagent_id: String,
    pub timestamp: String,
    pub processes: Vec<ProcessSummary>,
}

/// Poll every supervisor and gather its records.
pub fn collect(agent_id: &str, supervisors: &[Arc<dyn ProcessSupervisor>]) -> HeartbeatSnapshot {
    let mut processes = Vec::new();
    for supervisor in supervisors {
        if let Err(e) = supervisor.poll() {
            tracing::error!(
                launch_type = %supervisor.launch_type(),
                error = %e,
                "Poll failed, reporting last known state"
            );
        }
        for (name, record) in supervisor.get_all() {
            let (upid, round) = match unmake_id(&name) {
                Some((upid, round)) => (upid.to_string(), round.to_string()),
                None => {
                    tracing::warn!(name = %name, "Process name has no round, reporting it whole");
                    (name.clone(), String::new())
                }
            };
            processes.push(ProcessSummary {
                upid,
                round,
                state: record.state(),
                msg: record.error_message(),
            });
        }
    }

    HeartbeatSnapshot {
        eeagent_id: agent_id.to_string(),
        timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        processes,
    }
}

/// Collect a heartbeat and fire it at `destination`.
///
/// Returns whether the heartbeat went out. Failures are logged, never
/// propagated; a send that takes longer than `send_timeout` counts as
/// dropped.
pub async fn collect_and_send<C: MessageChannel>(
    agent_id: &str,
    supervisors: &[Arc<dyn ProcessSupervisor>],
    channel: &C,
    destination: &str,
    send_timeout: Duration,
) -> bool {
    let snapshot = collect(agent_id, supervisors);
    let message = match serde_json::to_value(&snapshot) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode heartbeat");
            return false;
        }
    };
    tracing::debug!(heartbeat = %message, "Sending heartbeat");

    match tokio::time::timeout(
        send_timeout,
        channel.fire(destination, HEARTBEAT_TOPIC, message),
    )
    .await
    {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(destination, error = %e, "Error sending heartbeat");
            false
        }
        Err(_) => {
            tracing::warn!(
                destination,
                timeout_ms = send_timeout.as_millis() as u64,
                "Heartbeat send timed out, dropping it"
            );
            false
        }
    }
}
