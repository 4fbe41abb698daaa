
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ee_agent::config::{AgentConfig, LaunchTypeConfig};
use ee_agent::heartbeat::{ChannelSink, OutboundMessage, HEARTBEAT_TOPIC};
use ee_agent::process::ProcessState;
use ee_agent::supervisor::ProcessSupervisor;
use ee_agent::{Agent, AgentCommand};
use test_harness::{direct_config, exec_params, mock_supervisor, MockBackend};

fn mock_agent(backend: &MockBackend, slots: usize) -> (Agent<ChannelSink>, mpsc::Receiver<OutboundMessage>) {
    let config = AgentConfig::new(
        "agent-under-test",
        LaunchTypeConfig::new("direct-supervised").with_supervisor_directory("/tmp"),
    )
    .with_slots(slots);
    let (sink, rx) = ChannelSink::channel(16);
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(mock_supervisor(backend, slots));
    (Agent::with_supervisors(config, vec![supervisor], sink), rx)
}

fn launch(upid: &str, round: u64) -> AgentCommand {
    AgentCommand::Launch {
        upid: upid.to_string(),
        round,
        launch_type: None,
        parameters: exec_params("/bin/true", &[]),
    }
}

#[tokio::test]
async fn test_launch_command_registers_process() {
    let backend = MockBackend::new();
    let (agent, _rx) = mock_agent(&backend, 2);

    agent.handle_command(launch("web", 3)).await;

    let record = agent.lookup("web-3").unwrap();
    assert_eq!(record.state(), ProcessState::Requesting);
    assert_eq!(backend.spec("web-3").exec, "/bin/true");
}

#[tokio::test]
async fn test_launch_with_named_launch_type() {
    let backend = MockBackend::new();
    let (agent, _rx) = mock_agent(&backend, 2);

    agent
        .handle_command(AgentCommand::Launch {
            upid: "web".to_string(),
            round: 0,
            launch_type: Some("direct-supervised".to_string()),
            parameters: exec_params("/bin/true", &[]),
        })
        .await;
    assert!(agent.lookup("web-0").is_some());

    // no supervisor for this type is configured
    agent
        .handle_command(AgentCommand::Launch {
            upid: "db".to_string(),
            round: 0,
            launch_type: Some("container-single".to_string()),
            parameters: serde_json::json!({"apps": []}),
        })
        .await;
    assert!(agent.lookup("db-0").is_none());

    agent
        .handle_command(AgentCommand::Launch {
            upid: "db".to_string(),
            round: 1,
            launch_type: Some("teleport".to_string()),
            parameters: serde_json::json!({}),
        })
        .await;
    assert!(agent.lookup("db-1").is_none());
}

#[tokio::test]
async fn test_terminate_and_cleanup_commands() {
    let backend = MockBackend::new();
    let (agent, _rx) = mock_agent(&backend, 2);
    agent.handle_command(launch("web", 0)).await;
    agent.supervisors()[0].poll().unwrap();

    agent
        .handle_command(AgentCommand::Terminate {
            upid: "web".to_string(),
            round: 0,
        })
        .await;
    assert_eq!(agent.lookup("web-0").unwrap().state(), ProcessState::Terminating);

    agent
        .handle_command(AgentCommand::Cleanup {
            upid: "web".to_string(),
            round: 0,
        })
        .await;
    assert!(agent.lookup("web-0").is_none());
    assert_eq!(backend.cleanups("web-0"), 1);

    // unknown ids are ignored
    agent
        .handle_command(AgentCommand::Terminate {
            upid: "ghost".to_string(),
            round: 9,
        })
        .await;
    agent
        .handle_command(AgentCommand::Cleanup {
            upid: "web".to_string(),
            round: 0,
        })
        .await;
    assert_eq!(backend.cleanups("web-0"), 1);
}

#[tokio::test]
async fn test_dump_sends_heartbeat_to_dispatcher() {
    let backend = MockBackend::new();
    let (agent, mut rx) = mock_agent(&backend, 1);
    agent.handle_command(launch("web", 0)).await;
    agent.handle_command(launch("web", 1)).await;

    agent.handle_command(AgentCommand::Dump).await;

    let out = rx.recv().await.unwrap();
    assert_eq!(out.destination, "process_dispatcher");
    assert_eq!(out.topic, HEARTBEAT_TOPIC);
    assert_eq!(out.message["eeagent_id"], "agent-under-test");
    let states: Vec<serde_json::Value> = out.message["processes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["state"][1].clone())
        .collect();
    assert_eq!(states.len(), 2);
    assert!(states.contains(&serde_json::json!("RUNNING")));
    assert!(states.contains(&serde_json::json!("REJECTED")));
}

#[tokio::test]
async fn test_run_applies_commands_and_stops_on_shutdown() {
    let backend = MockBackend::new();
    let (agent, mut rx) = mock_agent(&backend, 2);
    let agent = Arc::new(agent);
    let (tx, commands) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    let runner = {
        let agent = agent.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { agent.run(commands, shutdown).await })
    };

    // first tick fires immediately
    let first = rx.recv().await.unwrap();
    assert_eq!(first.message["processes"], serde_json::json!([]));

    tx.send(launch("web", 0)).await.unwrap();
    tx.send(AgentCommand::Dump).await.unwrap();
    let dumped = rx.recv().await.unwrap();
    assert_eq!(dumped.message["processes"][0]["upid"], "web");

    // a closed command channel does not stop the agent
    drop(tx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!runner.is_finished());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();

    assert!(backend.terminated());
    let last = rx.recv().await.unwrap();
    assert_eq!(last.topic, HEARTBEAT_TOPIC);
    assert_eq!(last.message["processes"][0]["upid"], "web");
}

#[tokio::test]
async fn test_run_polls_backends_between_heartbeats() {
    let backend = MockBackend::new();
    let mut config = AgentConfig::new(
        "agent-under-test",
        LaunchTypeConfig::new("direct-supervised").with_supervisor_directory("/tmp"),
    );
    config.poll_interval_ms = 10;
    let (sink, mut rx) = ChannelSink::channel(16);
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(mock_supervisor(&backend, 1));
    let agent = Arc::new(Agent::with_supervisors(config, vec![supervisor], sink));
    let (tx, commands) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    let runner = {
        let agent = agent.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { agent.run(commands, shutdown).await })
    };
    rx.recv().await.unwrap();

    tx.send(launch("web", 0)).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while agent.lookup("web-0").map(|r| r.state()) != Some(ProcessState::Running) {
        assert!(tokio::time::Instant::now() < deadline, "web-0 never polled to running");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    backend.exit("web-0", 0);
    tx.send(launch("web", 1)).await.unwrap();
    while agent.lookup("web-1").is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(agent.lookup("web-1").unwrap().state().is_admitted());
    // only the first tick's heartbeat went out
    assert!(rx.try_recv().is_err());
    assert!(backend.polls() > 2);

    shutdown.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_agent_poll_survives_failing_backend() {
    let backend = MockBackend::failing_poll();
    let (agent, _rx) = mock_agent(&backend, 1);
    agent.poll();
    agent.poll();
    assert_eq!(backend.polls(), 2);
}

#[tokio::test]
async fn test_agent_from_config_runs_real_process() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, mut rx) = ChannelSink::channel(16);
    let agent = Agent::new(direct_config(dir.path(), 1), sink).unwrap();
    assert_eq!(agent.config().name, "test-agent");

    agent
        .handle_command(AgentCommand::Launch {
            upid: "echo".to_string(),
            round: 0,
            launch_type: None,
            parameters: exec_params("echo", &["hi"]),
        })
        .await;

    let mut state = serde_json::Value::Null;
    for _ in 0..250 {
        agent.handle_command(AgentCommand::Dump).await;
        let out = rx.recv().await.unwrap();
        state = out.message["processes"][0]["state"].clone();
        if state == serde_json::json!([1000, "EXITED"]) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, serde_json::json!([1000, "EXITED"]));
}

#[test]
fn test_agent_new_rejects_bad_config() {
    let (sink, _rx) = ChannelSink::channel(1);
    let config = AgentConfig::new("bad", LaunchTypeConfig::new("nope"));
    let err = Agent::new(config, sink).err().unwrap();
    assert!(err.is_configuration());
}
