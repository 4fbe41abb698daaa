use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ee_agent::config::AgentConfig;
use ee_agent::heartbeat::{ChannelSink, OutboundMessage};
use ee_agent::shutdown::install_shutdown_handler;
use ee_agent::{Agent, AgentCommand};

#[derive(Parser, Debug)]
#[command(name = "ee-agent")]
#[command(version)]
#[command(about = "Execution engine agent: runs and supervises processes for a dispatcher")]
struct Args {
    /// Path to the agent configuration (YAML)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Override the agent name from the configuration
    #[arg(long)]
    name: Option<String>,

    /// Override the slot count from the configuration
    #[arg(long)]
    slots: Option<usize>,

    /// Capacity of the outbound message buffer
    #[arg(long, default_value = "64")]
    outbound_buffer: usize,
}

// =============================================================================
// Transport
// =============================================================================

/// Read dispatcher commands from stdin, one JSON object per line.
async fn read_commands(tx: mpsc::Sender<AgentCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AgentCommand>(line) {
                    Ok(command) => {
                        if tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, line, "Ignoring malformed command"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read commands");
                break;
            }
        }
    }
}

/// Write outbound messages to stdout, one JSON object per line.
async fn write_messages(mut rx: mpsc::Receiver<OutboundMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode outbound message");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdout.write_all(&line).await {
            tracing::error!(error = %e, "Failed to write outbound message");
            continue;
        }
        if let Err(e) = stdout.flush().await {
            tracing::error!(error = %e, "Failed to flush stdout");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries the transport, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = AgentConfig::load(&args.config)?;
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(slots) = args.slots {
        config.slots = slots;
    }

    let (sink, outbound_rx) = ChannelSink::channel(args.outbound_buffer.max(1));
    let agent = Agent::new(config, sink)?;

    let shutdown = install_shutdown_handler()?;
    let (command_tx, command_rx) = mpsc::channel(64);
    tokio::spawn(read_commands(command_tx));
    let writer = tokio::spawn(write_messages(outbound_rx));

    agent.run(command_rx, shutdown).await;

    // dropping the agent closes the outbound channel so the writer drains and exits
    drop(agent);
    writer.await?;
    Ok(())
}
