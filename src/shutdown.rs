use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a token on the first SIGTERM or SIGINT.
///
/// The agent stops its supervisors and sends a last heartbeat once the
/// token fires.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping agent");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping agent");
            }
        }
        cancel.cancel();
    });

    Ok(token)
}
