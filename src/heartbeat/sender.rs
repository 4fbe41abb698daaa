use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Paces heartbeats: emits one tick immediately, then one per interval.
///
/// A slow heartbeat delays the next tick instead of bunching ticks up, so
/// the agent never sends heartbeats back to back after a stall.
pub struct HeartbeatTicker {
    interval: Duration,
}

impl HeartbeatTicker {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick into `tx` until the receiver is dropped or `shutdown` fires.
    pub async fn run(&self, tx: mpsc::Sender<()>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Heartbeat ticker stopped");
    }
}
