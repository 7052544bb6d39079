//! Graceful shutdown controller for the strand node.
//!
//! Listens for SIGINT/SIGTERM and broadcasts a shutdown signal to every
//! periodic job and network task via a `tokio::sync::broadcast` channel.

use tokio::signal;
use tokio::sync::broadcast;

/// Coordinates graceful shutdown across all node subsystems.
///
/// Subsystems call [`subscribe`](Self::subscribe) to get a receiver, then
/// `select!` on it alongside their main loop.
#[derive(Clone)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown. A programmatic
    /// shutdown also ends the wait.
    pub async fn wait_for_signal(&self) {
        let mut programmatic = self.subscribe();
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
            _ = programmatic.recv() => { return; }
        }

        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
