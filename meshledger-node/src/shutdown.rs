//! Graceful shutdown coordination.

use std::io;

use tokio::sync::broadcast;

/// Shutdown signal sender.
pub type ShutdownTx = broadcast::Sender<()>;

/// Shutdown signal receiver.
pub type ShutdownRx = broadcast::Receiver<()>;

/// Create a shutdown channel.
pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    broadcast::channel(1)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// Fails only if the signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}

/// A guard that holds a shutdown receiver and can check for shutdown.
pub struct ShutdownGuard {
    rx: ShutdownRx,
}

impl ShutdownGuard {
    /// Create a new shutdown guard from a sender.
    pub fn new(tx: &ShutdownTx) -> Self {
        Self { rx: tx.subscribe() }
    }

    /// Wait for the shutdown signal.
    pub async fn wait(&mut self) {
        let _ = self.rx.recv().await;
    }
}
