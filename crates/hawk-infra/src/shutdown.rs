//! Process shutdown signals.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
///
/// # Panics
/// - Panics if the Ctrl+C handler cannot be installed (unrecoverable system error)
/// - On Unix systems, panics if the SIGTERM handler cannot be installed
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }
}

/// Cancel `token` when the process is asked to shut down.
///
/// The watcher also exits once `token` is cancelled by someone else.
pub fn cancel_on_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("Shutting down gracefully...");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
