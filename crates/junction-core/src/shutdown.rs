//! Process termination signals.

use tokio::signal;

/// Resolves on Ctrl+C or, on unix, SIGTERM.
///
/// If a handler cannot be installed that source is ignored and the other
/// one still applies.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::warn!("Received terminate signal, shutting down"),
    }
}
