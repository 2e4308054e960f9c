//! Termination signal handling.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Create a `CancellationToken` and spawn a task that cancels it on
/// SIGINT or SIGTERM.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        token_clone.cancel();
    });

    token
}

/// Wait for the first of SIGINT or SIGTERM.
///
/// A handler that fails to install never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
