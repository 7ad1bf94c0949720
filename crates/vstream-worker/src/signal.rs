//! External interruption (SIGINT / SIGTERM).

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Resolves on the first SIGINT or SIGTERM.
///
/// A handler that cannot be installed never fires.
pub async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
