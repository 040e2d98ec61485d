//! Shutdown signal handling for long running streams.

use tokio::signal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolves when a running stream should begin its shutdown. This happens in
/// 3 cases:
///     1. the process receives SIGINT or SIGTERM
///     2. the user explicitly asks for it through `shutdown_from_user`
///     3. the stream has already finished on its own (`finished` is cancelled)
pub(crate) async fn shutdown_signal(
    shutdown_from_user: Option<oneshot::Receiver<()>>,
    finished: CancellationToken,
) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(?e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let shutdown_from_user_future = async {
        match shutdown_from_user {
            Some(rx) => {
                rx.await.ok();
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
        _ = shutdown_from_user_future => info!("shutdown requested"),
        _ = finished.cancelled() => info!("stream finished"),
    }
}
