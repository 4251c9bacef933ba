use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGHUP, SIGINT, SIGQUIT and
/// SIGTERM.
///
/// Returns a `CancellationToken` that is cancelled when any of those signals
/// is received. All subsystems should monitor this token and drain gracefully.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sighup.recv() => {
                tracing::info!(signal = "SIGHUP", "initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!(signal = "SIGINT", "initiating graceful shutdown");
            }
            _ = sigquit.recv() => {
                tracing::info!(signal = "SIGQUIT", "initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    token
}
