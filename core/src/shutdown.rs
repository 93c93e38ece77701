//! Graceful shutdown on SIGINT/SIGTERM.
//!
//! Both binaries run their main loop against a `watch::Receiver<bool>` that
//! flips to `true` once a stop signal arrives.

use std::future::Future;
use tokio::signal;
use tokio::sync::watch;

/// Wait for Ctrl+C or, on Unix, SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that source
/// never fires; the other one still does.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

/// Spawn a task that flips the returned receiver to `true` once `trigger`
/// completes.
///
/// Must be called inside a Tokio runtime.
pub fn shutdown_on<F>(trigger: F) -> watch::Receiver<bool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        trigger.await;
        let _ = tx.send(true);
    });
    rx
}

/// Shutdown receiver driven by [`shutdown_signal`].
#[must_use]
pub fn shutdown_channel() -> watch::Receiver<bool> {
    shutdown_on(shutdown_signal())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn receiver_flips_once_the_trigger_completes() {
        let (fire, fired) = oneshot::channel::<()>();
        let mut rx = shutdown_on(async move {
            let _ = fired.await;
        });
        assert!(!*rx.borrow());

        fire.send(()).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn receiver_stays_false_while_the_trigger_is_pending() {
        let rx = shutdown_on(std::future::pending());
        tokio::task::yield_now().await;
        assert!(!*rx.borrow());
        assert!(rx.has_changed().is_ok());
    }
}
