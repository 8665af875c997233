//! Process shutdown signals.

use std::future::Future;
use std::io;

use tracing::{error, info};

/// Wait for Ctrl+C (or SIGTERM on Unix).
///
/// A handler that cannot be installed never fires; the other one still
/// can.
pub async fn shutdown_signal() {
    let ctrl_c = wait_for("Ctrl+C", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for("SIGTERM", async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Resolve when `signal` fires. Pends forever if it reports an error.
async fn wait_for<F>(name: &str, signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("received {name}"),
        Err(e) => {
            error!("failed to install {name} handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn failed_install_never_resolves() {
        let failed = wait_for("SIGTEST", async {
            Err::<(), _>(io::Error::other("no signal driver"))
        });
        assert!(
            tokio::time::timeout(Duration::from_secs(3600), failed)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn delivered_signal_resolves() {
        let delivered = wait_for("SIGTEST", async { Ok::<(), io::Error>(()) });
        tokio::time::timeout(Duration::from_secs(5), delivered)
            .await
            .expect("signal should resolve");
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_handler_leaves_the_other_armed() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let broken = wait_for("Ctrl+C", async {
            Err::<(), _>(io::Error::other("unsupported"))
        });
        let working = wait_for("SIGTERM", async move { rx.await.map_err(io::Error::other) });

        let both = async {
            tokio::select! {
                () = broken => {}
                () = working => {}
            }
        };
        tokio::pin!(both);

        assert!(
            tokio::time::timeout(Duration::from_secs(60), &mut both)
                .await
                .is_err()
        );
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(60), both)
            .await
            .expect("working handler should still fire");
    }
}
