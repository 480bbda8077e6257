use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Resolves on SIGINT or SIGTERM (Ctrl-C elsewhere). If a handler cannot be
/// installed the future stays pending, leaving shutdown to process exit.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            tracing::warn!("failed to install signal handlers");
            std::future::pending::<()>().await;
            return;
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves once the flag carried by `rx` turns true, or its sender is gone.
pub async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Run `serve` to completion, but stop waiting `grace` after `stop` fires.
/// `None` means in-flight work was still running when the grace ran out.
pub async fn drain_with_grace<S, T>(serve: S, stop: T, grace: Duration) -> Option<S::Output>
where
    S: Future,
    T: Future<Output = ()>,
{
    tokio::pin!(serve);
    tokio::select! {
        output = &mut serve => return Some(output),
        _ = stop => {}
    }
    tokio::time::timeout(grace, serve).await.ok()
}
