use std::{future::Future, time::Duration};

use futures::channel::oneshot;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Enter,
    Deadline,
    Signal,
}

/// Resolves on the first of Enter, the auto-stop deadline or a shutdown
/// signal. Whatever fires later is ignored.
pub async fn wait_for_stop(duration: Option<Duration>) -> StopReason {
    race(enter_pressed(), deadline(duration), shutdown_signal()).await
}

async fn race(
    enter: impl Future<Output = bool>,
    deadline: impl Future<Output = ()>,
    signal: impl Future<Output = ()>,
) -> StopReason {
    tokio::select! {
        true = enter => StopReason::Enter,
        _ = deadline => StopReason::Deadline,
        _ = signal => StopReason::Signal,
    }
}

/// `false` when stdin closes without a line, which must not stop anything.
async fn enter_pressed() -> bool {
    let (tx, rx) = oneshot::channel();

    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                let _ = tx.send(());
            }
        });

    if let Err(error) = spawned {
        warn!(%error, "Cannot watch stdin");
        return false;
    }

    rx.await.is_ok()
}

async fn deadline(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
