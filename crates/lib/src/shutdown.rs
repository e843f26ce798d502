//! Process shutdown: wait for SIGINT/SIGTERM, then stop loop tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// Clear the running flag and wait for loop tasks; tasks still busy after a short grace
/// (e.g. blocked on an external command) are aborted.
pub async fn stop_tasks(running: &AtomicBool, handles: Vec<JoinHandle<()>>) {
    running.store(false, Ordering::SeqCst);
    for mut handle in handles {
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            log::debug!("task did not stop within {:?}, aborting", STOP_GRACE);
            handle.abort();
        }
    }
}

/// Shared running flag for loop tasks.
pub fn running_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(true))
}
