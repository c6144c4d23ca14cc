use crate::cache::persistence::save_cache;
use crate::cache::store::TtlStore;
use crate::metrics::SharedMetrics;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic sweep task. The only recurring background activity in the
/// subsystem: everything else runs inside a caller's request or the push
/// client's connection task.
pub struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop. Each pass drops entries stale for longer
    /// than `grace` and persists when anything was removed.
    pub fn spawn(
        store: TtlStore,
        metrics: SharedMetrics,
        interval: Duration,
        grace: Duration,
        persist_dir: Option<PathBuf>,
    ) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                grace_secs = grace.as_secs(),
                "Sweeper started"
            );

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let removed = store.sweep(grace).await;
                metrics.record_sweep(removed);
                metrics.cache_entries.set(store.len().await as f64);

                if removed > 0 {
                    debug!(removed, "Sweep pass removed entries");
                    if let Some(dir) = &persist_dir {
                        match save_cache(&store, dir).await {
                            Ok(()) => metrics.record_persistence("save", "success"),
                            Err(e) => {
                                metrics.record_persistence("save", "error");
                                warn!(error = %e, "Failed to persist after sweep");
                            }
                        }
                    }
                }
            }

            debug!("Sweeper stopped");
        });

        Self { token, handle }
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sweeper task join failed");
        }
    }
}
