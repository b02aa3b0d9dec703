use crate::artifact_store::ArtifactStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodically removes staged artifacts left behind by crashed or killed
/// processes
pub struct StagingSweeper {
    store: Arc<ArtifactStore>,
    interval: Duration,
    max_age: Duration,
}

impl StagingSweeper {
    pub fn new(store: Arc<ArtifactStore>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            interval,
            max_age,
        }
    }

    /// Sweep forever; the first sweep runs immediately
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Staging sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.store.sweep(self.max_age).await {
                Ok(report) if report.removed > 0 || report.failed > 0 => info!(
                    scanned = report.scanned,
                    removed = report.removed,
                    failed = report.failed,
                    "Staging sweep finished"
                ),
                Ok(report) => debug!(scanned = report.scanned, "Staging sweep found nothing stale"),
                Err(e) => warn!(error = %e, "Staging sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeper_removes_stale_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = tmp.path().join("reference-leaked.png");
        std::fs::write(&stale, b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let store = Arc::new(ArtifactStore::new(tmp.path()));
        let sweeper = StagingSweeper::new(store, Duration::from_millis(10), Duration::ZERO);
        let handle = tokio::spawn(sweeper.run());

        let mut removed = false;
        for _ in 0..100 {
            if !stale.exists() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(removed);
    }
}
