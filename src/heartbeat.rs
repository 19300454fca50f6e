//! Health monitor - periodic liveness probe against the backing store

use log::{debug, error};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::db::RecordSource;
use crate::error::SyncError;

/// Probe the store on a fixed interval until a probe fails.
///
/// Deliberately blunt: the first failed probe is returned and the
/// process dies with it. The orphan-deletion logic must never keep
/// running over a degraded connection; an external supervisor restarts
/// the daemon.
pub async fn run<S>(source: &S, period: Duration) -> SyncError
where
    S: RecordSource + ?Sized,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; connectivity was just verified
    // at startup, so wait a full period before the first probe.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match source.ping().await {
            Ok(()) => debug!("heartbeat ok"),
            Err(e) => {
                error!("heartbeat failed: {}", e);
                return e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableEntry;
    use crate::error::SyncErrorKind;
    use crate::models::MediaRecord;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Source whose queries hang but whose ping fails fast
    struct StalledSource;

    #[async_trait]
    impl RecordSource for StalledSource {
        async fn fetch_missing(
            &self,
            _satisfied: &HashSet<String>,
            _after_id: i64,
            _limit: usize,
        ) -> Result<Vec<MediaRecord>, SyncError> {
            // Simulates a pass stuck mid-flight.
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }

        async fn list_entries(
            &self,
            _after_id: i64,
            _limit: usize,
        ) -> Result<Vec<TableEntry>, SyncError> {
            Ok(vec![])
        }

        async fn ping(&self) -> Result<(), SyncError> {
            Err(SyncError::database_error("server has gone away"))
        }
    }

    #[tokio::test]
    async fn test_first_failed_probe_is_returned() {
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            run(&StalledSource, Duration::from_millis(5)),
        )
        .await
        .expect("monitor must return on the first failed probe");
        assert_eq!(err.kind, SyncErrorKind::Database);
    }

    #[tokio::test]
    async fn test_monitor_fails_while_pass_is_mid_flight() {
        // The monitor is independent of the pass cycle: a stuck pass
        // does not keep the process alive once a probe fails.
        let dir = TempDir::new().unwrap();
        let source = StalledSource;

        let err = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::select! {
                err = crate::scheduler::run(&source, dir.path(), 10, Duration::from_secs(60)) => err,
                err = run(&source, Duration::from_millis(5)) => err,
            }
        })
        .await
        .expect("heartbeat failure must win over the stalled pass");
        assert_eq!(err.kind, SyncErrorKind::Database);
    }
}
