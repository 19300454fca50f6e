//! Pass scheduler - drives reconciliation passes sequentially, forever

use log::{error, info};
use std::path::Path;
use std::time::Duration;

use crate::db::RecordSource;
use crate::error::SyncError;
use crate::reconcile;

/// Run reconciliation passes until one fails.
///
/// The schedule is sequential: a pass runs to completion, then the next
/// one starts after the fixed delay. Two passes can never overlap, and a
/// running pass is never cancelled by the next tick. A failed pass is
/// fatal; unattended retries against a broken backend risk deleting
/// files based on bad data.
pub async fn run<S>(
    source: &S,
    media_path: &Path,
    batch_size: usize,
    delay: Duration,
) -> SyncError
where
    S: RecordSource + ?Sized,
{
    let mut pass = 0u64;
    loop {
        pass += 1;
        info!("pass {} starting", pass);
        match reconcile::run_pass(source, media_path, batch_size).await {
            Ok(stats) => {
                info!(
                    "pass {} succeeded: {} written, {} kept, {} deleted",
                    pass, stats.written, stats.kept, stats.deleted
                );
            }
            Err(e) => {
                error!("pass {} failed: {}", pass, e);
                return e;
            }
        }
        tokio::time::sleep(delay).await;
    }
}
