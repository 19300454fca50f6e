//! Reconciliation engine - diffs the media directory against the record source
//!
//! A pass is one composable async task: snapshot the directory, pull
//! record batches until exhausted, then delete orphans. Any failure
//! aborts the pass before orphan cleanup so an incomplete view can
//! never trigger destructive deletes.

use log::{debug, warn};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::db::RecordSource;
use crate::error::SyncError;
use crate::models::{DirectoryListing, MediaRecord, PassStats};

/// Take a one-shot listing of the target directory's filenames.
///
/// The listing reflects a single point in time; the pass never re-lists
/// the directory mid-flight.
pub async fn snapshot(dir: &Path) -> Result<DirectoryListing, SyncError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SyncError::io_error(dir.to_path_buf(), format!("cannot list directory: {}", e)))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::io_error(dir.to_path_buf(), e.to_string()))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| SyncError::io_error(entry.path(), e.to_string()))?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            // A non-UTF-8 name can never match a derived filename; leave
            // it alone rather than treat it as an orphan.
            Err(name) => warn!("ignoring non-UTF-8 filename {:?}", name),
        }
    }
    Ok(DirectoryListing::new(names))
}

/// Write a record's content under its derived filename, never
/// overwriting. Returns false if the file appeared since the snapshot.
async fn write_record(dir: &Path, record: &MediaRecord) -> Result<bool, SyncError> {
    let path = dir.join(record.filename());
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            warn!("{} appeared after the snapshot, keeping existing file", record.filename());
            return Ok(false);
        }
        Err(e) => return Err(SyncError::io_error(path, e.to_string())),
    };

    file.write_all(&record.content)
        .await
        .map_err(|e| SyncError::io_error(path.clone(), e.to_string()))?;
    file.flush()
        .await
        .map_err(|e| SyncError::io_error(path, e.to_string()))?;
    Ok(true)
}

/// Run one reconciliation pass against the record source.
///
/// Batches are consumed in source order; orphan deletion happens
/// strictly after a complete enumeration of all current records, never
/// against a partial page.
pub async fn run_pass<S>(
    source: &S,
    media_path: &Path,
    batch_size: usize,
) -> Result<PassStats, SyncError>
where
    S: RecordSource + ?Sized,
{
    let mut listing = snapshot(media_path).await?;
    let satisfied = listing.satisfied_checksums();
    let mut stats = PassStats::default();
    debug!(
        "pass started: {} files on disk, {} satisfied checksums",
        listing.len(),
        satisfied.len()
    );

    // Materialize every record the directory does not satisfy yet.
    let mut cursor = 0i64;
    loop {
        let batch = source.fetch_missing(&satisfied, cursor, batch_size).await?;
        let Some(last) = batch.last() else { break };
        cursor = last.id;

        for record in &batch {
            record.validate()?;
            let filename = record.filename();
            if listing.claim(&filename) {
                // Already on disk under the same name; write-once.
                stats.kept += 1;
                continue;
            }
            if write_record(media_path, record).await? {
                debug!("wrote {}", filename);
                stats.written += 1;
            }
            listing.claim(&filename);
        }
    }

    // Claim every filename backed by a current record. This enumeration
    // must run to exhaustion before anything is considered an orphan.
    let mut cursor = 0i64;
    loop {
        let entries = source.list_entries(cursor, batch_size).await?;
        let Some(last) = entries.last() else { break };
        cursor = last.id;

        for entry in &entries {
            if listing.claim(&entry.filename()) {
                stats.kept += 1;
            }
        }
    }

    // Whatever is left has no record behind it.
    for orphan in listing.into_orphans() {
        let path = media_path.join(&orphan);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("deleted orphan {}", orphan);
                stats.deleted += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("orphan {} already gone", orphan);
            }
            Err(e) => return Err(SyncError::io_error(path, e.to_string())),
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RecordSource, TableEntry};
    use crate::error::SyncErrorKind;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory record source; records are kept sorted by id.
    struct MemorySource {
        records: Mutex<Vec<MediaRecord>>,
        // When false, the source ignores the satisfied filter and
        // returns already-present records, like a source that cannot
        // push the filter into its query.
        honor_satisfied: bool,
    }

    impl MemorySource {
        fn new(mut records: Vec<MediaRecord>) -> Self {
            records.sort_by_key(|r| r.id);
            Self {
                records: Mutex::new(records),
                honor_satisfied: true,
            }
        }

        fn remove(&self, checksum: &str) {
            self.records.lock().unwrap().retain(|r| r.checksum != checksum);
        }
    }

    #[async_trait]
    impl RecordSource for MemorySource {
        async fn fetch_missing(
            &self,
            satisfied: &HashSet<String>,
            after_id: i64,
            limit: usize,
        ) -> Result<Vec<MediaRecord>, SyncError> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| r.id > after_id)
                .filter(|r| !self.honor_satisfied || !satisfied.contains(&r.checksum))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn list_entries(
            &self,
            after_id: i64,
            limit: usize,
        ) -> Result<Vec<TableEntry>, SyncError> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|r| r.id > after_id)
                .take(limit)
                .map(|r| TableEntry {
                    id: r.id,
                    checksum: r.checksum.clone(),
                    format: r.format.clone(),
                })
                .collect())
        }

        async fn ping(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn rec(id: i64, checksum: &str, format: &str, content: &[u8]) -> MediaRecord {
        MediaRecord::new(id, checksum, format, content.to_vec())
    }

    fn dir_names(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_empty_source_and_directory_is_noop() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![]);

        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert!(stats.is_noop());
        assert!(dir_names(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![
            rec(1, "aaa", "mp3", b"bytes1"),
            rec(2, "bbb", "wav", b"bytes2"),
        ]);

        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.deleted, 0);
        assert_eq!(dir_names(&dir), vec!["aaa.mp3", "bbb.wav"]);
        assert_eq!(std::fs::read(dir.path().join("aaa.mp3")).unwrap(), b"bytes1");
        assert_eq!(std::fs::read(dir.path().join("bbb.wav")).unwrap(), b"bytes2");

        // Drop bbb and run a full pass: its file goes, aaa stays untouched.
        source.remove("bbb");
        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.deleted, 1);
        assert_eq!(dir_names(&dir), vec!["aaa.mp3"]);
        assert_eq!(std::fs::read(dir.path().join("aaa.mp3")).unwrap(), b"bytes1");
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![
            rec(1, "aaa", "mp3", b"one"),
            rec(2, "bbb", "wav", b"two"),
        ]);

        run_pass(&source, dir.path(), 10).await.unwrap();
        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert!(stats.is_noop(), "second pass must not write or delete: {:?}", stats);
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aaa.mp3"), b"original").unwrap();
        let source = MemorySource::new(vec![rec(1, "aaa", "mp3", b"replacement")]);

        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(std::fs::read(dir.path().join("aaa.mp3")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_present_record_claimed_without_write() {
        // A source that returns already-present records exercises the
        // defensive in-listing branch of the engine.
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aaa.mp3"), b"original").unwrap();
        let mut source = MemorySource::new(vec![rec(1, "aaa", "mp3", b"replacement")]);
        source.honor_satisfied = false;

        let stats = run_pass(&source, dir.path(), 10).await.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.deleted, 0);
        assert_eq!(std::fs::read(dir.path().join("aaa.mp3")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_orphans_survive_paginated_passes() {
        // With a page size of 1, no single batch ever sees the whole
        // table. Record-backed files must all survive; only the true
        // orphan goes.
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![
            rec(1, "aaa", "mp3", b"one"),
            rec(2, "bbb", "wav", b"two"),
            rec(3, "ccc", "ogg", b"three"),
        ]);
        run_pass(&source, dir.path(), 1).await.unwrap();
        std::fs::write(dir.path().join("zzz.mp3"), b"stale").unwrap();

        let stats = run_pass(&source, dir.path(), 1).await.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.deleted, 1);
        assert_eq!(dir_names(&dir), vec!["aaa.mp3", "bbb.wav", "ccc.ogg"]);
    }

    #[tokio::test]
    async fn test_failed_pass_deletes_no_orphans() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zzz.mp3"), b"stale").unwrap();
        let source = MemorySource::new(vec![
            rec(1, "aaa", "mp3", b"one"),
            // Empty content fails validation partway through the batch.
            rec(2, "bbb", "wav", b""),
        ]);

        let err = run_pass(&source, dir.path(), 10).await.unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidRecord);
        // The orphan is still there; cleanup never ran.
        assert!(dir.path().join("zzz.mp3").exists());
    }

    #[tokio::test]
    async fn test_failed_write_deletes_no_orphans() {
        // A checksum longer than the filesystem's name limit passes
        // validation but makes the write itself fail, aborting the pass
        // partway through the batch.
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("zzz.mp3"), b"stale").unwrap();
        let oversized = "a".repeat(300);
        let source = MemorySource::new(vec![
            rec(1, "aaa", "mp3", b"one"),
            rec(2, &oversized, "mp3", b"two"),
        ]);

        let err = run_pass(&source, dir.path(), 10).await.unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Io);
        // The orphan is still there; cleanup never ran.
        assert!(dir.path().join("zzz.mp3").exists());
    }

    #[tokio::test]
    async fn test_malformed_checksum_aborts_pass() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new(vec![rec(1, "../escape", "mp3", b"x")]);

        let err = run_pass(&source, dir.path(), 10).await.unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::InvalidRecord);
        assert!(dir_names(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_directory_fails() {
        let err = snapshot(&PathBuf::from("/nonexistent/media_syncd_test"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Io);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // One pass over an empty directory materializes exactly the
        // derived filename set, whatever the record set and page size.
        #[test]
        fn prop_single_pass_converges(
            table in prop::collection::btree_map(
                "[a-f0-9]{6,12}",
                ("[a-z]{2,4}", prop::collection::vec(any::<u8>(), 1..32)),
                0..8,
            ),
            batch_size in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let records: Vec<MediaRecord> = table
                    .iter()
                    .enumerate()
                    .map(|(i, (checksum, (format, content)))| {
                        MediaRecord::new(i as i64 + 1, checksum, format, content.clone())
                    })
                    .collect();
                let mut expected: Vec<String> =
                    records.iter().map(|r| r.filename()).collect();
                expected.sort();

                let dir = TempDir::new().unwrap();
                let source = MemorySource::new(records);
                run_pass(&source, dir.path(), batch_size).await.unwrap();
                assert_eq!(dir_names(&dir), expected);
            });
        }
    }
}
