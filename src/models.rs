//! Core data models for the sync daemon

use std::collections::BTreeSet;

use crate::error::SyncError;

/// A single media row fetched from the source table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    /// Stable row identifier used as the pagination cursor
    pub id: i64,
    /// Content hash, the unique and immutable identity of the record
    pub checksum: String,
    /// File extension, without the dot
    pub format: String,
    /// The media payload
    pub content: Vec<u8>,
}

impl MediaRecord {
    /// Create a new record
    pub fn new(id: i64, checksum: impl Into<String>, format: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id,
            checksum: checksum.into(),
            format: format.into(),
            content,
        }
    }

    /// The on-disk filename for this record: `checksum.format`
    ///
    /// This is the only mapping between a record and its file.
    pub fn filename(&self) -> String {
        derive_filename(&self.checksum, &self.format)
    }

    /// Validate that this record can be materialized as a file.
    ///
    /// Rejects empty fields and any character that would change the
    /// meaning of the derived filename.
    pub fn validate(&self) -> Result<(), SyncError> {
        validate_name_part(&self.checksum, "checksum")?;
        validate_name_part(&self.format, "format")?;
        if self.content.is_empty() {
            return Err(SyncError::invalid_record(format!(
                "record {} has empty content",
                self.checksum
            )));
        }
        Ok(())
    }
}

/// Derive the on-disk filename for a checksum/format pair
pub fn derive_filename(checksum: &str, format: &str) -> String {
    format!("{}.{}", checksum, format)
}

/// Extract the checksum part of an on-disk filename, if it has one
pub fn checksum_of(filename: &str) -> Option<&str> {
    filename.split_once('.').map(|(stem, _)| stem).filter(|s| !s.is_empty())
}

fn validate_name_part(value: &str, field: &str) -> Result<(), SyncError> {
    if value.is_empty() {
        return Err(SyncError::invalid_record(format!("record has empty {}", field)));
    }
    if value.contains(['/', '\\', '.']) || value.contains('\0') {
        return Err(SyncError::invalid_record(format!(
            "record {} {:?} contains path characters",
            field, value
        )));
    }
    Ok(())
}

/// Snapshot of the target directory's filenames, mutated during a pass.
///
/// Filenames claimed by a known record are removed; whatever is left
/// after a complete enumeration of the table is the orphan set.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    names: BTreeSet<String>,
}

impl DirectoryListing {
    /// Build a listing from raw filenames
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Number of filenames still unclaimed
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether every filename has been claimed
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether a filename is still unclaimed
    pub fn contains(&self, filename: &str) -> bool {
        self.names.contains(filename)
    }

    /// Claim a filename for a known record. Returns true if it was present.
    pub fn claim(&mut self, filename: &str) -> bool {
        self.names.remove(filename)
    }

    /// Checksums of the files currently present, used to filter the
    /// record-source query down to records that still need a write
    pub fn satisfied_checksums(&self) -> std::collections::HashSet<String> {
        self.names
            .iter()
            .filter_map(|name| checksum_of(name))
            .map(str::to_string)
            .collect()
    }

    /// Consume the listing, yielding the unclaimed (orphaned) filenames
    pub fn into_orphans(self) -> Vec<String> {
        self.names.into_iter().collect()
    }
}

/// Outcome counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Files written this pass
    pub written: u64,
    /// Files already present and matched to a record
    pub kept: u64,
    /// Orphan files deleted this pass
    pub deleted: u64,
}

impl PassStats {
    /// Whether the pass touched the filesystem at all
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.deleted == 0
    }
}
