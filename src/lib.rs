//! Daemon that keeps a local media directory synchronized with rows in
//! a MySQL media table
//!
//! Each reconciliation pass snapshots the directory, materializes the
//! records that are missing from it, and deletes files no record backs
//! anymore. A separate heartbeat probes the database and kills the
//! process on the first failure.

pub mod config;
pub mod db;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod reconcile;
pub mod scheduler;

pub use config::{MysqlConfig, SyncConfig};
pub use db::{MediaStore, RecordSource, TableEntry};
pub use error::{SyncError, SyncErrorKind};
pub use models::{DirectoryListing, MediaRecord, PassStats};
pub use reconcile::{run_pass, snapshot};
