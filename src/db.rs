//! Record source backed by the MySQL media table

use async_trait::async_trait;
use log::info;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{derive_filename, MediaRecord};

/// Query used by the heartbeat, carried over from the original pool ping
const PING_QUERY: &str = "SELECT 1 = 1";

/// Largest satisfied set pushed into the `NOT IN` clause. MySQL caps
/// prepared-statement parameters at `u16::MAX`; above this the filter
/// stays client-side, where the engine claims already-present files
/// without writing them.
const MAX_FILTER_PARAMS: usize = 10_000;

fn filter_in_sql(satisfied: &HashSet<String>) -> bool {
    !satisfied.is_empty() && satisfied.len() <= MAX_FILTER_PARAMS
}

/// Lightweight table row used for the complete-enumeration phase:
/// identity only, no blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Stable row identifier used as the pagination cursor
    pub id: i64,
    /// Content hash of the record
    pub checksum: String,
    /// File extension of the record
    pub format: String,
}

impl TableEntry {
    /// The on-disk filename this entry maps to
    pub fn filename(&self) -> String {
        derive_filename(&self.checksum, &self.format)
    }
}

/// Read-only access to the table of media records.
///
/// Both fetch operations page by `id > after_id ORDER BY id`, so repeated
/// calls within a pass make monotonic progress and no record is starved.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch up to `limit` full records with `id > after_id`, excluding
    /// checksums in `satisfied` on a best-effort basis: a source may
    /// return already-present records (for instance when the satisfied
    /// set is too large to push into the query), and callers must claim
    /// those without writing. An empty batch means every missing record
    /// has been seen.
    async fn fetch_missing(
        &self,
        satisfied: &HashSet<String>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, SyncError>;

    /// Enumerate up to `limit` rows (identity only) with `id > after_id`.
    ///
    /// Orphan detection is computed against this enumeration run to
    /// exhaustion; deleting based on a partial page is unsound.
    async fn list_entries(&self, after_id: i64, limit: usize) -> Result<Vec<TableEntry>, SyncError>;

    /// Liveness probe against the backing store
    async fn ping(&self) -> Result<(), SyncError>;
}

/// MySQL-backed record source sharing one bounded connection pool
/// between the pass queries and the heartbeat
#[derive(Debug, Clone)]
pub struct MediaStore {
    pool: MySqlPool,
    table: String,
}

impl MediaStore {
    /// Connect to MySQL using the configured parameters.
    ///
    /// The pool is kept small (1-2 connections) so a pass query and a
    /// heartbeat probe can interleave but nothing else contends.
    pub async fn connect(config: &SyncConfig) -> Result<Self, SyncError> {
        let options = MySqlConnectOptions::new()
            .host(&config.mysql.host)
            .port(config.mysql.port)
            .username(&config.mysql.user)
            .password(&config.mysql.password)
            .database(&config.mysql.database);

        let pool = MySqlPoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(options)
            .await?;

        info!(
            "connected to mysql://{}@{}:{}/{}",
            config.mysql.user, config.mysql.host, config.mysql.port, config.mysql.database
        );

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }
}

#[async_trait]
impl RecordSource for MediaStore {
    async fn fetch_missing(
        &self,
        satisfied: &HashSet<String>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, SyncError> {
        // The table name is validated against identifier characters at
        // config load, so interpolating it here is safe.
        let mut query = QueryBuilder::<MySql>::new("SELECT id, md5, format, data FROM ");
        query.push(&self.table);
        query.push(" WHERE id > ");
        query.push_bind(after_id);
        if filter_in_sql(satisfied) {
            query.push(" AND md5 NOT IN (");
            let mut values = query.separated(", ");
            for checksum in satisfied {
                values.push_bind(checksum.as_str());
            }
            values.push_unseparated(")");
        }
        query.push(" ORDER BY id LIMIT ");
        query.push_bind(limit as u64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MediaRecord {
                id: row.try_get("id")?,
                checksum: row.try_get("md5")?,
                format: row.try_get("format")?,
                content: row.try_get("data")?,
            });
        }
        Ok(records)
    }

    async fn list_entries(&self, after_id: i64, limit: usize) -> Result<Vec<TableEntry>, SyncError> {
        let mut query = QueryBuilder::<MySql>::new("SELECT id, md5, format FROM ");
        query.push(&self.table);
        query.push(" WHERE id > ");
        query.push_bind(after_id);
        query.push(" ORDER BY id LIMIT ");
        query.push_bind(limit as u64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(TableEntry {
                id: row.try_get("id")?,
                checksum: row.try_get("md5")?,
                format: row.try_get("format")?,
            });
        }
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        sqlx::query(PING_QUERY).execute(&self.pool).await?;
        Ok(())
    }
}
