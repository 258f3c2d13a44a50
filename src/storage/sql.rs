//! Relational buckets on SQLite
//!
//! This module provides:
//! - Connection pooling with WAL mode for concurrent readers and writers
//! - One table per bucket, created on demand
//! - Schema version tracking in the `fanlog_schema` table
//! - Online migration of older layouts through a shadow table

use super::{
    is_valid_bucket_name, Medium, RecordFilter, RecordId, RetentionPolicy, StorageBackend,
    StoredRecord,
};
use crate::error::StorageError;
use crate::record::{format_timestamp, BucketRecord, Column, SqlValue};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Row, Sqlite, Transaction};
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

/// Table recording the layout version of every bucket.
const META_TABLE: &str = "fanlog_schema";

/// Database handle shared by all relational buckets.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite database URL (e.g., "sqlite:./data/fanlog.db")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let db = Database::new("sqlite:./data/fanlog.db").await?;
    /// let bucket: SqlBucket<EventRecord> = db.bucket("fanlog_events")?;
    /// ```
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL")
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(url = %database_url, "Connected to storage database");
        Ok(Self { pool })
    }

    /// Private in-memory database, kept alive by a single pooled connection.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Handle on one bucket of this database.
    pub fn bucket<R: BucketRecord>(&self, name: &str) -> Result<SqlBucket<R>, StorageError> {
        SqlBucket::new(self.pool.clone(), name)
    }

    /// Recorded layout version of every provisioned bucket.
    pub async fn bucket_versions(&self) -> Result<Vec<(String, u32)>, StorageError> {
        ensure_meta_table(&self.pool).await?;
        let rows = sqlx::query(&format!(
            "SELECT bucket, version FROM {} ORDER BY bucket",
            META_TABLE
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let version: i64 = row.get("version");
                (row.get("bucket"), version.max(0) as u32)
            })
            .collect())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn ensure_meta_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (bucket TEXT PRIMARY KEY, version INTEGER NOT NULL)",
        META_TABLE
    ))
    .execute(pool)
    .await?;
    Ok(())
}

fn create_table_sql(table: &str, columns: &[Column]) -> String {
    let mut decls = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    decls.extend(columns.iter().map(|c| format!("\"{}\" {}", c.name, c.decl)));
    format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", table, decls.join(", "))
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Text(v) => query.bind(v.as_deref()),
        SqlValue::Integer(v) => query.bind(*v),
    }
}

async fn run_step(tx: &mut Transaction<'static, Sqlite>, sql: &str) -> Result<(), sqlx::Error> {
    sqlx::query(sql).execute(&mut **tx).await.map(|_| ())
}

/// One SQLite table holding records of type `R`.
pub struct SqlBucket<R> {
    pool: SqlitePool,
    table: String,
    insert_sql: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: BucketRecord> SqlBucket<R> {
    pub fn new(pool: SqlitePool, table: &str) -> Result<Self, StorageError> {
        if !is_valid_bucket_name(table) || table == META_TABLE {
            return Err(StorageError::InvalidBucketName(table.to_string()));
        }

        let columns = R::columns();
        let names: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        let insert_sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table,
            names.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        Ok(Self {
            pool,
            table: table.to_string(),
            insert_sql,
            _record: PhantomData,
        })
    }

    /// Layout version recorded for this bucket, if provisioned.
    pub async fn stored_version(&self) -> Result<Option<u32>, StorageError> {
        ensure_meta_table(&self.pool).await?;
        let version: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT version FROM {} WHERE bucket = ?",
            META_TABLE
        ))
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.map(|v| v.max(0) as u32))
    }

    async fn table_exists(&self) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn try_initialize(&self) -> Result<(), StorageError> {
        ensure_meta_table(&self.pool).await?;

        if self.table_exists().await? {
            // Tables found without a version row predate tracking and are
            // assumed current
            sqlx::query(&format!(
                "INSERT OR IGNORE INTO {} (bucket, version) VALUES (?, ?)",
                META_TABLE
            ))
            .bind(&self.table)
            .bind(i64::from(R::SCHEMA_VERSION))
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        sqlx::query(&create_table_sql(&self.table, R::columns()))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"{0}_timestamp\" ON \"{0}\" (timestamp)",
            self.table
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} (bucket, version) VALUES (?, ?)",
            META_TABLE
        ))
        .bind(&self.table)
        .bind(i64::from(R::SCHEMA_VERSION))
        .execute(&self.pool)
        .await?;

        tracing::info!(bucket = %self.table, version = R::SCHEMA_VERSION, "Provisioned bucket table");
        Ok(())
    }

    fn migration_failed(&self, step: &'static str, source: sqlx::Error) -> StorageError {
        tracing::error!(
            severity = "alert",
            bucket = %self.table,
            step = step,
            error = %source,
            "Schema migration aborted, previous table left in place"
        );
        StorageError::Migration {
            bucket: self.table.clone(),
            step,
            source,
        }
    }

    /// Rebuild the table in the current layout.
    ///
    /// Order is create shadow, copy rows, drop old, rename shadow, all inside
    /// one transaction. Any failing step rolls back and leaves the original
    /// table untouched.
    async fn try_update_schema(&self) -> Result<bool, StorageError> {
        let Some(version) = self.stored_version().await? else {
            return Ok(false);
        };
        if version >= R::SCHEMA_VERSION {
            return Ok(false);
        }

        let legacy = R::legacy_columns(version).ok_or_else(|| StorageError::UnsupportedSchema {
            bucket: self.table.clone(),
            version,
        })?;
        let copied: Vec<String> = legacy
            .iter()
            .filter(|old| R::columns().iter().any(|c| c.name == old.name))
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let copied = std::iter::once("id".to_string())
            .chain(copied)
            .collect::<Vec<_>>()
            .join(", ");
        let shadow = format!("{}_shadow", self.table);

        tracing::info!(
            bucket = %self.table,
            from = version,
            to = R::SCHEMA_VERSION,
            "Migrating bucket schema"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.migration_failed("begin", e))?;

        let create = format!(
            "DROP TABLE IF EXISTS \"{0}\"; {1}",
            shadow,
            create_table_sql(&shadow, R::columns())
        );
        if let Err(e) = run_step(&mut tx, &create).await {
            let _ = tx.rollback().await;
            return Err(self.migration_failed("create", e));
        }

        let copy = format!(
            "INSERT INTO \"{}\" ({cols}) SELECT {cols} FROM \"{}\"",
            shadow,
            self.table,
            cols = copied
        );
        if let Err(e) = run_step(&mut tx, &copy).await {
            let _ = tx.rollback().await;
            return Err(self.migration_failed("copy", e));
        }

        if let Err(e) = run_step(&mut tx, &format!("DROP TABLE \"{}\"", self.table)).await {
            let _ = tx.rollback().await;
            return Err(self.migration_failed("drop", e));
        }

        let rename = format!(
            "ALTER TABLE \"{}\" RENAME TO \"{}\"; CREATE INDEX IF NOT EXISTS \"{1}_timestamp\" ON \"{1}\" (timestamp)",
            shadow, self.table
        );
        if let Err(e) = run_step(&mut tx, &rename).await {
            let _ = tx.rollback().await;
            return Err(self.migration_failed("rename", e));
        }

        let record_version = sqlx::query(&format!(
            "UPDATE {} SET version = ? WHERE bucket = ?",
            META_TABLE
        ))
        .bind(i64::from(R::SCHEMA_VERSION))
        .bind(&self.table)
        .execute(&mut *tx)
        .await;
        if let Err(e) = record_version {
            let _ = tx.rollback().await;
            return Err(self.migration_failed("version", e));
        }

        tx.commit()
            .await
            .map_err(|e| self.migration_failed("commit", e))?;

        tracing::info!(bucket = %self.table, version = R::SCHEMA_VERSION, "Bucket schema migrated");
        Ok(true)
    }

    async fn try_insert(&self, record: &R) -> Result<i64, StorageError> {
        let values = record.sql_values();
        let mut query = sqlx::query(&self.insert_sql);
        for value in &values {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn try_finalize(&self) -> Result<(), StorageError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", self.table))
            .execute(&self.pool)
            .await?;
        ensure_meta_table(&self.pool).await?;
        sqlx::query(&format!("DELETE FROM {} WHERE bucket = ?", META_TABLE))
            .bind(&self.table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_purge(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(&format!("DELETE FROM \"{}\"", self.table))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Both bounds are applied in one transaction; a failure removes nothing.
    async fn try_clean(&self, policy: &RetentionPolicy) -> Result<u64, StorageError> {
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;

        if let Some(cutoff) = policy.cutoff(Utc::now()) {
            // julianday() is NULL for unparseable timestamps, which expire too
            let result = sqlx::query(&format!(
                "DELETE FROM \"{}\" WHERE julianday(timestamp) IS NULL OR julianday(timestamp) < julianday(?)",
                self.table
            ))
            .bind(format_timestamp(&cutoff))
            .execute(&mut *tx)
            .await?;
            removed += result.rows_affected();
        }

        if policy.max_records > 0 {
            let result = sqlx::query(&format!(
                "DELETE FROM \"{0}\" WHERE id NOT IN (SELECT id FROM \"{0}\" ORDER BY id DESC LIMIT ?)",
                self.table
            ))
            .bind(i64::from(policy.max_records))
            .execute(&mut *tx)
            .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn try_count(&self, filter: &RecordFilter) -> Result<u64, StorageError> {
        let Some((clause, binds)) = filter.to_sql(R::columns()) else {
            return Ok(0);
        };
        let sql = format!("SELECT COUNT(*) FROM \"{}\"{}", self.table, clause);
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        Ok(query.fetch_one(&self.pool).await?.max(0) as u64)
    }

    async fn try_list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredRecord<R>>, StorageError> {
        let Some((clause, binds)) = filter.to_sql(R::columns()) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT * FROM \"{}\"{} ORDER BY id DESC LIMIT ? OFFSET ?",
            self.table, clause
        );
        // LIMIT -1 is unbounded in SQLite
        let limit = if limit == 0 { -1 } else { limit as i64 };

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        let rows = query
            .bind(limit)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredRecord {
                    id: RecordId::Row(row.try_get("id")?),
                    record: R::from_row(row)?,
                })
            })
            .collect()
    }

    async fn try_get(&self, id: i64) -> Result<Option<StoredRecord<R>>, StorageError> {
        let row = sqlx::query(&format!("SELECT * FROM \"{}\" WHERE id = ?", self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(StoredRecord {
                id: RecordId::Row(id),
                record: R::from_row(&row)?,
            })),
            None => Ok(None),
        }
    }

    fn degrade<T>(&self, operation: &'static str, result: Result<T, StorageError>, fallback: T) -> T {
        result.unwrap_or_else(|e| {
            tracing::warn!(bucket = %self.table, operation = operation, error = %e, "Bucket operation failed");
            fallback
        })
    }
}

#[async_trait]
impl<R: BucketRecord> StorageBackend<R> for SqlBucket<R> {
    fn name(&self) -> &str {
        &self.table
    }

    fn medium(&self) -> Medium {
        Medium::Database
    }

    fn available(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn initialize(&self) -> bool {
        if !self.available() {
            return false;
        }
        let result = self.try_initialize().await.map(|_| true);
        self.degrade("initialize", result, false)
    }

    async fn update_schema(&self) -> Result<bool, StorageError> {
        if !self.available() {
            return Err(StorageError::Unavailable(self.table.clone()));
        }
        self.try_update_schema().await
    }

    async fn insert_value(&self, record: &R) -> Option<RecordId> {
        if !self.available() {
            return None;
        }
        let result = self.try_insert(record).await.map(|id| Some(RecordId::Row(id)));
        self.degrade("insert", result, None)
    }

    async fn finalize(&self) -> bool {
        if !self.available() {
            return false;
        }
        let result = self.try_finalize().await.map(|_| true);
        self.degrade("finalize", result, false)
    }

    async fn force_purge(&self) -> u64 {
        if !self.available() {
            return 0;
        }
        let result = self.try_purge().await;
        self.degrade("purge", result, 0)
    }

    async fn cron_clean(&self, policy: &RetentionPolicy) -> u64 {
        if !self.available() || policy.is_unbounded() {
            return 0;
        }
        let result = self.try_clean(policy).await;
        self.degrade("rotate", result, 0)
    }

    async fn get_count(&self, filter: &RecordFilter) -> u64 {
        if !self.available() {
            return 0;
        }
        let result = self.try_count(filter).await;
        self.degrade("count", result, 0)
    }

    async fn get_list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Vec<StoredRecord<R>> {
        if !self.available() {
            return Vec::new();
        }
        let result = self.try_list(filter, offset, limit).await;
        self.degrade("list", result, Vec::new())
    }

    async fn get_by_id(&self, id: &RecordId) -> Option<StoredRecord<R>> {
        let RecordId::Row(id) = id else {
            return None;
        };
        if !self.available() {
            return None;
        }
        let result = self.try_get(*id).await;
        self.degrade("get", result, None)
    }
}
