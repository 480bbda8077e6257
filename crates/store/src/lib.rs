use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use equipment_contracts::{SummaryStats, TypeDistribution, UploadSummary};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use tokio::sync::Mutex;

pub const DEFAULT_RETENTION_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("summary rejected: {0}")]
    Invalid(&'static str),
    #[error("stored summary {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("store sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("store migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub db_url: String,
    pub max_connections: u32,
    pub write_timeout: Duration,
    pub retention_limit: usize,
}

impl StoreOptions {
    pub fn in_memory(retention_limit: usize) -> Self {
        Self {
            db_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            write_timeout: Duration::from_secs(2),
            retention_limit,
        }
    }
}

/// Durable log of upload summaries holding at most `retention_limit` entries.
///
/// Every insert runs the insert, the recency ordering and the eviction of
/// surplus rows inside one transaction, and writers are additionally
/// serialised through `write_gate`, so no reader or writer can observe more
/// than `retention_limit` committed summaries.
#[derive(Clone)]
pub struct SummaryStore {
    pool: SqlitePool,
    write_timeout: Duration,
    retention_limit: usize,
    write_gate: Arc<Mutex<()>>,
}

const SELECT_COLUMNS: &str = "SELECT id, created_at_us, total_equipment, average_flowrate, average_pressure, average_temperature, distribution_json FROM upload_summaries";

impl SummaryStore {
    pub async fn connect(options: &StoreOptions) -> Result<Self, StoreError> {
        if options.retention_limit == 0 {
            return Err(StoreError::Invalid("retention limit must be at least 1"));
        }

        let in_memory = is_in_memory_url(&options.db_url);

        let mut connect_options = SqliteConnectOptions::from_str(&options.db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(options.write_timeout);
        if !in_memory {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // An in-memory database lives exactly as long as its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(options.max_connections.max(1))
        };

        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            pool_options.connect_with(connect_options),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self {
            pool,
            write_timeout: options.write_timeout,
            retention_limit: options.retention_limit,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    pub async fn connect_and_migrate(options: &StoreOptions) -> Result<Self, StoreError> {
        let store = Self::connect(options).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Persist `stats` and evict the oldest summaries beyond the retention
    /// limit, as one indivisible step.
    ///
    /// `created_at` is never earlier than the newest stored summary, so
    /// recency order always agrees with insertion order.
    pub async fn insert_and_prune(&self, stats: &SummaryStats) -> Result<UploadSummary, StoreError> {
        stats.validate().map_err(StoreError::Invalid)?;

        let distribution_json = serde_json::to_string(stats.equipment_type_distribution.entries())
            .map_err(|err| StoreError::Corrupt {
                id: 0,
                reason: err.to_string(),
            })?;
        let total_equipment = i64::try_from(stats.total_equipment)
            .map_err(|_| StoreError::Invalid("total_equipment out of range"))?;
        let retention_limit = self.retention_limit as i64;

        // The deadline stops short of commit: a timed-out write is never
        // stored, and a stored write is never reported as timed out.
        let (gate, tx, id, created_at_us, pruned) = tokio::time::timeout(self.write_timeout, async {
            let gate = self.write_gate.lock().await;
            let now_us = Utc::now().timestamp_micros();

            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(
                "INSERT INTO upload_summaries (created_at_us, total_equipment, average_flowrate, average_pressure, average_temperature, distribution_json) SELECT MAX(?1, COALESCE(MAX(created_at_us), ?1)), ?2, ?3, ?4, ?5, ?6 FROM upload_summaries RETURNING id, created_at_us",
            )
            .bind(now_us)
            .bind(total_equipment)
            .bind(stats.average_flowrate)
            .bind(stats.average_pressure)
            .bind(stats.average_temperature)
            .bind(&distribution_json)
            .fetch_one(&mut *tx)
            .await?;
            let id: i64 = row.try_get("id")?;
            let created_at_us: i64 = row.try_get("created_at_us")?;

            let pruned = sqlx::query(
                "DELETE FROM upload_summaries WHERE id NOT IN (SELECT id FROM upload_summaries ORDER BY created_at_us DESC, id DESC LIMIT ?1)",
            )
            .bind(retention_limit)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            Ok::<_, sqlx::Error>((gate, tx, id, created_at_us, pruned))
        })
        .await
        .map_err(|_| StoreError::Timeout)??;

        tx.commit().await?;
        drop(gate);

        tracing::debug!(summary_id = id, pruned, "summary stored");

        let created_at = from_micros(id, created_at_us)?;
        Ok(UploadSummary {
            id,
            created_at,
            stats: stats.clone(),
        })
    }

    /// Most recent summaries, newest first (ties by id, descending).
    /// `limit` is capped at the retention limit.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<UploadSummary>, StoreError> {
        let limit = limit.min(self.retention_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at_us DESC, id DESC LIMIT ?1");
        let rows = tokio::time::timeout(
            self.write_timeout,
            sqlx::query(&sql).bind(limit as i64).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        rows.iter().map(summary_from_row).collect()
    }

    pub async fn latest(&self) -> Result<Option<UploadSummary>, StoreError> {
        Ok(self.list_recent(1).await?.into_iter().next())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = tokio::time::timeout(
            self.write_timeout,
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM upload_summaries").fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(count.max(0) as usize)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            Duration::from_millis(500),
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn is_in_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

fn from_micros(id: i64, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("created_at_us {} out of range", micros),
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<UploadSummary, StoreError> {
    let id: i64 = row.try_get("id")?;
    let created_at_us: i64 = row.try_get("created_at_us")?;
    let total_equipment: i64 = row.try_get("total_equipment")?;
    let distribution_json: String = row.try_get("distribution_json")?;

    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let equipment_type_distribution = serde_json::from_str::<TypeDistribution>(&distribution_json)
        .map_err(|err| corrupt(format!("distribution: {}", err)))?;

    let stats = SummaryStats {
        total_equipment: u64::try_from(total_equipment)
            .map_err(|_| corrupt("negative total_equipment".to_string()))?,
        average_flowrate: row.try_get("average_flowrate")?,
        average_pressure: row.try_get("average_pressure")?,
        average_temperature: row.try_get("average_temperature")?,
        equipment_type_distribution,
    };
    stats
        .validate()
        .map_err(|reason| corrupt(reason.to_string()))?;

    Ok(UploadSummary {
        id,
        created_at: from_micros(id, created_at_us)?,
        stats,
    })
}
