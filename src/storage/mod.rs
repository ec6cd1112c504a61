use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Errors surfaced by the streak store.
///
/// `NotFound` is raised explicitly by every operation that requires an
/// existing record, so the REST boundary can map it to 404 uniformly.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Streak not found")]
    NotFound,
    #[error("newCount is required for count streaks")]
    MissingDelta,
    #[error("newCount must be a number")]
    InvalidDelta,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

// ─── Streak model ─────────────────────────────────────────────────────────────

/// The two streak flavours, fixed at creation.
///
/// SIMPLE tallies occurrences; COUNT additionally accumulates a numeric total
/// and a running average. The enum is closed: requests naming any other type
/// are rejected at the boundary, and the schema carries a matching CHECK
/// constraint, so no row can hold a type the increment logic cannot advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum StreakType {
    Simple,
    Count,
}

impl StreakType {
    /// Parse the wire value (`"SIMPLE"` | `"COUNT"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIMPLE" => Some(Self::Simple),
            "COUNT" => Some(Self::Count),
            _ => None,
        }
    }
}

/// One persisted streak.
///
/// Serialized with `camelCase` keys; this struct is the wire format.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakRow {
    pub id: i64,
    pub title: String,
    pub streak_type: StreakType,
    /// Unit tag for COUNT streaks (e.g. "km", "pages"); always "NONE" for SIMPLE.
    pub datatype: String,
    /// Accumulated total; only advanced for COUNT streaks.
    pub count: f64,
    /// Number of recorded increments.
    pub streak_count: i64,
    /// count / streak_count, re-derived from the totals on every COUNT increment.
    pub average: f64,
    /// RFC-3339 timestamp of the most recent increment; NULL before the first.
    pub last_updated: Option<String>,
}

/// Caller-supplied overwrite for a full replace.
///
/// Omitted fields keep their stored value. Supplied values are trusted as-is:
/// a replace is a raw overwrite, not a recompute, and `average` is never
/// re-derived here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakOverwrite {
    pub title: Option<String>,
    pub streak_count: Option<i64>,
    pub count: Option<f64>,
    pub average: Option<f64>,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("streakd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Close the connection pool. Called once during graceful shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ─── Streaks ─────────────────────────────────────────────────────────────

    pub async fn create_streak(
        &self,
        title: &str,
        streak_type: StreakType,
        datatype: &str,
        count: f64,
        streak_count: i64,
        average: f64,
    ) -> Result<StreakRow, StoreError> {
        // The unit tag only applies to COUNT streaks.
        let datatype = match streak_type {
            StreakType::Count => datatype,
            StreakType::Simple => "NONE",
        };
        let result = sqlx::query(
            "INSERT INTO streaks (title, streak_type, datatype, count, streak_count, average)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(title)
        .bind(streak_type)
        .bind(datatype)
        .bind(count)
        .bind(streak_count)
        .bind(average)
        .execute(&self.pool)
        .await?;
        self.get_streak(result.last_insert_rowid()).await
    }

    pub async fn get_streak(&self, id: i64) -> Result<StreakRow, StoreError> {
        sqlx::query_as("SELECT * FROM streaks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_streaks(&self) -> Result<Vec<StreakRow>, StoreError> {
        Ok(sqlx::query_as("SELECT * FROM streaks ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Overwrite exactly the supplied fields; omitted fields keep their value.
    pub async fn replace_streak(
        &self,
        id: i64,
        fields: &StreakOverwrite,
    ) -> Result<StreakRow, StoreError> {
        let result = sqlx::query(
            "UPDATE streaks SET
                 title        = COALESCE(?, title),
                 streak_count = COALESCE(?, streak_count),
                 count        = COALESCE(?, count),
                 average      = COALESCE(?, average)
             WHERE id = ?",
        )
        .bind(fields.title.as_deref())
        .bind(fields.streak_count)
        .bind(fields.count)
        .bind(fields.average)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_streak(id).await
    }

    /// Record one occurrence of a streak.
    ///
    /// The delta arrives raw and is only examined on the COUNT branch,
    /// after the record's type has been read. COUNT streaks require a
    /// numeric delta (JSON number or numeric string) and advance `count`,
    /// `streak_count`, `average`, and `last_updated` in a single UPDATE
    /// whose arithmetic SQLite evaluates against the pre-update row.
    /// Concurrent increments therefore never read the same pre-increment
    /// totals and all of them are reflected. The average is re-derived
    /// from the post-increment totals on every call, never incrementally
    /// drifted.
    ///
    /// SIMPLE streaks never look at `delta`, malformed or not; only
    /// `streak_count` advances and `last_updated` refreshes.
    ///
    /// Reading the type before the write is race-free: `streak_type` is
    /// immutable after creation.
    pub async fn increment_streak(
        &self,
        id: i64,
        delta: Option<&Value>,
    ) -> Result<StreakRow, StoreError> {
        let streak = self.get_streak(id).await?;
        let now = Utc::now().to_rfc3339();
        let result = match streak.streak_type {
            StreakType::Count => {
                let delta = parse_delta(delta)?;
                sqlx::query(
                    "UPDATE streaks SET
                         count        = count + ?,
                         streak_count = streak_count + 1,
                         average      = (count + ?) / (streak_count + 1),
                         last_updated = ?
                     WHERE id = ?",
                )
                .bind(delta)
                .bind(delta)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            StreakType::Simple => {
                sqlx::query(
                    "UPDATE streaks SET
                         streak_count = streak_count + 1,
                         last_updated = ?
                     WHERE id = ?",
                )
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        // The row can only vanish between the read and the write through
        // out-of-band administrative deletion.
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_streak(id).await
    }
}

/// COUNT deltas accept JSON numbers or numeric strings. Absence (or an
/// explicit null) and non-numeric values are distinct failures; `count + NaN`
/// must never reach the stored totals.
fn parse_delta(delta: Option<&Value>) -> Result<f64, StoreError> {
    match delta {
        None | Some(Value::Null) => Err(StoreError::MissingDelta),
        Some(Value::Number(n)) => n.as_f64().ok_or(StoreError::InvalidDelta),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| StoreError::InvalidDelta),
        Some(_) => Err(StoreError::InvalidDelta),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn make_store(dir: &tempfile::TempDir) -> Storage {
        Storage::new(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn create_assigns_id_and_forces_simple_datatype_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Meditate", StreakType::Simple, "minutes", 0.0, 0, 0.0)
            .await
            .unwrap();
        assert!(streak.id >= 1);
        assert_eq!(streak.datatype, "NONE");
        assert!(streak.last_updated.is_none());

        let counted = store
            .create_streak("Run", StreakType::Count, "km", 0.0, 0, 0.0)
            .await
            .unwrap();
        assert_eq!(counted.datatype, "km");
        assert_ne!(counted.id, streak.id);
    }

    #[tokio::test]
    async fn count_increment_recomputes_average_from_totals() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Run", StreakType::Count, "km", 10.0, 2, 5.0)
            .await
            .unwrap();

        let updated = store
            .increment_streak(streak.id, Some(&json!(5.0)))
            .await
            .unwrap();
        assert_eq!(updated.count, 15.0);
        assert_eq!(updated.streak_count, 3);
        assert_eq!(updated.average, 5.0);
        assert!(updated.last_updated.is_some());
    }

    #[tokio::test]
    async fn simple_increment_ignores_delta_and_leaves_totals() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Meditate", StreakType::Simple, "NONE", 0.0, 4, 0.0)
            .await
            .unwrap();

        let updated = store
            .increment_streak(streak.id, Some(&json!(99.0)))
            .await
            .unwrap();
        assert_eq!(updated.streak_count, 5);
        assert_eq!(updated.count, 0.0);
        assert_eq!(updated.average, 0.0);
        assert!(updated.last_updated.is_some());

        // Even a malformed delta is never examined on the SIMPLE branch.
        let updated = store
            .increment_streak(streak.id, Some(&json!("not a number")))
            .await
            .unwrap();
        assert_eq!(updated.streak_count, 6);
        assert_eq!(updated.count, 0.0);
        assert_eq!(updated.average, 0.0);
    }

    #[tokio::test]
    async fn count_increment_without_delta_errors_and_leaves_row_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Run", StreakType::Count, "km", 10.0, 2, 5.0)
            .await
            .unwrap();

        let err = store.increment_streak(streak.id, None).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingDelta));

        let unchanged = store.get_streak(streak.id).await.unwrap();
        assert_eq!(unchanged, streak);
    }

    #[tokio::test]
    async fn count_increment_with_non_numeric_delta_errors_and_leaves_row_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Run", StreakType::Count, "km", 10.0, 2, 5.0)
            .await
            .unwrap();

        let err = store
            .increment_streak(streak.id, Some(&json!("abc")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDelta));

        let unchanged = store.get_streak(streak.id).await.unwrap();
        assert_eq!(unchanged, streak);
    }

    #[tokio::test]
    async fn increment_on_unknown_id_is_not_found_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let err = store
            .increment_streak(42, Some(&json!(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.list_streaks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_overwrites_only_supplied_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Run", StreakType::Count, "km", 10.0, 2, 5.0)
            .await
            .unwrap();

        let updated = store
            .replace_streak(
                streak.id,
                &StreakOverwrite {
                    title: Some("Jog".to_string()),
                    count: Some(20.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Jog");
        assert_eq!(updated.count, 20.0);
        // Untouched fields survive, and average is NOT recomputed from the
        // new count — replace is a raw overwrite.
        assert_eq!(updated.streak_count, 2);
        assert_eq!(updated.average, 5.0);
    }

    #[tokio::test]
    async fn replace_on_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let err = store
            .replace_streak(7, &StreakOverwrite::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn get_is_stable_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Read", StreakType::Simple, "NONE", 0.0, 0, 0.0)
            .await
            .unwrap();
        let first = store.get_streak(streak.id).await.unwrap();
        let second = store.get_streak(streak.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_count_increments_are_all_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = make_store(&dir).await;

        let streak = store
            .create_streak("Water", StreakType::Count, "liters", 0.0, 0, 0.0)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = streak.id;
            handles.push(tokio::spawn(async move {
                store.increment_streak(id, Some(&json!(2.0))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let settled = store.get_streak(streak.id).await.unwrap();
        assert_eq!(settled.streak_count, 8);
        assert_eq!(settled.count, 16.0);
        assert_eq!(settled.average, 2.0);
    }

    #[test]
    fn streak_row_serialises_to_camel_case() {
        let row = StreakRow {
            id: 1,
            title: "Run".to_string(),
            streak_type: StreakType::Count,
            datatype: "km".to_string(),
            count: 10.0,
            streak_count: 2,
            average: 5.0,
            last_updated: None,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"streakType\":\"COUNT\""));
        assert!(json.contains("\"streakCount\""));
        assert!(json.contains("\"lastUpdated\""));
        assert!(json.contains("\"datatype\""));
    }
}
