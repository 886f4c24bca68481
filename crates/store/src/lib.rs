use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::postgres::PgPoolOptions;
use todo_contracts::{Task, Timestamp};
use ulid::Ulid;

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "task store operation timed out"),
            StoreError::Sqlx(err) => write!(f, "task store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

/// One persisted task row. `into_task` converts to the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TaskRecord {
    pub task_id: String,
    pub owner_id: String,
    pub title: String,
    pub completed: bool,
    pub created_at_epoch_ms: i64,
    pub updated_at_epoch_ms: Option<i64>,
}

impl TaskRecord {
    pub fn into_task(self) -> Task {
        Task {
            id: self.task_id,
            title: self.title,
            completed: self.completed,
            owner_id: self.owner_id,
            created_at: Timestamp::from_epoch_ms(self.created_at_epoch_ms),
            updated_at: self.updated_at_epoch_ms.map(Timestamp::from_epoch_ms),
        }
    }
}

/// Durable task persistence over Postgres. Ids and timestamps are
/// assigned here, never taken from request input. Every operation is
/// a single statement, so per-record atomicity comes from the store;
/// concurrent writes to the same record are last-write-wins.
#[derive(Clone)]
pub struct TaskStore {
    pool: sqlx::PgPool,
    op_timeout: Duration,
}

impl TaskStore {
    pub async fn connect(db_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new().max_connections(8).connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, op_timeout })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, op_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Inserts a new task owned by `owner_id` and returns the fully
    /// populated record, including the generated id and creation
    /// timestamp.
    pub async fn create(
        &self,
        owner_id: &str,
        title: &str,
        completed: bool,
    ) -> Result<TaskRecord, StoreError> {
        let record = TaskRecord {
            task_id: Ulid::new().to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            completed,
            created_at_epoch_ms: unix_epoch_ms_now(),
            updated_at_epoch_ms: None,
        };

        tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO todo_tasks (task_id, owner_id, title, completed, created_at_epoch_ms) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&record.task_id)
            .bind(&record.owner_id)
            .bind(&record.title)
            .bind(record.completed)
            .bind(record.created_at_epoch_ms)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(record)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let record = tokio::time::timeout(
            self.op_timeout,
            sqlx::query_as::<_, TaskRecord>(
                "SELECT task_id, owner_id, title, completed, created_at_epoch_ms, updated_at_epoch_ms FROM todo_tasks WHERE task_id = $1",
            )
            .bind(task_id)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(record)
    }

    /// All tasks owned by `owner_id`, newest-created first. Ties on
    /// the creation millisecond break by task id descending.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let records = tokio::time::timeout(
            self.op_timeout,
            sqlx::query_as::<_, TaskRecord>(
                "SELECT task_id, owner_id, title, completed, created_at_epoch_ms, updated_at_epoch_ms FROM todo_tasks WHERE owner_id = $1 ORDER BY created_at_epoch_ms DESC, task_id DESC",
            )
            .bind(owner_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(records)
    }

    /// Applies only the supplied fields and stamps a fresh update
    /// timestamp. Returns the stamp, or `None` when no such row
    /// exists.
    pub async fn update(
        &self,
        task_id: &str,
        title: Option<&str>,
        completed: Option<bool>,
    ) -> Result<Option<i64>, StoreError> {
        let updated_at_epoch_ms = unix_epoch_ms_now();

        let result = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "UPDATE todo_tasks SET title = COALESCE($2, title), completed = COALESCE($3, completed), updated_at_epoch_ms = $4 WHERE task_id = $1",
            )
            .bind(task_id)
            .bind(title)
            .bind(completed)
            .bind(updated_at_epoch_ms)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(updated_at_epoch_ms))
    }

    /// Permanently removes the record. Returns `false` when no such
    /// row exists, so a second delete surfaces as not-found.
    pub async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        let result = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("DELETE FROM todo_tasks WHERE task_id = $1")
                .bind(task_id)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn unix_epoch_ms_now() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    duration.as_millis().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_converts_to_wire_task() {
        let record = TaskRecord {
            task_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            owner_id: "u1".to_string(),
            title: "Buy milk".to_string(),
            completed: false,
            created_at_epoch_ms: 1_700_000_000_500,
            updated_at_epoch_ms: None,
        };

        let task = record.into_task();
        assert_eq!(task.id, "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(task.owner_id, "u1");
        assert_eq!(task.created_at.seconds, 1_700_000_000);
        assert_eq!(task.created_at.nanoseconds, 500_000_000);
        assert!(task.updated_at.is_none());
    }

    #[test]
    fn record_carries_update_stamp_into_task() {
        let record = TaskRecord {
            task_id: "t1".to_string(),
            owner_id: "u1".to_string(),
            title: "Buy milk".to_string(),
            completed: true,
            created_at_epoch_ms: 1_000,
            updated_at_epoch_ms: Some(2_000),
        };

        let task = record.into_task();
        assert_eq!(task.updated_at.map(|ts| ts.seconds), Some(2));
    }
}
