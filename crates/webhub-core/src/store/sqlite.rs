//! SQLite implementation of [`TaskStore`].
//!
//! `sqlx::migrate!("./migrations")` is resolved at compile time relative to
//! the crate root, so the schema ships inside the binary. Queries use the
//! runtime-checked `sqlx::query` form; no `DATABASE_URL` is needed to build.

use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use webhub_types::{Task, TaskStatus};

use super::TaskStore;
use crate::error::RelayError;

#[derive(Clone, Debug)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `sqlite::memory:` gets a single-connection pool, since every new
    /// connection to an in-memory database would see an empty schema.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, RelayError> {
        Self::connect("sqlite::memory:").await
    }
}

fn timestamp(at: chrono::DateTime<Utc>) -> String {
    // Fixed width so that lexical order matches time order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(body: &str) -> Result<Task, RelayError> {
    Ok(Task::from_json(body)?)
}

impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), RelayError> {
        let body = task.to_json()?;
        let now = timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO tasks \
             (id, task_type, status, priority_rank, forum_name, post_id, worker_id, \
              retry_count, created_at, updated_at, body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&task.id)
        .bind(task.task_type.as_ref())
        .bind(task.status.as_ref())
        .bind(task.priority.rank())
        .bind(task.forum_name())
        .bind(task.post_id())
        .bind(task.worker_id.as_deref())
        .bind(i64::from(task.retry_count))
        .bind(timestamp(task.created_at))
        .bind(&now)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, RelayError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn compare_and_set(&self, task: &Task, expected: TaskStatus) -> Result<bool, RelayError> {
        let body = task.to_json()?;
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE tasks SET status = ?1, worker_id = ?2, retry_count = ?3, \
             updated_at = ?4, body = ?5 \
             WHERE id = ?6 AND status = ?7",
        )
        .bind(task.status.as_ref())
        .bind(task.worker_id.as_deref())
        .bind(i64::from(task.retry_count))
        .bind(&now)
        .bind(&body)
        .bind(&task.id)
        .bind(expected.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_by_post(&self, forum: &str, post_id: &str) -> Result<Option<Task>, RelayError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM tasks WHERE forum_name = ?1 AND post_id = ?2 \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(forum)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn load_all(&self) -> Result<Vec<Task>, RelayError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(body,)| decode(body)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use webhub_types::{Payload, TaskPriority, TaskSource, TtsPayload, meta};

    fn task(post: &str) -> Task {
        let mut metadata = BTreeMap::new();
        metadata.insert(meta::FORUM_NAME.into(), "main".into());
        metadata.insert(meta::POST_ID.into(), post.into());
        Task::new(
            TaskSource::ForumPost,
            Payload::Tts(TtsPayload {
                text: "hello".into(),
                title: "t".into(),
            }),
            metadata,
            TaskPriority::Normal,
            3,
        )
    }

    #[tokio::test]
    async fn insert_then_get_returns_same_task() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        let t = task("1");
        store.insert(&t).await.unwrap();
        assert_eq!(store.get(&t.id).await.unwrap(), Some(t));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        let t = task("1");
        store.insert(&t).await.unwrap();
        assert!(matches!(store.insert(&t).await, Err(RelayError::Store(_))));
    }

    #[tokio::test]
    async fn compare_and_set_guards_on_status() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        let mut t = task("1");
        store.insert(&t).await.unwrap();

        t.status = TaskStatus::Assigned;
        assert!(store.compare_and_set(&t, TaskStatus::Pending).await.unwrap());
        // Second claim sees ASSIGNED, not PENDING.
        assert!(!store.compare_and_set(&t, TaskStatus::Pending).await.unwrap());
        let stored = store.get(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Assigned);
    }

    #[tokio::test]
    async fn find_by_post_uses_forum_and_post() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        let t = task("77");
        store.insert(&t).await.unwrap();
        let found = store.find_by_post("main", "77").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(t.id.clone()));
        assert!(store.find_by_post("other", "77").await.unwrap().is_none());
        assert!(store.find_by_post("main", "78").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_is_creation_ordered() {
        let store = SqliteTaskStore::in_memory().await.unwrap();
        let a = task("1");
        let mut b = task("2");
        b.created_at = a.created_at + chrono::Duration::seconds(1);
        store.insert(&b).await.unwrap();
        store.insert(&a).await.unwrap();
        let ids: Vec<_> = store.load_all().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
