//! Durable task storage.
//!
//! [`TaskStore`] is the persistence seam of the task manager. The default
//! implementation is [`sqlite::SqliteTaskStore`]; another backend only has
//! to implement this trait.
//!
//! All trait methods use `impl Future` in their signatures so no
//! `async-trait` boxing is needed on the hot path.

pub mod sqlite;

use std::future::Future;

use webhub_types::{Task, TaskStatus};

use crate::error::RelayError;

pub use sqlite::SqliteTaskStore;

pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new task. Fails if the id already exists.
    fn insert(&self, task: &Task) -> impl Future<Output = Result<(), RelayError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Task>, RelayError>> + Send;

    /// Overwrite the stored task only if its persisted status is still
    /// `expected`. Returns `false` when the guard did not match.
    fn compare_and_set(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> impl Future<Output = Result<bool, RelayError>> + Send;

    /// Task created from post `post_id` of `forum`, if any.
    fn find_by_post(
        &self,
        forum: &str,
        post_id: &str,
    ) -> impl Future<Output = Result<Option<Task>, RelayError>> + Send;

    /// Every stored task, used to rebuild in-memory indexes.
    fn load_all(&self) -> impl Future<Output = Result<Vec<Task>, RelayError>> + Send;
}
