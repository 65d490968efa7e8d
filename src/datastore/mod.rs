mod error;
mod filter;
mod memory;
mod shard;
mod stats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::StorageError;
pub use filter::{Filter, Page};
pub use memory::{ShardedMemoryStorage, DEFAULT_MAX_TASKS};
pub use stats::{StorageStats, StorageUsage};

use crate::model::{NewTask, Task, TaskStatus, TaskUpdate};

/// Contract every task backend satisfies.
///
/// Reads hand out owned copies; callers never see the stored records.
/// Cross-record reads (`items` and the helpers built on it) are not atomic
/// snapshots of the whole store.
#[async_trait]
pub trait TaskStorage: Sync + Send + 'static {
    async fn create(&self, new_task: NewTask) -> Result<Task, StorageError>;
    async fn get_by_id(&self, id: &str) -> Result<Task, StorageError>;
    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, StorageError>;
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
    async fn count(&self) -> usize;
    async fn clear(&self);
    async fn health_check(&self) -> Result<(), StorageError>;
    async fn items(&self, filter: &Filter) -> Vec<Task>;
    async fn stats(&self) -> StorageStats;
    async fn usage(&self) -> StorageUsage;
    fn max_tasks(&self) -> usize;

    async fn get_all(&self) -> Vec<Task> {
        self.items(&Filter::default()).await
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.items(&Filter::status(status)).await
    }

    async fn tasks_created_after(&self, after: DateTime<Utc>) -> Vec<Task> {
        self.items(&Filter::created_after(after)).await
    }

    async fn tasks_paginated(&self, offset: usize, limit: usize) -> Page {
        Page::from_items(self.get_all().await, offset, limit)
    }
}
