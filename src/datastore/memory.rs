use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::filter::Filter;
use super::shard::{new_shards, shard_count_for, shard_index, Shard};
use super::stats::{StorageStats, StorageUsage, SHARDED_MEMORY};
use super::{StorageError, TaskStorage};
use crate::model::{NewTask, Task, TaskUpdate};

pub const DEFAULT_MAX_TASKS: usize = 10_000;

const HEALTH_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// In-memory task store split into independently locked shards.
///
/// The record count lives in an atomic outside the shard locks. Creates
/// reserve a slot on it with compare-and-swap before inserting, so the
/// ceiling holds even under concurrent creates. No operation holds more
/// than one shard lock at a time.
pub struct ShardedMemoryStorage {
    shards: Box<[Shard]>,
    max_tasks: usize,
    task_count: AtomicUsize,
}

impl ShardedMemoryStorage {
    /// `max_tasks <= 0` selects [`DEFAULT_MAX_TASKS`].
    pub fn new(max_tasks: i64) -> Self {
        let max_tasks = if max_tasks <= 0 {
            DEFAULT_MAX_TASKS
        } else {
            usize::try_from(max_tasks).unwrap_or(usize::MAX)
        };
        let shards = new_shards(shard_count_for(max_tasks));

        debug!(
            max_tasks = max_tasks,
            shard_count = shards.len(),
            "sharded memory storage created"
        );
        Self {
            shards,
            max_tasks,
            task_count: AtomicUsize::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, id: &str) -> &Shard {
        &self.shards[shard_index(id, self.shards.len())]
    }

    fn reserve_slot(&self) -> Result<(), StorageError> {
        let max_tasks = self.max_tasks;
        self.task_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < max_tasks {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .map(|_| ())
            .map_err(|_| StorageError::CapacityExceeded(max_tasks))
    }

    fn collect(&self, filter: &Filter) -> Vec<Task> {
        let capacity = if *filter == Filter::default() {
            self.task_count.load(Ordering::Acquire)
        } else {
            0
        };
        let mut items = Vec::with_capacity(capacity);
        for shard in self.shards.iter() {
            let tasks = shard.tasks.read();
            items.extend(tasks.values().filter(|task| filter.matches(task)).cloned());
        }
        items
    }
}

#[async_trait]
impl TaskStorage for ShardedMemoryStorage {
    async fn create(&self, new_task: NewTask) -> Result<Task, StorageError> {
        new_task.validate()?;

        if let Err(err) = self.reserve_slot() {
            warn!(max_tasks = self.max_tasks, "task rejected, storage is full");
            return Err(err);
        }

        // v4 ids are random enough that a collision check is not needed
        let task = Task::new(new_task.name, new_task.status);
        self.shard(&task.id)
            .tasks
            .write()
            .insert(task.id.clone(), task.clone());

        debug!(id = task.id.as_str(), "task created");
        Ok(task)
    }

    async fn get_by_id(&self, id: &str) -> Result<Task, StorageError> {
        let tasks = self.shard(id).tasks.read();
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, StorageError> {
        update.validate()?;
        if !update.has_updates() {
            return Err(StorageError::NoOpUpdate);
        }

        let mut tasks = self.shard(id).tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        update.apply_to(task);

        debug!(id = id, "task updated");
        Ok(task.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let removed = self.shard(id).tasks.write().remove(id);
        match removed {
            Some(_) => {
                self.task_count.fetch_sub(1, Ordering::AcqRel);
                debug!(id = id, "task deleted");
                Ok(())
            }
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn count(&self) -> usize {
        self.task_count.load(Ordering::Acquire)
    }

    async fn clear(&self) {
        // subtract per shard so creates racing with the clear stay counted
        for shard in self.shards.iter() {
            let mut tasks = shard.tasks.write();
            let removed = tasks.len();
            tasks.clear();
            self.task_count.fetch_sub(removed, Ordering::AcqRel);
        }
        debug!("storage cleared");
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        if self.shards.is_empty() {
            return Err(StorageError::Unhealthy(
                "memory storage shards are not initialized".to_string(),
            ));
        }
        for (i, shard) in self.shards.iter().enumerate() {
            if shard.tasks.try_read_for(HEALTH_LOCK_TIMEOUT).is_none() {
                return Err(StorageError::Unhealthy(format!(
                    "memory storage shard {} is not accessible",
                    i
                )));
            }
        }
        Ok(())
    }

    async fn items(&self, filter: &Filter) -> Vec<Task> {
        self.collect(filter)
    }

    async fn stats(&self) -> StorageStats {
        let mut completed_tasks = 0;
        let mut incomplete_tasks = 0;
        for shard in self.shards.iter() {
            let tasks = shard.tasks.read();
            let done = tasks.values().filter(|task| task.is_completed()).count();
            completed_tasks += done;
            incomplete_tasks += tasks.len() - done;
        }

        let total_tasks = self.task_count.load(Ordering::Acquire);
        StorageStats {
            total_tasks,
            completed_tasks,
            incomplete_tasks,
            max_tasks: self.max_tasks,
            available: self.max_tasks.saturating_sub(total_tasks),
            storage_type: SHARDED_MEMORY,
        }
    }

    async fn usage(&self) -> StorageUsage {
        let shard_distribution: Vec<usize> = self
            .shards
            .iter()
            .map(|shard| shard.tasks.read().len())
            .collect();

        let current_tasks = self.task_count.load(Ordering::Acquire);
        StorageUsage {
            current_tasks,
            max_tasks: self.max_tasks,
            usage_percent: StorageUsage::percent(current_tasks, self.max_tasks),
            available: self.max_tasks.saturating_sub(current_tasks),
            shard_count: self.shards.len(),
            shard_distribution,
            storage_type: SHARDED_MEMORY,
        }
    }

    fn max_tasks(&self) -> usize {
        self.max_tasks
    }
}
