use chrono::{DateTime, Utc};
use serde_derive::Serialize;

use crate::model::{Task, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub status: Option<TaskStatus>,
    pub created_after: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            created_after: None,
        }
    }

    pub fn created_after(after: DateTime<Utc>) -> Self {
        Self {
            status: None,
            created_after: Some(after),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if task.created_at <= after {
                return false;
            }
        }
        true
    }
}

/// One slice of the ordered task list plus the size of the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub tasks: Vec<Task>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    /// Orders by creation time then id, and cuts `[offset, offset + limit)`.
    pub fn from_items(mut items: Vec<Task>, offset: usize, limit: usize) -> Self {
        let total = items.len();
        if offset >= total {
            return Self {
                tasks: vec![],
                total,
                offset,
                limit,
            };
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let end = offset.saturating_add(limit).min(total);
        let tasks = items.drain(offset..end).collect();
        Self {
            tasks,
            total,
            offset,
            limit,
        }
    }
}
