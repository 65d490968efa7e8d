use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::{ModelError, MAX_NAME_LEN};

/// Completion state of a task. Travels over the wire as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum Status {
    Incomplete = 0,
    Completed = 1,
}

impl Default for Status {
    fn default() -> Self {
        Status::Incomplete
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Incomplete => f.write_str("incomplete"),
            Status::Completed => f.write_str("completed"),
        }
    }
}

impl TryFrom<i64> for Status {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Incomplete),
            1 => Ok(Status::Completed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

impl From<Status> for u8 {
    fn from(s: Status) -> Self {
        s as u8
    }
}

/// Accepts either the integer code or the lowercase name.
impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "incomplete" => Ok(Status::Incomplete),
            "1" | "completed" => Ok(Status::Completed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

pub fn validate_name(name: &str) -> Result<(), ModelError> {
    if name.is_empty() {
        return Err(ModelError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_NAME_LEN {
        return Err(ModelError::NameTooLong(len));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task is the stored record. Only the store builds one, through `Task::new`.
impl Task {
    pub fn new(name: String, status: Status) -> Task {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().hyphenated().to_string(),
            name,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    // wall clock may step back, updated_at must not
    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub status: Status,
}

impl NewTask {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        validate_name(&self.name)
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl TaskUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            status: None,
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            name: None,
            status: Some(status),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match &self.name {
            Some(name) => validate_name(name),
            None => Ok(()),
        }
    }

    pub fn has_updates(&self) -> bool {
        self.name.is_some() || self.status.is_some()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if self.has_updates() {
            task.touch();
        }
    }
}
