use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{StoreError, SyncError, SyncResult};

/// Task priority. Wire tokens are the lowercase variant names.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All priorities in display order.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown priority token: {0:?}")]
pub struct UnknownPriority(pub String);

/// Why a remote record cannot become a local task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    #[error(transparent)]
    Priority(#[from] UnknownPriority),
    #[error("record has a blank name")]
    BlankName,
}

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPriority(s.to_string()))
    }
}

/// A to-do item as held by the local repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub identifier: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complete: bool,
}

impl Task {
    /// Create a task with a freshly generated identifier.
    pub fn new(
        name: impl Into<String>,
        notes: Option<String>,
        priority: Priority,
        complete: bool,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StoreError::Invalid("name must not be empty".into()));
        }
        Ok(Self {
            identifier: Some(Uuid::new_v4()),
            name,
            notes,
            priority,
            complete,
        })
    }

    /// Build a local task from a remote record already keyed by `id`.
    pub fn from_representation(
        id: Uuid,
        rep: &TaskRepresentation,
    ) -> Result<Self, InvalidRecord> {
        Ok(Self {
            identifier: Some(id),
            name: rep.name.clone(),
            notes: rep.notes.clone(),
            priority: rep.validate()?,
            complete: rep.complete,
        })
    }

    /// Overwrite every synced field from `rep`. The identifier is left alone.
    /// Nothing is written when the record is invalid.
    pub fn apply_representation(&mut self, rep: &TaskRepresentation) -> Result<(), InvalidRecord> {
        let priority = rep.validate()?;
        self.name = rep.name.clone();
        self.notes = rep.notes.clone();
        self.priority = priority;
        self.complete = rep.complete;
        Ok(())
    }

    /// The wire representation of this task.
    pub fn representation(&self) -> SyncResult<TaskRepresentation> {
        let id = self.identifier.ok_or(SyncError::MissingIdentifier)?;
        if self.name.trim().is_empty() {
            return Err(SyncError::MissingRepresentation("name"));
        }
        Ok(TaskRepresentation {
            identifier: wire_id(&id),
            name: self.name.clone(),
            notes: self.notes.clone(),
            priority: self.priority.as_str().to_string(),
            complete: self.complete,
        })
    }

    pub fn toggle_complete(&mut self) {
        self.complete = !self.complete;
    }
}

/// JSON record stored in the remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRepresentation {
    pub identifier: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub priority: String,
    pub complete: bool,
}

impl TaskRepresentation {
    /// Check the fields a local task requires and return the parsed priority.
    pub fn validate(&self) -> Result<Priority, InvalidRecord> {
        if self.name.trim().is_empty() {
            return Err(InvalidRecord::BlankName);
        }
        Ok(self.priority.parse()?)
    }
}

/// Render an identifier the way the remote collection keys it.
pub fn wire_id(id: &Uuid) -> String {
    id.as_hyphenated().to_string().to_uppercase()
}

/// Parse a hyphenated UUID token, ignoring case. Other UUID spellings are rejected.
pub fn parse_identifier(s: &str) -> Option<Uuid> {
    if s.len() != 36 {
        return None;
    }
    Uuid::parse_str(s).ok()
}
