//! Core types for the taskflow server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task priority, 1 (highest) through 5 (lowest).
pub type Priority = i32;

pub const PRIORITY_MIN: Priority = 1;
pub const PRIORITY_MAX: Priority = 5;
pub const PRIORITY_DEFAULT: Priority = 3;

pub const PROJECT_COLOR_DEFAULT: &str = "#3498db";
pub const TAG_COLOR_DEFAULT: &str = "#95a5a6";

/// A registered user. The API token is the identity key handed to the auth context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub date_joined: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub color: String,
    pub owner_id: i64,
    pub owner_username: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
}

/// Task status. Any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Backlog,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Backlog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Backlog => "backlog",
        }
    }

    /// Human-readable label.
    pub fn display_name(self) -> &'static str {
        match self {
            TaskStatus::Todo => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
            TaskStatus::Backlog => "Backlog",
        }
    }

    /// Statuses that count as closed for the overdue and upcoming views.
    pub fn is_closed(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Backlog)
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown status: {}", s))
    }
}

/// A task. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<i64>,
    pub completed_at: Option<i64>,
    pub project_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub editor_id: Option<i64>,
    pub tags: Vec<Tag>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub content: String,
    pub task_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Coarse attachment category derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Document,
    Archive,
    Other,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Archive => "archive",
            FileType::Other => "other",
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileType::Image),
            "document" => Ok(FileType::Document),
            "archive" => Ok(FileType::Archive),
            "other" => Ok(FileType::Other),
            _ => Err(format!("Unknown file type: {}", s)),
        }
    }
}

/// A file attached to a task. `file` is the blob store reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub task_id: i64,
    pub file: String,
    pub file_type: Option<FileType>,
    pub original_name: String,
    pub file_size: i64,
    pub uploaded_by: Option<i64>,
    pub uploaded_by_username: Option<String>,
    pub description: String,
    pub uploaded_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    Deleted,
}

impl HistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Deleted => "deleted",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "deleted" => Ok(HistoryAction::Deleted),
            _ => Err(format!("Unknown history action: {}", s)),
        }
    }
}

/// One entry of the append-only task history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    pub task_title: String,
    pub action: HistoryAction,
    pub changes: serde_json::Value,
    pub changed_by: Option<i64>,
    pub changed_at: i64,
}
