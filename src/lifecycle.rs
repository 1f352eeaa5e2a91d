//! Task lifecycle rules: status side effects, editor stamping, write
//! validation and history change payloads.
//!
//! Everything here is pure over `Task` values; the database layer calls
//! in before writing and after reading back.

use crate::error::ApiError;
use crate::types::{PRIORITY_MAX, PRIORITY_MIN, Priority, Task, TaskStatus};
use serde_json::{Map, Value, json};

/// Move a task to `status`, maintaining the `completed_at` invariant.
///
/// `completed_at` is set when entering `done` without one and cleared when
/// leaving `done`. An existing completion time survives a `done -> done` write.
pub fn apply_status(task: &mut Task, status: TaskStatus, now: i64) {
    task.status = status;
    if status == TaskStatus::Done {
        if task.completed_at.is_none() {
            task.completed_at = Some(now);
        }
    } else if task.completed_at.is_some() {
        task.completed_at = None;
    }
}

/// Record `actor` as editor when they are not the task's author.
pub fn stamp_editor(task: &mut Task, actor: i64) {
    if actor != task.author_id {
        task.editor_id = Some(actor);
    }
}

pub fn validate_priority(priority: Priority) -> Result<(), ApiError> {
    if (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        Ok(())
    } else {
        Err(ApiError::invalid_value(
            "priority",
            format!(
                "Priority must be between {} and {}, got {}",
                PRIORITY_MIN, PRIORITY_MAX, priority
            ),
        ))
    }
}

/// A due date supplied on creation may not lie in the past.
pub fn validate_initial_due_date(due_date: Option<i64>, now: i64) -> Result<(), ApiError> {
    match due_date {
        Some(due) if due < now => Err(ApiError::invalid_value(
            "due_date",
            "Due date cannot be in the past",
        )),
        _ => Ok(()),
    }
}

pub fn validate_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::missing_field("title"));
    }
    if title.chars().count() > 255 {
        return Err(ApiError::invalid_value(
            "title",
            "Title must be at most 255 characters",
        ));
    }
    Ok(())
}

fn tag_ids(task: &Task) -> Vec<i64> {
    let mut ids: Vec<i64> = task.tags.iter().map(|t| t.id).collect();
    ids.sort_unstable();
    ids
}

/// Field snapshot stored with a `created` history entry.
pub fn created_changes(task: &Task) -> Value {
    json!({
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "due_date": task.due_date,
        "project_id": task.project_id,
        "tags": tag_ids(task),
    })
}

/// `{field: {old, new}}` for every tracked field that differs.
/// Returns `None` when the write changed nothing.
pub fn diff_changes(old: &Task, new: &Task) -> Option<Value> {
    let mut changes = Map::new();
    let mut track = |field: &str, before: Value, after: Value| {
        if before != after {
            changes.insert(field.to_string(), json!({ "old": before, "new": after }));
        }
    };

    track("title", json!(old.title), json!(new.title));
    track("description", json!(old.description), json!(new.description));
    track("status", json!(old.status), json!(new.status));
    track("priority", json!(old.priority), json!(new.priority));
    track("due_date", json!(old.due_date), json!(new.due_date));
    track("completed_at", json!(old.completed_at), json!(new.completed_at));
    track("project_id", json!(old.project_id), json!(new.project_id));
    track("editor_id", json!(old.editor_id), json!(new.editor_id));
    track("tags", json!(tag_ids(old)), json!(tag_ids(new)));

    if changes.is_empty() {
        None
    } else {
        Some(Value::Object(changes))
    }
}

pub fn deleted_changes(task: &Task) -> Value {
    json!({ "title": task.title })
}
