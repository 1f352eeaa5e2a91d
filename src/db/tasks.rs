//! Task CRUD with lifecycle rules applied on every write.

use super::attachments::{attachments_for_tasks, remove_blobs};
use super::history::append_history;
use super::projects::get_project_internal;
use super::tags::{missing_tags, sync_task_tags, tags_for_tasks};
use super::{Database, now_ms};
use crate::blob::BlobStore;
use crate::error::ApiError;
use crate::lifecycle::{
    apply_status, created_changes, deleted_changes, diff_changes, stamp_editor,
    validate_initial_due_date, validate_priority, validate_title,
};
use crate::types::{
    Attachment, HistoryAction, PRIORITY_DEFAULT, Priority, Project, Task, TaskStatus, User,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use tracing::info;

pub(crate) const TASK_SELECT: &str = "SELECT t.id, t.title, t.description, t.status, t.priority, t.due_date,
            t.completed_at, t.project_id, t.author_id, u.username, t.editor_id,
            t.created_at, t.updated_at
     FROM tasks t JOIN users u ON u.id = t.author_id";

/// Parse a task row selected with [`TASK_SELECT`]. Tags are loaded separately.
pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        priority: row.get(4)?,
        due_date: row.get(5)?,
        completed_at: row.get(6)?,
        project_id: row.get(7)?,
        author_id: row.get(8)?,
        author_username: row.get(9)?,
        editor_id: row.get(10)?,
        tags: Vec::new(),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Fill in the tag sets of `tasks` with one query.
pub(crate) fn attach_tags(conn: &Connection, tasks: &mut [Task]) -> Result<()> {
    let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
    let mut by_task = tags_for_tasks(conn, &ids)?;
    for task in tasks.iter_mut() {
        task.tags = by_task.remove(&task.id).unwrap_or_default();
    }
    Ok(())
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(
    conn: &Connection,
    caller_id: i64,
    task_id: i64,
) -> Result<Option<Task>> {
    let sql = format!("{} WHERE t.id = ?1 AND t.author_id = ?2", TASK_SELECT);
    let task = conn
        .query_row(&sql, params![task_id, caller_id], parse_task_row)
        .optional()?;

    match task {
        Some(task) => {
            let mut tasks = [task];
            attach_tags(conn, &mut tasks)?;
            let [task] = tasks;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// Whether `author_id` already has a task titled exactly `title`.
fn title_taken(
    conn: &Connection,
    author_id: i64,
    title: &str,
    exclude_task: Option<i64>,
) -> Result<bool> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM tasks WHERE author_id = ?1 AND title = ?2 AND id != ?3",
            params![author_id, title, exclude_task.unwrap_or(-1)],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(taken)
}

fn duplicate_title(title: &str) -> ApiError {
    ApiError::already_exists("title", format!("You already have a task titled '{}'", title))
}

fn check_project(conn: &Connection, caller: &User, project_id: i64) -> Result<()> {
    if get_project_internal(conn, caller.id, project_id)?.is_none() {
        return Err(ApiError::invalid_value(
            "project_id",
            format!("Invalid project id {}: object does not exist", project_id),
        )
        .into());
    }
    Ok(())
}

fn check_tags(conn: &Connection, tag_ids: &[i64]) -> Result<()> {
    let missing = missing_tags(conn, tag_ids)?;
    if !missing.is_empty() {
        let ids: Vec<String> = missing.iter().map(|id| id.to_string()).collect();
        return Err(ApiError::invalid_value(
            "tags_ids",
            format!("Invalid tag id(s): {}", ids.join(", ")),
        )
        .into());
    }
    Ok(())
}

/// Delete a task row (comments, attachments and tag links cascade) and log it.
/// Returns the deleted task and the blob references of its attachments.
pub(crate) fn delete_task_rows(
    conn: &Connection,
    caller: &User,
    task_id: i64,
) -> Result<Option<(Task, Vec<String>)>> {
    let Some(task) = get_task_internal(conn, caller.id, task_id)? else {
        return Ok(None);
    };

    let files: Vec<String> = {
        let mut stmt = conn.prepare("SELECT file FROM attachments WHERE task_id = ?1")?;
        stmt.query_map(params![task_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };

    conn.execute(
        "DELETE FROM tasks WHERE id = ?1 AND author_id = ?2",
        params![task_id, caller.id],
    )?;
    append_history(
        conn,
        &task,
        HistoryAction::Deleted,
        &deleted_changes(&task),
        Some(caller.id),
    )?;

    Ok(Some((task, files)))
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<i64>,
    pub project_id: i64,
    pub tag_ids: Vec<i64>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, project_id: i64) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            status: TaskStatus::default(),
            priority: PRIORITY_DEFAULT,
            due_date: None,
            project_id,
            tag_ids: Vec::new(),
        }
    }
}

/// Fields a task update may change. `due_date: Some(None)` clears the due date.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<i64>>,
    pub project_id: Option<i64>,
    pub tag_ids: Option<Vec<i64>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A task with the related records its API representation nests.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub task: Task,
    pub project: Option<Project>,
    pub attachments: Vec<Attachment>,
}

impl Database {
    /// Create a task authored by `caller`.
    pub fn create_task(&self, caller: &User, input: NewTask) -> Result<Task> {
        let now = now_ms();
        validate_title(&input.title)?;
        validate_priority(input.priority)?;
        validate_initial_due_date(input.due_date, now)?;

        let mut draft = Task {
            id: 0,
            title: input.title,
            description: input.description,
            status: TaskStatus::Todo,
            priority: input.priority,
            due_date: input.due_date,
            completed_at: None,
            project_id: input.project_id,
            author_id: caller.id,
            author_username: caller.username.clone(),
            editor_id: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        apply_status(&mut draft, input.status, now);

        let task = self.with_conn_mut(|conn| {
            check_project(conn, caller, draft.project_id)?;
            check_tags(conn, &input.tag_ids)?;
            if title_taken(conn, caller.id, &draft.title, None)? {
                return Err(duplicate_title(&draft.title).into());
            }

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tasks (
                    title, description, status, priority, due_date, completed_at,
                    project_id, author_id, editor_id, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)",
                params![
                    draft.title,
                    draft.description,
                    draft.status.as_str(),
                    draft.priority,
                    draft.due_date,
                    draft.completed_at,
                    draft.project_id,
                    caller.id,
                    now,
                ],
            )?;
            let task_id = tx.last_insert_rowid();
            sync_task_tags(&tx, task_id, &input.tag_ids)?;

            let task = get_task_internal(&tx, caller.id, task_id)?
                .ok_or_else(|| ApiError::task_not_found(task_id))?;
            append_history(
                &tx,
                &task,
                HistoryAction::Created,
                &created_changes(&task),
                Some(caller.id),
            )?;
            tx.commit()?;
            Ok(task)
        })?;

        info!(task_id = task.id, author = %caller.username, "Task created");
        Ok(task)
    }

    /// Get a task visible to `caller`.
    pub fn get_task(&self, caller: &User, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, caller.id, task_id))
    }

    /// Apply `patch` to one of the caller's tasks.
    pub fn update_task(&self, caller: &User, task_id: i64, patch: TaskPatch) -> Result<Task> {
        let now = now_ms();
        if let Some(ref title) = patch.title {
            validate_title(title)?;
        }
        if let Some(priority) = patch.priority {
            validate_priority(priority)?;
        }

        let task = self.with_conn_mut(|conn| {
            let old = get_task_internal(conn, caller.id, task_id)?
                .ok_or_else(|| ApiError::task_not_found(task_id))?;
            let mut task = old.clone();

            if let Some(title) = patch.title {
                if title != old.title && title_taken(conn, old.author_id, &title, Some(task_id))? {
                    return Err(duplicate_title(&title).into());
                }
                task.title = title;
            }
            if let Some(description) = patch.description {
                task.description = description;
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(due_date) = patch.due_date {
                task.due_date = due_date;
            }
            if let Some(project_id) = patch.project_id {
                check_project(conn, caller, project_id)?;
                task.project_id = project_id;
            }
            if let Some(ref tag_ids) = patch.tag_ids {
                check_tags(conn, tag_ids)?;
            }
            if let Some(status) = patch.status {
                apply_status(&mut task, status, now);
            }
            stamp_editor(&mut task, caller.id);
            task.updated_at = now;

            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                     due_date = ?5, completed_at = ?6, project_id = ?7, editor_id = ?8,
                     updated_at = ?9
                 WHERE id = ?10 AND author_id = ?11",
                params![
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority,
                    task.due_date,
                    task.completed_at,
                    task.project_id,
                    task.editor_id,
                    task.updated_at,
                    task_id,
                    caller.id,
                ],
            )?;
            if let Some(ref tag_ids) = patch.tag_ids {
                sync_task_tags(&tx, task_id, tag_ids)?;
            }

            let task = get_task_internal(&tx, caller.id, task_id)?
                .ok_or_else(|| ApiError::task_not_found(task_id))?;
            if let Some(changes) = diff_changes(&old, &task) {
                append_history(&tx, &task, HistoryAction::Updated, &changes, Some(caller.id))?;
            }
            tx.commit()?;
            Ok(task)
        })?;

        info!(task_id, editor = %caller.username, status = %task.status, "Task updated");
        Ok(task)
    }

    /// Move a task to `status`; lifecycle side effects apply.
    pub fn change_status(&self, caller: &User, task_id: i64, status: TaskStatus) -> Result<Task> {
        self.update_task(caller, task_id, TaskPatch::status(status))
    }

    /// Hard-delete a task. Attachment blobs are removed best-effort afterwards.
    pub fn delete_task(&self, caller: &User, task_id: i64, blobs: &dyn BlobStore) -> Result<bool> {
        let deleted = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = delete_task_rows(&tx, caller, task_id)?;
            tx.commit()?;
            Ok(deleted)
        })?;

        match deleted {
            Some((task, files)) => {
                remove_blobs(blobs, &files);
                info!(task_id, title = %task.title, author = %caller.username, "Task deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load the project and attachments nested in each task's representation.
    pub fn task_details(&self, caller: &User, tasks: Vec<Task>) -> Result<Vec<TaskDetail>> {
        self.with_conn(|conn| {
            let task_ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
            let mut attachments = attachments_for_tasks(conn, &task_ids)?;

            let mut projects: HashMap<i64, Option<Project>> = HashMap::new();
            let mut details = Vec::with_capacity(tasks.len());
            for task in tasks {
                let project = match projects.get(&task.project_id) {
                    Some(project) => project.clone(),
                    None => {
                        let project = get_project_internal(conn, caller.id, task.project_id)?;
                        projects.insert(task.project_id, project.clone());
                        project
                    }
                };
                details.push(TaskDetail {
                    attachments: attachments.remove(&task.id).unwrap_or_default(),
                    project,
                    task,
                });
            }
            Ok(details)
        })
    }
}
