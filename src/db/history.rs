//! Append-only task history.
//!
//! Entries are written in the same transaction as the mutation they describe
//! and are never updated or deleted through this layer (a trigger rejects UPDATE).

use super::{Database, Page, PageRequest, now_ms};
use crate::types::{HistoryAction, Task, TaskHistory, User};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use serde_json::Value;

pub(crate) fn append_history(
    conn: &Connection,
    task: &Task,
    action: HistoryAction,
    changes: &Value,
    changed_by: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO task_history (task_id, owner_id, task_title, action, changes, changed_by, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            task.id,
            task.author_id,
            task.title,
            action.as_str(),
            serde_json::to_string(changes)?,
            changed_by,
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn parse_history_row(row: &Row) -> rusqlite::Result<TaskHistory> {
    let action: String = row.get(3)?;
    let changes: String = row.get(4)?;
    Ok(TaskHistory {
        id: row.get(0)?,
        task_id: row.get(1)?,
        task_title: row.get(2)?,
        action: action.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        changes: serde_json::from_str(&changes).unwrap_or(Value::Null),
        changed_by: row.get(5)?,
        changed_at: row.get(6)?,
    })
}

const HISTORY_SELECT: &str =
    "SELECT id, task_id, task_title, action, changes, changed_by, changed_at FROM task_history";

impl Database {
    /// History of the caller's tasks, newest first. Includes deleted tasks.
    pub fn list_history(
        &self,
        caller: &User,
        task_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<TaskHistory>> {
        self.with_conn(|conn| {
            let (where_sql, params_vec): (&str, Vec<i64>) = match task_id {
                Some(id) => (" WHERE owner_id = ?1 AND task_id = ?2", vec![caller.id, id]),
                None => (" WHERE owner_id = ?1", vec![caller.id]),
            };

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM task_history{}", where_sql),
                rusqlite::params_from_iter(params_vec.iter()),
                |row| row.get(0),
            )?;
            page.check(total)?;

            let sql = format!(
                "{}{} ORDER BY changed_at DESC, id DESC LIMIT {} OFFSET {}",
                HISTORY_SELECT,
                where_sql,
                page.page_size,
                page.offset()
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(rusqlite::params_from_iter(params_vec.iter()), parse_history_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
    }

    /// Full history of one task, newest first.
    pub fn task_history(&self, caller: &User, task_id: i64) -> Result<Vec<TaskHistory>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE owner_id = ?1 AND task_id = ?2 ORDER BY changed_at DESC, id DESC",
                HISTORY_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params![caller.id, task_id], parse_history_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }
}
