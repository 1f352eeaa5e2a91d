//! Comments on tasks.

use super::attachments::task_visible;
use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::{Comment, User};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

const COMMENT_SELECT: &str = "SELECT c.id, c.content, c.task_id, c.author_id, u.username, c.created_at, c.updated_at
     FROM comments c
     JOIN users u ON u.id = c.author_id
     JOIN tasks t ON t.id = c.task_id";

fn parse_comment_row(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        content: row.get(1)?,
        task_id: row.get(2)?,
        author_id: row.get(3)?,
        author_username: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::missing_field("content"));
    }
    Ok(())
}

/// A comment the caller wrote on one of their own tasks.
fn get_own_comment(conn: &Connection, caller_id: i64, comment_id: i64) -> Result<Option<Comment>> {
    let sql = format!(
        "{} WHERE c.id = ?1 AND c.author_id = ?2 AND t.author_id = ?2",
        COMMENT_SELECT
    );
    Ok(conn
        .query_row(&sql, params![comment_id, caller_id], parse_comment_row)
        .optional()?)
}

impl Database {
    pub fn add_comment(&self, caller: &User, task_id: i64, content: &str) -> Result<Comment> {
        validate_content(content)?;
        let now = now_ms();

        let comment = self.with_conn(|conn| {
            if !task_visible(conn, caller.id, task_id)? {
                return Err(ApiError::task_not_found(task_id).into());
            }
            conn.execute(
                "INSERT INTO comments (content, task_id, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![content, task_id, caller.id, now],
            )?;
            Ok(Comment {
                id: conn.last_insert_rowid(),
                content: content.to_string(),
                task_id,
                author_id: caller.id,
                author_username: caller.username.clone(),
                created_at: now,
                updated_at: now,
            })
        })?;

        info!(comment_id = comment.id, task_id, author = %caller.username, "Comment added");
        Ok(comment)
    }

    /// Comments on one of the caller's tasks, oldest first.
    pub fn list_comments(&self, caller: &User, task_id: i64) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            if !task_visible(conn, caller.id, task_id)? {
                return Err(ApiError::task_not_found(task_id).into());
            }
            let sql = format!(
                "{} WHERE c.task_id = ?1 ORDER BY c.created_at ASC, c.id ASC",
                COMMENT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let comments = stmt
                .query_map(params![task_id], parse_comment_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(comments)
        })
    }

    pub fn update_comment(&self, caller: &User, comment_id: i64, content: &str) -> Result<Comment> {
        validate_content(content)?;
        let now = now_ms();

        self.with_conn(|conn| {
            let mut comment = get_own_comment(conn, caller.id, comment_id)?
                .ok_or_else(|| ApiError::comment_not_found(comment_id))?;
            conn.execute(
                "UPDATE comments SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![content, now, comment_id],
            )?;
            comment.content = content.to_string();
            comment.updated_at = now;
            Ok(comment)
        })
    }

    pub fn delete_comment(&self, caller: &User, comment_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            if get_own_comment(conn, caller.id, comment_id)?.is_none() {
                return Ok(false);
            }
            conn.execute("DELETE FROM comments WHERE id = ?1", params![comment_id])?;
            info!(comment_id, author = %caller.username, "Comment deleted");
            Ok(true)
        })
    }
}
