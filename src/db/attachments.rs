//! Attachment records. Bytes live in the blob store; the row keeps the reference.

use super::{Database, Page, PageRequest, now_ms};
use crate::blob::{BlobRef, BlobStore};
use crate::classifier::prepare_for_save;
use crate::error::ApiError;
use crate::types::{Attachment, User};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use tracing::{info, warn};

const ATTACHMENT_SELECT: &str = "SELECT a.id, a.task_id, a.file, a.file_type, a.original_name, a.file_size,
            a.uploaded_by, u.username, a.description, a.uploaded_at, a.updated_at
     FROM attachments a
     JOIN tasks t ON t.id = a.task_id
     LEFT JOIN users u ON u.id = a.uploaded_by";

fn parse_attachment_row(row: &Row) -> rusqlite::Result<Attachment> {
    let file_type: Option<String> = row.get(3)?;
    Ok(Attachment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        file: row.get(2)?,
        file_type: file_type
            .map(|s| {
                s.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })
            })
            .transpose()?,
        original_name: row.get(4)?,
        file_size: row.get(5)?,
        uploaded_by: row.get(6)?,
        uploaded_by_username: row.get(7)?,
        description: row.get(8)?,
        uploaded_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn get_attachment_internal(
    conn: &Connection,
    caller_id: i64,
    attachment_id: i64,
) -> Result<Option<Attachment>> {
    let sql = format!("{} WHERE a.id = ?1 AND t.author_id = ?2", ATTACHMENT_SELECT);
    Ok(conn
        .query_row(&sql, params![attachment_id, caller_id], parse_attachment_row)
        .optional()?)
}

pub(crate) fn task_visible(conn: &Connection, caller_id: i64, task_id: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM tasks WHERE id = ?1 AND author_id = ?2",
            params![task_id, caller_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Attachments of each of `task_ids`, newest first, grouped by task.
pub(crate) fn attachments_for_tasks(
    conn: &Connection,
    task_ids: &[i64],
) -> Result<HashMap<i64, Vec<Attachment>>> {
    let mut by_task: HashMap<i64, Vec<Attachment>> = HashMap::new();
    if task_ids.is_empty() {
        return Ok(by_task);
    }

    let sql = format!(
        "{} WHERE a.task_id IN ({}) ORDER BY a.uploaded_at DESC, a.id DESC",
        ATTACHMENT_SELECT,
        super::placeholders(1, task_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(task_ids.iter()),
        parse_attachment_row,
    )?;
    for row in rows {
        let attachment = row?;
        by_task.entry(attachment.task_id).or_default().push(attachment);
    }
    Ok(by_task)
}

/// Best-effort blob removal after the owning rows are gone.
pub(crate) fn remove_blobs(blobs: &dyn BlobStore, files: &[String]) {
    for file in files {
        if let Err(e) = blobs.delete(file) {
            warn!(file = %file, error = %e, "Failed to remove attachment blob");
        }
    }
}

fn write_attachment(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        "UPDATE attachments SET file_type = ?1, original_name = ?2, file_size = ?3,
             description = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            attachment.file_type.map(|t| t.as_str()),
            attachment.original_name,
            attachment.file_size,
            attachment.description,
            attachment.updated_at,
            attachment.id,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Record an uploaded blob as an attachment of one of the caller's tasks.
    pub fn create_attachment(
        &self,
        caller: &User,
        task_id: i64,
        blob: &BlobRef,
        original_name: &str,
        description: &str,
        blobs: &dyn BlobStore,
    ) -> Result<Attachment> {
        let now = now_ms();
        let mut attachment = Attachment {
            id: 0,
            task_id,
            file: blob.name.clone(),
            file_type: None,
            original_name: original_name.trim().to_string(),
            file_size: 0,
            uploaded_by: Some(caller.id),
            uploaded_by_username: Some(caller.username.clone()),
            description: description.to_string(),
            uploaded_at: now,
            updated_at: now,
        };
        prepare_for_save(&mut attachment, blobs);

        let attachment = self.with_conn(|conn| {
            if !task_visible(conn, caller.id, task_id)? {
                return Err(ApiError::task_not_found(task_id).into());
            }
            conn.execute(
                "INSERT INTO attachments (
                    task_id, file, file_type, original_name, file_size, uploaded_by,
                    description, uploaded_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    attachment.task_id,
                    attachment.file,
                    attachment.file_type.map(|t| t.as_str()),
                    attachment.original_name,
                    attachment.file_size,
                    caller.id,
                    attachment.description,
                    now,
                ],
            )?;
            Ok(Attachment {
                id: conn.last_insert_rowid(),
                ..attachment
            })
        })?;

        info!(
            attachment_id = attachment.id,
            task_id,
            file_type = ?attachment.file_type,
            size = attachment.file_size,
            uploader = %caller.username,
            "Attachment uploaded"
        );
        Ok(attachment)
    }

    pub fn get_attachment(&self, caller: &User, attachment_id: i64) -> Result<Option<Attachment>> {
        self.with_conn(|conn| get_attachment_internal(conn, caller.id, attachment_id))
    }

    /// Attachments on the caller's tasks, newest first.
    pub fn list_attachments(
        &self,
        caller: &User,
        task_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<Attachment>> {
        self.with_conn(|conn| {
            let (where_sql, params_vec): (&str, Vec<i64>) = match task_id {
                Some(id) => (" WHERE t.author_id = ?1 AND a.task_id = ?2", vec![caller.id, id]),
                None => (" WHERE t.author_id = ?1", vec![caller.id]),
            };

            let total: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM attachments a JOIN tasks t ON t.id = a.task_id{}",
                    where_sql
                ),
                rusqlite::params_from_iter(params_vec.iter()),
                |row| row.get(0),
            )?;
            page.check(total)?;

            let sql = format!(
                "{}{} ORDER BY a.uploaded_at DESC, a.id DESC LIMIT {} OFFSET {}",
                ATTACHMENT_SELECT,
                where_sql,
                page.page_size,
                page.offset()
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(
                    rusqlite::params_from_iter(params_vec.iter()),
                    parse_attachment_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
    }

    /// Save an attachment again, optionally with a new description.
    /// Derived fields are refreshed; the file type never changes once set.
    pub fn update_attachment(
        &self,
        caller: &User,
        attachment_id: i64,
        description: Option<String>,
        blobs: &dyn BlobStore,
    ) -> Result<Attachment> {
        let mut attachment = self
            .get_attachment(caller, attachment_id)?
            .ok_or_else(|| ApiError::attachment_not_found(attachment_id))?;

        if let Some(description) = description {
            attachment.description = description;
        }
        prepare_for_save(&mut attachment, blobs);
        attachment.updated_at = now_ms();

        self.with_conn(|conn| write_attachment(conn, &attachment))?;
        Ok(attachment)
    }

    /// Delete the record, then the blob. Blob failures are logged and ignored.
    pub fn delete_attachment(
        &self,
        caller: &User,
        attachment_id: i64,
        blobs: &dyn BlobStore,
    ) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            let Some(attachment) = get_attachment_internal(conn, caller.id, attachment_id)? else {
                return Ok(None);
            };
            conn.execute("DELETE FROM attachments WHERE id = ?1", params![attachment_id])?;
            Ok(Some(attachment))
        })?;

        match deleted {
            Some(attachment) => {
                remove_blobs(blobs, std::slice::from_ref(&attachment.file));
                info!(attachment_id, task_id = attachment.task_id, "Attachment deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
