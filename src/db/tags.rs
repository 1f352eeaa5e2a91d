//! Tag storage. Tags are global; names are unique.

use super::Database;
use super::projects::validate_color;
use crate::error::ApiError;
use crate::types::{TAG_COLOR_DEFAULT, Tag};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

/// Tags linked to each of `task_ids`, grouped by task.
pub(crate) fn tags_for_tasks(
    conn: &Connection,
    task_ids: &[i64],
) -> Result<std::collections::HashMap<i64, Vec<Tag>>> {
    let mut by_task: std::collections::HashMap<i64, Vec<Tag>> = std::collections::HashMap::new();
    if task_ids.is_empty() {
        return Ok(by_task);
    }

    let sql = format!(
        "SELECT tt.task_id, g.id, g.name, g.color
         FROM task_tags tt JOIN tags g ON g.id = tt.tag_id
         WHERE tt.task_id IN ({})
         ORDER BY g.name",
        super::placeholders(1, task_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(task_ids.iter()), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Tag {
                id: row.get(1)?,
                name: row.get(2)?,
                color: row.get(3)?,
            },
        ))
    })?;

    for row in rows {
        let (task_id, tag) = row?;
        by_task.entry(task_id).or_default().push(tag);
    }
    Ok(by_task)
}

/// Ids from `tag_ids` that do not exist.
pub(crate) fn missing_tags(conn: &Connection, tag_ids: &[i64]) -> Result<Vec<i64>> {
    let mut missing = Vec::new();
    for &tag_id in tag_ids {
        let exists = conn
            .query_row("SELECT 1 FROM tags WHERE id = ?1", params![tag_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            missing.push(tag_id);
        }
    }
    Ok(missing)
}

/// Replace the tag set of a task.
pub(crate) fn sync_task_tags(conn: &Connection, task_id: i64, tag_ids: &[i64]) -> Result<()> {
    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id])?;
    for tag_id in tag_ids {
        conn.execute(
            "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
            params![task_id, tag_id],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn create_tag(&self, name: &str, color: Option<&str>) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::missing_field("name").into());
        }
        if name.chars().count() > 100 {
            return Err(ApiError::invalid_value("name", "Tag name must be at most 100 characters").into());
        }
        let color = color.unwrap_or(TAG_COLOR_DEFAULT);
        validate_color("color", color)?;

        let tag = self.with_conn(|conn| {
            let taken = conn
                .query_row("SELECT 1 FROM tags WHERE name = ?1", params![name], |_| Ok(()))
                .optional()?
                .is_some();
            if taken {
                return Err(ApiError::already_exists(
                    "name",
                    format!("Tag '{}' already exists", name),
                )
                .into());
            }

            conn.execute(
                "INSERT INTO tags (name, color) VALUES (?1, ?2)",
                params![name, color],
            )?;
            Ok(Tag {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                color: color.to_string(),
            })
        })?;

        info!(tag_id = tag.id, name = %tag.name, "Tag created");
        Ok(tag)
    }

    pub fn get_tag(&self, tag_id: i64) -> Result<Option<Tag>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, color FROM tags WHERE id = ?1",
                    params![tag_id],
                    |row| {
                        Ok(Tag {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            color: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, color FROM tags ORDER BY name")?;
            let tags = stmt
                .query_map([], |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        color: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
    }

    /// Delete a tag; links to tasks go with it.
    pub fn delete_tag(&self, tag_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
            Ok(deleted > 0)
        })
    }
}
