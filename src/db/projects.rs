//! Project CRUD, scoped to the owning user.

use super::tasks::delete_task_rows;
use super::{Database, Page, PageRequest, now_ms};
use crate::blob::BlobStore;
use crate::error::ApiError;
use crate::types::{PROJECT_COLOR_DEFAULT, Project, User};
use anyhow::Result;
use regex_lite::Regex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::LazyLock;
use tracing::info;

static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid")
});

/// Accept `#RRGGBB` only.
pub(crate) fn validate_color(field: &str, color: &str) -> Result<(), ApiError> {
    if HEX_COLOR.is_match(color) {
        Ok(())
    } else {
        Err(ApiError::invalid_value(
            field,
            format!("'{}' is not a hex color like #3498db", color),
        ))
    }
}

fn validate_project_title(title: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() {
        return Err(ApiError::invalid_value("title", "Project title cannot be empty"));
    }
    if title.chars().count() > 255 {
        return Err(ApiError::invalid_value(
            "title",
            "Project title must be at most 255 characters",
        ));
    }
    Ok(())
}

const PROJECT_SELECT: &str = "SELECT p.id, p.title, p.color, p.owner_id, u.username, p.created_at, p.updated_at
     FROM projects p JOIN users u ON u.id = p.owner_id";

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        color: row.get(2)?,
        owner_id: row.get(3)?,
        owner_username: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn get_project_internal(
    conn: &Connection,
    owner_id: i64,
    project_id: i64,
) -> Result<Option<Project>> {
    let sql = format!("{} WHERE p.id = ?1 AND p.owner_id = ?2", PROJECT_SELECT);
    Ok(conn
        .query_row(&sql, params![project_id, owner_id], parse_project_row)
        .optional()?)
}

/// Fields a project update may change.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub color: Option<String>,
}

impl Database {
    pub fn create_project(
        &self,
        caller: &User,
        title: &str,
        color: Option<&str>,
    ) -> Result<Project> {
        validate_project_title(title)?;
        let color = color.unwrap_or(PROJECT_COLOR_DEFAULT);
        validate_color("color", color)?;
        let now = now_ms();

        let project = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (title, color, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![title, color, caller.id, now],
            )?;
            Ok(Project {
                id: conn.last_insert_rowid(),
                title: title.to_string(),
                color: color.to_string(),
                owner_id: caller.id,
                owner_username: caller.username.clone(),
                created_at: now,
                updated_at: now,
            })
        })?;

        info!(project_id = project.id, owner = %caller.username, "Project created");
        Ok(project)
    }

    pub fn get_project(&self, caller: &User, project_id: i64) -> Result<Option<Project>> {
        self.with_conn(|conn| get_project_internal(conn, caller.id, project_id))
    }

    /// Caller's projects, newest first, optionally filtered by title substring.
    pub fn list_projects(
        &self,
        caller: &User,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Project>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());

        self.with_conn(|conn| {
            let mut where_sql = String::from(" WHERE p.owner_id = ?1");
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(caller.id)];

            if let Some(term) = search {
                where_sql.push_str(" AND instr(unicode_lower(p.title), ?2) > 0");
                params_vec.push(Box::new(term.to_lowercase()));
            }

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let count_sql = format!("SELECT COUNT(*) FROM projects p{}", where_sql);
            let total: i64 = conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;
            page.check(total)?;

            let sql = format!(
                "{}{} ORDER BY p.created_at DESC, p.id DESC LIMIT {} OFFSET {}",
                PROJECT_SELECT,
                where_sql,
                page.page_size,
                page.offset()
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_refs.as_slice(), parse_project_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page {
                items,
                total,
                page: page.page,
                page_size: page.page_size,
            })
        })
    }

    pub fn update_project(
        &self,
        caller: &User,
        project_id: i64,
        patch: ProjectPatch,
    ) -> Result<Project> {
        if let Some(ref title) = patch.title {
            validate_project_title(title)?;
        }
        if let Some(ref color) = patch.color {
            validate_color("color", color)?;
        }
        let now = now_ms();

        self.with_conn(|conn| {
            let mut project = get_project_internal(conn, caller.id, project_id)?
                .ok_or_else(|| ApiError::project_not_found(project_id))?;

            if let Some(title) = patch.title {
                project.title = title;
            }
            if let Some(color) = patch.color {
                project.color = color;
            }
            project.updated_at = now;

            conn.execute(
                "UPDATE projects SET title = ?1, color = ?2, updated_at = ?3
                 WHERE id = ?4 AND owner_id = ?5",
                params![project.title, project.color, now, project_id, caller.id],
            )?;
            Ok(project)
        })
    }

    /// Delete a project and, by cascade, its tasks. Attachment blobs are removed best-effort.
    pub fn delete_project(
        &self,
        caller: &User,
        project_id: i64,
        blobs: &dyn BlobStore,
    ) -> Result<bool> {
        let deleted = self.with_conn_mut(|conn| {
            if get_project_internal(conn, caller.id, project_id)?.is_none() {
                return Ok(None);
            }

            let task_ids: Vec<i64> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM tasks WHERE project_id = ?1 AND author_id = ?2",
                )?;
                stmt.query_map(params![project_id, caller.id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            let tx = conn.transaction()?;
            let mut files = Vec::new();
            for task_id in task_ids {
                if let Some((_, task_files)) = delete_task_rows(&tx, caller, task_id)? {
                    files.extend(task_files);
                }
            }
            tx.execute(
                "DELETE FROM projects WHERE id = ?1 AND owner_id = ?2",
                params![project_id, caller.id],
            )?;
            tx.commit()?;
            Ok(Some(files))
        })?;

        match deleted {
            Some(files) => {
                super::attachments::remove_blobs(blobs, &files);
                info!(project_id, owner = %caller.username, "Project deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
