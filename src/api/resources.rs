//! JSON representations of the stored records.
//!
//! Timestamps are stored as Unix milliseconds and rendered as RFC 3339 in the
//! configured timezone. Display-only fields (`status_display`, `file_icon`,
//! `readable_size`, `file_url`) are computed here and never stored.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

use crate::blob::BlobStore;
use crate::classifier::{file_icon, readable_size};
use crate::db::tasks::TaskDetail;
use crate::error::ApiError;
use crate::types::{
    Attachment, Comment, FileType, HistoryAction, Priority, Project, Tag, TaskStatus,
    TaskHistory, User,
};

/// Rendering context: output timezone and the store that mints file URLs.
pub struct Renderer<'a> {
    pub tz: FixedOffset,
    pub blobs: &'a dyn BlobStore,
}

impl Renderer<'_> {
    pub fn timestamp(&self, ms: i64) -> String {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| {
                dt.with_timezone(&self.tz)
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            })
            .unwrap_or_default()
    }

    pub fn user(&self, user: &User) -> UserResource {
        UserResource {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            avatar: user.avatar.as_ref().map(|a| self.blobs.url(a)),
            date_joined: self.timestamp(user.date_joined),
        }
    }

    pub fn project(&self, project: Project) -> ProjectResource {
        ProjectResource {
            id: project.id,
            title: project.title,
            color: project.color,
            owner: project.owner_id,
            owner_username: project.owner_username,
            created_at: self.timestamp(project.created_at),
            updated_at: self.timestamp(project.updated_at),
        }
    }

    pub fn attachment(&self, attachment: Attachment) -> AttachmentResource {
        AttachmentResource {
            id: attachment.id,
            task: attachment.task_id,
            file_url: self.blobs.url(&attachment.file),
            file: attachment.file,
            file_type: attachment.file_type,
            original_name: attachment.original_name,
            file_size: attachment.file_size,
            readable_size: readable_size(attachment.file_size),
            file_icon: file_icon(attachment.file_type),
            uploaded_by: attachment.uploaded_by,
            uploaded_by_username: attachment.uploaded_by_username,
            uploaded_at: self.timestamp(attachment.uploaded_at),
            updated_at: self.timestamp(attachment.updated_at),
            description: attachment.description,
        }
    }

    pub fn task(&self, detail: TaskDetail) -> TaskResource {
        let TaskDetail {
            task,
            project,
            attachments,
        } = detail;
        TaskResource {
            id: task.id,
            title: task.title,
            description: task.description,
            status: task.status,
            status_display: task.status.display_name(),
            priority: task.priority,
            due_date: task.due_date.map(|ms| self.timestamp(ms)),
            completed_at: task.completed_at.map(|ms| self.timestamp(ms)),
            project: project.map(|p| self.project(p)),
            author: task.author_id,
            author_username: task.author_username,
            editor: task.editor_id,
            tags: task.tags,
            attachments: attachments
                .into_iter()
                .map(|a| self.attachment(a))
                .collect(),
            created_at: self.timestamp(task.created_at),
            updated_at: self.timestamp(task.updated_at),
        }
    }

    pub fn comment(&self, comment: Comment) -> CommentResource {
        CommentResource {
            id: comment.id,
            content: comment.content,
            task: comment.task_id,
            author: comment.author_id,
            author_username: comment.author_username,
            created_at: self.timestamp(comment.created_at),
            updated_at: self.timestamp(comment.updated_at),
        }
    }

    pub fn history(&self, entry: TaskHistory) -> HistoryResource {
        HistoryResource {
            id: entry.id,
            task: entry.task_id,
            task_title: entry.task_title,
            action: entry.action,
            changes: entry.changes,
            changed_by: entry.changed_by,
            changed_at: self.timestamp(entry.changed_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResource {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub date_joined: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResource {
    pub id: i64,
    pub title: String,
    pub color: String,
    pub owner: i64,
    pub owner_username: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct AttachmentResource {
    pub id: i64,
    pub task: i64,
    pub file: String,
    pub file_url: String,
    pub file_type: Option<FileType>,
    pub original_name: String,
    pub file_size: i64,
    pub readable_size: String,
    pub file_icon: &'static str,
    pub uploaded_by: Option<i64>,
    pub uploaded_by_username: Option<String>,
    pub uploaded_at: String,
    pub updated_at: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct TaskResource {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub status_display: &'static str,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub project: Option<ProjectResource>,
    pub author: i64,
    pub author_username: String,
    pub editor: Option<i64>,
    pub tags: Vec<Tag>,
    pub attachments: Vec<AttachmentResource>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResource {
    pub id: i64,
    pub content: String,
    pub task: i64,
    pub author: i64,
    pub author_username: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResource {
    pub id: i64,
    pub task: i64,
    pub task_title: String,
    pub action: HistoryAction,
    pub changes: serde_json::Value,
    pub changed_by: Option<i64>,
    pub changed_at: String,
}

/// Parse a client-supplied datetime into Unix milliseconds.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`, `2024-05-01T15:00:00+03:00`) and
/// naive `YYYY-MM-DDTHH:MM[:SS]`, which is read in `tz`.
pub fn parse_datetime(field: &str, value: &str, tz: FixedOffset) -> Result<i64, ApiError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            if let Some(dt) = tz.from_local_datetime(&naive).single() {
                return Ok(dt.timestamp_millis());
            }
        }
    }
    Err(ApiError::invalid_value(
        field,
        format!("'{}' is not a datetime (expected RFC 3339)", value),
    ))
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn timestamps_render_in_the_configured_offset() {
        let blobs = FsBlobStore::new("/tmp/unused");
        let renderer = Renderer {
            tz: FixedOffset::east_opt(3 * 3600).unwrap(),
            blobs: &blobs,
        };
        assert_eq!(renderer.timestamp(0), "1970-01-01T03:00:00.000+03:00");

        let renderer = Renderer { tz: utc(), blobs: &blobs };
        assert_eq!(renderer.timestamp(1_000), "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn datetime_inputs() {
        assert_eq!(parse_datetime("due_date", "1970-01-01T00:00:01Z", utc()).unwrap(), 1_000);
        assert_eq!(
            parse_datetime("due_date", "1970-01-01T03:00:00+03:00", utc()).unwrap(),
            0
        );
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            parse_datetime("due_date", "1970-01-01T02:00", plus2).unwrap(),
            0
        );

        let err = parse_datetime("due_date", "next week", utc()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("due_date"));
    }

    #[test]
    fn double_option_keeps_explicit_null() {
        #[derive(Deserialize)]
        struct Body {
            #[serde(default, deserialize_with = "double_option")]
            due_date: Option<Option<String>>,
        }

        let absent: Body = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.due_date, None);
        let null: Body = serde_json::from_str(r#"{"due_date": null}"#).unwrap();
        assert_eq!(null.due_date, Some(None));
        let set: Body = serde_json::from_str(r#"{"due_date": "x"}"#).unwrap();
        assert_eq!(set.due_date, Some(Some("x".to_string())));
    }
}
