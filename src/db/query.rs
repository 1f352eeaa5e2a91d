//! Filtered, ordered and paginated task listing.
//!
//! Query-string parameters are parsed into a [`TaskQuery`] first, so a bad
//! value is rejected with a field-scoped error before any SQL runs.

use super::tasks::{TASK_SELECT, attach_tags, parse_task_row};
use super::{Database, Page, PageRequest};
use crate::error::ApiError;
use crate::types::{Priority, Task, TaskStatus, User};
use anyhow::Result;
use chrono::{FixedOffset, NaiveDate, NaiveTime};
use serde::Deserialize;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Width of the upcoming window.
pub const UPCOMING_WINDOW_MS: i64 = 7 * DAY_MS;

/// Which derived view of the task collection to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskView {
    #[default]
    All,
    /// Open tasks whose due date has passed.
    Overdue,
    /// Open tasks due within the next seven days, soonest first.
    Upcoming,
}

/// Sortable task columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    CreatedAt,
    UpdatedAt,
    DueDate,
    Priority,
}

impl OrderField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" => Some(OrderField::CreatedAt),
            "updated_at" => Some(OrderField::UpdatedAt),
            "due_date" => Some(OrderField::DueDate),
            "priority" => Some(OrderField::Priority),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            OrderField::CreatedAt => "t.created_at",
            OrderField::UpdatedAt => "t.updated_at",
            OrderField::DueDate => "t.due_date",
            OrderField::Priority => "t.priority",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: OrderField,
    pub descending: bool,
}

/// Parse `ordering=-priority,due_date`. Unknown fields are skipped.
pub fn parse_ordering(value: &str) -> Vec<SortKey> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (descending, name) = match part.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, part),
            };
            OrderField::parse(name).map(|field| SortKey { field, descending })
        })
        .collect()
}

/// Optional filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub project_id: Option<i64>,
    /// Due on this calendar day.
    pub due_on: Option<NaiveDate>,
    /// Due on or after the start of this day.
    pub due_from: Option<NaiveDate>,
    /// Due on or before the end of this day.
    pub due_until: Option<NaiveDate>,
    pub has_due_date: Option<bool>,
    /// Case-insensitive substring of title or description.
    pub search: Option<String>,
}

/// A fully parsed task listing request.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub view: TaskView,
    pub filter: TaskFilter,
    pub ordering: Vec<SortKey>,
    pub page: PageRequest,
}

/// Raw query-string parameters of the task list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListParams {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub project: Option<String>,
    pub due_date: Option<String>,
    #[serde(rename = "due_date__gte")]
    pub due_date_gte: Option<String>,
    #[serde(rename = "due_date__lte")]
    pub due_date_lte: Option<String>,
    pub has_due_date: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::invalid_value(field, format!("'{}' is not a date (expected YYYY-MM-DD)", value))
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ApiError::invalid_value(
            field,
            format!("'{}' is not a boolean (expected true or false)", value),
        )),
    }
}

fn parse_int<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_value(field, format!("'{}' is not an integer", value)))
}

/// Resolve `page` and `page_size` against the configured defaults.
/// A non-numeric page is a missing page; a bad page size falls back to the default.
pub fn page_request(
    page: Option<&str>,
    page_size: Option<&str>,
    default_page_size: i64,
    max_page_size: i64,
) -> Result<PageRequest, ApiError> {
    let page = match page.map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n >= 1 => n,
            Ok(n) => return Err(ApiError::page_not_found(n)),
            Err(_) => {
                return Err(ApiError::new(
                    crate::error::ErrorCode::PageNotFound,
                    format!("Invalid page: {}", raw),
                )
                .with_field("page"));
            }
        },
        None => 1,
    };

    let page_size = page_size
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|&n| n >= 1)
        .unwrap_or(default_page_size)
        .clamp(1, max_page_size.max(1));

    if (page - 1).checked_mul(page_size).is_none() {
        return Err(ApiError::page_not_found(page));
    }
    Ok(PageRequest::new(page, page_size))
}

impl TaskListParams {
    pub fn into_query(
        self,
        view: TaskView,
        default_page_size: i64,
        max_page_size: i64,
    ) -> Result<TaskQuery, ApiError> {
        let page = page_request(
            self.page.as_deref(),
            self.page_size.as_deref(),
            default_page_size,
            max_page_size,
        )?;

        let status = present(self.status)
            .map(|s| {
                s.trim().parse::<TaskStatus>().map_err(|_| {
                    ApiError::invalid_value(
                        "status",
                        format!("Select a valid choice. '{}' is not one of the available choices.", s),
                    )
                    .with_allowed(TaskStatus::names())
                })
            })
            .transpose()?;

        let filter = TaskFilter {
            status,
            priority: present(self.priority)
                .map(|v| parse_int("priority", &v))
                .transpose()?,
            project_id: present(self.project)
                .map(|v| parse_int("project", &v))
                .transpose()?,
            due_on: present(self.due_date)
                .map(|v| parse_date("due_date", &v))
                .transpose()?,
            due_from: present(self.due_date_gte)
                .map(|v| parse_date("due_date__gte", &v))
                .transpose()?,
            due_until: present(self.due_date_lte)
                .map(|v| parse_date("due_date__lte", &v))
                .transpose()?,
            has_due_date: present(self.has_due_date)
                .map(|v| parse_bool("has_due_date", &v))
                .transpose()?,
            search: present(self.search).map(|s| s.trim().to_string()),
        };

        Ok(TaskQuery {
            view,
            filter,
            ordering: self.ordering.as_deref().map(parse_ordering).unwrap_or_default(),
            page,
        })
    }
}

/// First and last millisecond of `date` in the timezone `tz`.
pub fn day_bounds(date: NaiveDate, tz: FixedOffset) -> (i64, i64) {
    let local_midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    let start = local_midnight - i64::from(tz.local_minus_utc()) * 1000;
    (start, start + DAY_MS - 1)
}

fn order_clause(query: &TaskQuery) -> String {
    if query.view == TaskView::Upcoming {
        return " ORDER BY t.due_date ASC, t.id DESC".to_string();
    }

    let mut parts: Vec<String> = query
        .ordering
        .iter()
        .map(|key| {
            format!(
                "{} {}",
                key.field.column(),
                if key.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    if parts.is_empty() {
        parts.push("t.created_at DESC".to_string());
    }
    parts.push("t.id DESC".to_string());
    format!(" ORDER BY {}", parts.join(", "))
}

impl Database {
    /// List the caller's tasks matching `query`.
    ///
    /// `now` anchors the overdue and upcoming views; `tz` decides where a
    /// calendar day starts for the due date filters.
    pub fn list_tasks(
        &self,
        caller: &User,
        query: &TaskQuery,
        tz: FixedOffset,
        now: i64,
    ) -> Result<Page<Task>> {
        self.with_conn(|conn| {
            let mut conditions = vec!["t.author_id = ?".to_string()];
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(caller.id)];
            let filter = &query.filter;

            if let Some(status) = filter.status {
                conditions.push("t.status = ?".to_string());
                params_vec.push(Box::new(status.as_str()));
            }
            if let Some(priority) = filter.priority {
                conditions.push("t.priority = ?".to_string());
                params_vec.push(Box::new(priority));
            }
            if let Some(project_id) = filter.project_id {
                conditions.push("t.project_id = ?".to_string());
                params_vec.push(Box::new(project_id));
            }
            if let Some(day) = filter.due_on {
                let (start, end) = day_bounds(day, tz);
                conditions.push("t.due_date BETWEEN ? AND ?".to_string());
                params_vec.push(Box::new(start));
                params_vec.push(Box::new(end));
            }
            if let Some(day) = filter.due_from {
                conditions.push("t.due_date >= ?".to_string());
                params_vec.push(Box::new(day_bounds(day, tz).0));
            }
            if let Some(day) = filter.due_until {
                conditions.push("t.due_date <= ?".to_string());
                params_vec.push(Box::new(day_bounds(day, tz).1));
            }
            match filter.has_due_date {
                Some(true) => conditions.push("t.due_date IS NOT NULL".to_string()),
                Some(false) => conditions.push("t.due_date IS NULL".to_string()),
                None => {}
            }
            if let Some(ref term) = filter.search {
                conditions.push(
                    "(instr(unicode_lower(t.title), ?) > 0 OR instr(unicode_lower(t.description), ?) > 0)"
                        .to_string(),
                );
                let needle = term.to_lowercase();
                params_vec.push(Box::new(needle.clone()));
                params_vec.push(Box::new(needle));
            }

            let closed: Vec<&'static str> = TaskStatus::ALL
                .into_iter()
                .filter(|s| s.is_closed())
                .map(TaskStatus::as_str)
                .collect();
            let open_only = format!("t.status NOT IN ({})", vec!["?"; closed.len()].join(", "));
            match query.view {
                TaskView::All => {}
                TaskView::Overdue => {
                    conditions.push("t.due_date IS NOT NULL AND t.due_date < ?".to_string());
                    params_vec.push(Box::new(now));
                    conditions.push(open_only);
                    params_vec.extend(closed.iter().map(|s| Box::new(*s) as Box<dyn rusqlite::ToSql>));
                }
                TaskView::Upcoming => {
                    conditions.push("t.due_date BETWEEN ? AND ?".to_string());
                    params_vec.push(Box::new(now));
                    params_vec.push(Box::new(now + UPCOMING_WINDOW_MS));
                    conditions.push(open_only);
                    params_vec.extend(closed.iter().map(|s| Box::new(*s) as Box<dyn rusqlite::ToSql>));
                }
            }

            let where_clause = format!(" WHERE {}", conditions.join(" AND "));
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let count_sql = format!("SELECT COUNT(*) FROM tasks t{}", where_clause);
            let total: i64 = conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;
            query.page.check(total)?;

            let sql = format!(
                "{}{}{} LIMIT {} OFFSET {}",
                TASK_SELECT,
                where_clause,
                order_clause(query),
                query.page.page_size,
                query.page.offset()
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut items = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            attach_tags(conn, &mut items)?;

            Ok(Page {
                items,
                total,
                page: query.page.page,
                page_size: query.page.page_size,
            })
        })
    }
}
