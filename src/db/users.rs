//! User records and API token lookup.

use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::User;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, avatar, api_token, date_joined";

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        avatar: row.get(3)?,
        api_token: row.get(4)?,
        date_joined: row.get(5)?,
    })
}

impl Database {
    /// Register a user and issue a fresh API token.
    pub fn create_user(&self, username: &str, email: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::missing_field("username").into());
        }
        if username.chars().count() > 150 {
            return Err(ApiError::invalid_value(
                "username",
                "Username must be at most 150 characters",
            )
            .into());
        }

        let token = Uuid::new_v4().simple().to_string();
        let now = now_ms();

        self.with_conn(|conn| {
            let taken: bool = conn
                .query_row(
                    "SELECT 1 FROM users WHERE username = ?1",
                    params![username],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if taken {
                return Err(ApiError::already_exists(
                    "username",
                    format!("A user named '{}' already exists", username),
                )
                .into());
            }

            conn.execute(
                "INSERT INTO users (username, email, api_token, date_joined) VALUES (?1, ?2, ?3, ?4)",
                params![username, email.trim(), token, now],
            )?;

            Ok(User {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                email: email.trim().to_string(),
                avatar: None,
                api_token: token,
                date_joined: now,
            })
        })
    }

    /// Resolve the identity behind an API token.
    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE api_token = ?1", USER_COLUMNS);
            Ok(conn
                .query_row(&sql, params![token], parse_user_row)
                .optional()?)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY date_joined DESC, id DESC", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map([], parse_user_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }
}
