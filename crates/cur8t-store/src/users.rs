//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use cur8t_shared::UserId;

use crate::convert;
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::User;

const USER_COLUMNS: &str = "id, name, email, username, created_at";

impl Database {
    /// Insert or refresh a user mirrored from the auth provider.
    ///
    /// `created_at` is kept from the first insert. Fails with
    /// [`StoreError::Duplicate`](crate::StoreError::Duplicate) when the email
    /// or username belongs to another user.
    pub fn upsert_user(
        &self,
        id: &UserId,
        name: &str,
        email: &str,
        username: Option<&str>,
    ) -> Result<User> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name, email, username, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     email = excluded.email,
                     username = excluded.username",
                params![id.as_str(), name, email, username, Utc::now().to_rfc3339()],
            )
            .map_err(duplicate)?;

        self.get_user(id)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// The user's verified email, or `None` if the user is unknown.
    pub fn user_email(&self, id: &UserId) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT email FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        username: row.get(3)?,
        created_at: convert::timestamp(row, 4)?,
    })
}
