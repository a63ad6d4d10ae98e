//! CRUD operations for [`Favorite`] records.
//!
//! A user holds at most one favorite per URL; the unique index is the
//! duplicate check.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use cur8t_shared::UserId;

use crate::convert;
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::Favorite;

const FAVORITE_COLUMNS: &str = "id, user_id, title, url, created_at, updated_at";

impl Database {
    /// Fails with [`StoreError::Duplicate`](crate::StoreError::Duplicate) if
    /// `user` already has `url` as a favorite.
    pub fn add_favorite(&self, user: &UserId, title: &str, url: &str) -> Result<Favorite> {
        let now = Utc::now();
        let favorite = Favorite {
            id: Uuid::new_v4(),
            user_id: user.clone(),
            title: title.to_string(),
            url: url.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO favorites ({FAVORITE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)"
                ),
                params![
                    favorite.id.to_string(),
                    user.as_str(),
                    favorite.title,
                    favorite.url,
                    now.to_rfc3339(),
                ],
            )
            .map_err(duplicate)?;

        Ok(favorite)
    }

    pub fn get_favorite(&self, id: Uuid) -> Result<Favorite> {
        self.conn()
            .query_row(
                &format!("SELECT {FAVORITE_COLUMNS} FROM favorites WHERE id = ?1"),
                params![id.to_string()],
                row_to_favorite,
            )
            .map_err(not_found)
    }

    /// Newest first.
    pub fn list_favorites(&self, user: &UserId) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorites
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user.as_str()], row_to_favorite)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Returns `false` if no favorite `id` belongs to `user`.
    pub fn rename_favorite(&self, id: Uuid, user: &UserId, title: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE favorites SET title = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![title, Utc::now().to_rfc3339(), id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Returns `false` if no favorite `id` belongs to `user`.
    pub fn delete_favorite(&self, id: Uuid, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM favorites WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_favorite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Favorite> {
    Ok(Favorite {
        id: convert::uuid(row, 0)?,
        user_id: UserId(row.get(1)?),
        title: row.get(2)?,
        url: row.get(3)?,
        created_at: convert::timestamp(row, 4)?,
        updated_at: convert::timestamp(row, 5)?,
    })
}
