//! Likes, saves and pins.
//!
//! Each relation is keyed on `(user_id, collection_id)`, so repeating an
//! insert is rejected by the primary key rather than a prior read.

use chrono::Utc;
use rusqlite::params;

use cur8t_shared::{CollectionId, UserId};

use crate::collections::row_to_collection;
use crate::database::Database;
use crate::error::{duplicate, Result, StoreError};
use crate::models::Collection;

/// Outcome of [`Database::pin_collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Pinned,
    AlreadyPinned,
    LimitReached,
    /// Missing, or not owned by the user.
    NotOwned,
}

impl Database {
    // ------------------------------------------------------------------
    // Likes
    // ------------------------------------------------------------------

    /// Returns `false` if the user already liked the collection.
    pub fn like_collection(&mut self, user: &UserId, collection_id: CollectionId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        let inserted = tx
            .execute(
                "INSERT INTO collection_likes (user_id, collection_id, liked_at)
                 VALUES (?1, ?2, ?3)",
                params![user.as_str(), collection_id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(duplicate);
        match inserted {
            Ok(_) => {}
            Err(StoreError::Duplicate) => return Ok(false),
            Err(e) => return Err(e),
        }
        tx.execute(
            "UPDATE collections SET likes = likes + 1 WHERE id = ?1",
            params![collection_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Returns `false` if there was no like to remove.
    pub fn unlike_collection(
        &mut self,
        user: &UserId,
        collection_id: CollectionId,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        let removed = tx.execute(
            "DELETE FROM collection_likes WHERE user_id = ?1 AND collection_id = ?2",
            params![user.as_str(), collection_id.to_string()],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE collections SET likes = MAX(likes - 1, 0) WHERE id = ?1",
            params![collection_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }


    // ------------------------------------------------------------------
    // Saves
    // ------------------------------------------------------------------

    /// Returns `false` if the collection was already saved.
    pub fn save_collection(&self, user: &UserId, collection_id: CollectionId) -> Result<bool> {
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO saved_collections (user_id, collection_id, saved_at)
                 VALUES (?1, ?2, ?3)",
                params![user.as_str(), collection_id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(duplicate);
        match inserted {
            Ok(_) => Ok(true),
            Err(StoreError::Duplicate) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn unsave_collection(&self, user: &UserId, collection_id: CollectionId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM saved_collections WHERE user_id = ?1 AND collection_id = ?2",
            params![user.as_str(), collection_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Saved collections, most recently saved first. Visibility is not
    /// filtered here; callers apply the policy.
    pub fn list_saved_collections(&self, user: &UserId) -> Result<Vec<Collection>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.owner_id, c.title, c.description, c.visibility,
                    c.shared_emails, c.total_links, c.likes, c.created_at, c.updated_at
             FROM saved_collections s
             JOIN collections c ON c.id = s.collection_id
             WHERE s.user_id = ?1
             ORDER BY s.saved_at DESC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    /// Pin one of the user's own collections, up to `max` pins.
    pub fn pin_collection(
        &mut self,
        user: &UserId,
        collection_id: CollectionId,
        max: usize,
    ) -> Result<PinOutcome> {
        let tx = self.conn_mut().transaction()?;

        let owned: i64 = tx.query_row(
            "SELECT COUNT(*) FROM collections WHERE id = ?1 AND owner_id = ?2",
            params![collection_id.to_string(), user.as_str()],
            |row| row.get(0),
        )?;
        if owned == 0 {
            return Ok(PinOutcome::NotOwned);
        }

        let (count, already, next_position): (i64, i64, i64) = tx.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(collection_id = ?2), 0),
                    COALESCE(MAX(position), -1) + 1
             FROM pinned_collections WHERE user_id = ?1",
            params![user.as_str(), collection_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        if already > 0 {
            return Ok(PinOutcome::AlreadyPinned);
        }
        if count as usize >= max {
            return Ok(PinOutcome::LimitReached);
        }

        tx.execute(
            "INSERT INTO pinned_collections (user_id, collection_id, position, pinned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.as_str(),
                collection_id.to_string(),
                next_position,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(PinOutcome::Pinned)
    }

    pub fn unpin_collection(&self, user: &UserId, collection_id: CollectionId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM pinned_collections WHERE user_id = ?1 AND collection_id = ?2",
            params![user.as_str(), collection_id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Pinned collections in pin order.
    pub fn list_pinned_collections(&self, user: &UserId) -> Result<Vec<Collection>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.owner_id, c.title, c.description, c.visibility,
                    c.shared_emails, c.total_links, c.likes, c.created_at, c.updated_at
             FROM pinned_collections p
             JOIN collections c ON c.id = p.collection_id
             WHERE p.user_id = ?1 AND c.owner_id = ?1
             ORDER BY p.position ASC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
