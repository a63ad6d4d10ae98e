//! CRUD operations for [`Link`] records.
//!
//! Link writes keep `collections.total_links` in step within the same
//! transaction; [`Database::recount_links`] repairs drift.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use cur8t_shared::{CollectionId, UserId};

use crate::convert;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Link;

impl Database {
    /// Add a link to a collection owned by `owner`.
    ///
    /// Fails with [`StoreError::NotFound`] if the collection does not exist
    /// or belongs to someone else.
    pub fn add_link(
        &mut self,
        collection_id: CollectionId,
        owner: &UserId,
        title: &str,
        url: &str,
    ) -> Result<Link> {
        let tx = self.conn_mut().transaction()?;
        let now = Utc::now();

        let bumped = tx.execute(
            "UPDATE collections SET total_links = total_links + 1, updated_at = ?1
             WHERE id = ?2 AND owner_id = ?3",
            params![now.to_rfc3339(), collection_id.to_string(), owner.as_str()],
        )?;
        if bumped == 0 {
            return Err(StoreError::NotFound);
        }

        let link = Link {
            id: Uuid::new_v4(),
            collection_id,
            user_id: owner.clone(),
            title: title.to_string(),
            url: url.to_string(),
            created_at: now,
        };
        tx.execute(
            "INSERT INTO links (id, collection_id, user_id, title, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.id.to_string(),
                collection_id.to_string(),
                owner.as_str(),
                link.title,
                link.url,
                now.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(link)
    }

    /// Remove a link from a collection owned by `owner`. Returns `false` when
    /// no such link exists.
    pub fn remove_link(&mut self, link_id: Uuid, owner: &UserId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let collection_id: Option<String> = tx
            .query_row(
                "SELECT l.collection_id FROM links l
                 JOIN collections c ON c.id = l.collection_id
                 WHERE l.id = ?1 AND c.owner_id = ?2",
                params![link_id.to_string(), owner.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(collection_id) = collection_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM links WHERE id = ?1", params![link_id.to_string()])?;
        tx.execute(
            "UPDATE collections SET total_links = MAX(total_links - 1, 0), updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), collection_id],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Links of a collection in insertion order.
    pub fn list_links(&self, collection_id: CollectionId) -> Result<Vec<Link>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, collection_id, user_id, title, url, created_at
             FROM links
             WHERE collection_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![collection_id.to_string()], row_to_link)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: convert::uuid(row, 0)?,
        collection_id: CollectionId(convert::uuid(row, 1)?),
        user_id: UserId(row.get(2)?),
        title: row.get(3)?,
        url: row.get(4)?,
        created_at: convert::timestamp(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::tests::{seed_collection, seed_user};
    use cur8t_shared::Visibility;

    #[test]
    fn add_and_remove_keep_count_in_step() {
        let mut db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let c = seed_collection(&db, &owner, "Reading", Visibility::Public);

        let a = db.add_link(c.id, &owner, "Book", "https://doc.rust-lang.org/book/").unwrap();
        db.add_link(c.id, &owner, "Nomicon", "https://doc.rust-lang.org/nomicon/").unwrap();
        assert_eq!(db.get_collection(c.id).unwrap().total_links, 2);

        assert!(db.remove_link(a.id, &owner).unwrap());
        assert!(!db.remove_link(a.id, &owner).unwrap());

        assert_eq!(db.get_collection(c.id).unwrap().total_links, 1);
        assert_eq!(db.recount_links(c.id).unwrap(), 1);
        assert_eq!(db.list_links(c.id).unwrap().len(), 1);
    }

    #[test]
    fn non_owner_cannot_add() {
        let mut db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let other = seed_user(&db, "other");
        let c = seed_collection(&db, &owner, "Reading", Visibility::Public);

        let err = db.add_link(c.id, &other, "x", "https://x.com").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert_eq!(db.recount_links(c.id).unwrap(), 0);
    }

    #[test]
    fn deleting_collection_cascades_links() {
        let mut db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let c = seed_collection(&db, &owner, "Reading", Visibility::Public);
        db.add_link(c.id, &owner, "Book", "https://doc.rust-lang.org/book/").unwrap();

        db.delete_collection(c.id, &owner).unwrap();
        assert!(db.list_links(c.id).unwrap().is_empty());
    }
}
