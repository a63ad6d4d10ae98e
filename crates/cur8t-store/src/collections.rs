//! CRUD operations for [`Collection`] records.
//!
//! Owner-scoped writes take the acting owner's id and match on it in the
//! `WHERE` clause, so a non-owner's write affects zero rows.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use cur8t_shared::{CollectionId, UserId, Visibility};

use crate::convert;
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Collection, NewCollection};

pub(crate) const COLLECTION_COLUMNS: &str = "id, owner_id, title, description, visibility, \
     shared_emails, total_links, likes, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn create_collection(&self, new: &NewCollection) -> Result<Collection> {
        let now = Utc::now();
        let collection = Collection {
            id: CollectionId::new(),
            owner_id: new.owner_id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            visibility: new.visibility,
            shared_emails: Vec::new(),
            total_links: 0,
            likes: 0,
            created_at: now,
            updated_at: now,
        };

        self.conn().execute(
            &format!(
                "INSERT INTO collections ({COLLECTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, '[]', 0, 0, ?6, ?6)"
            ),
            params![
                collection.id.to_string(),
                collection.owner_id.as_str(),
                collection.title,
                collection.description,
                collection.visibility.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(collection)
    }

    /// Copy `source` into a new collection owned by `new_owner`.
    ///
    /// The copy starts with an empty shared list and zero likes. With
    /// `include_links` every link is copied and `total_links` set to match,
    /// all in one transaction. Fails with [`StoreError::NotFound`] if the
    /// source does not exist.
    pub fn duplicate_collection(
        &mut self,
        source: CollectionId,
        new: &NewCollection,
        include_links: bool,
    ) -> Result<Collection> {
        let tx = self.conn_mut().transaction()?;
        let now = Utc::now();
        let id = CollectionId::new();

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM collections WHERE id = ?1",
                params![source.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            &format!(
                "INSERT INTO collections ({COLLECTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, '[]', 0, 0, ?6, ?6)"
            ),
            params![
                id.to_string(),
                new.owner_id.as_str(),
                new.title,
                new.description,
                new.visibility.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        if include_links {
            let links: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT title, url FROM links
                     WHERE collection_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                let rows = stmt.query_map(params![source.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            for (title, url) in &links {
                tx.execute(
                    "INSERT INTO links (id, collection_id, user_id, title, url, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        id.to_string(),
                        new.owner_id.as_str(),
                        title,
                        url,
                        now.to_rfc3339(),
                    ],
                )?;
            }
            tx.execute(
                "UPDATE collections SET total_links = ?1 WHERE id = ?2",
                params![links.len() as i64, id.to_string()],
            )?;
        }

        let copy = tx.query_row(
            &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?1"),
            params![id.to_string()],
            row_to_collection,
        )?;
        tx.commit()?;
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_collection(&self, id: CollectionId) -> Result<Collection> {
        self.conn()
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?1"),
                params![id.to_string()],
                row_to_collection,
            )
            .map_err(not_found)
    }

    pub fn find_collection(&self, id: CollectionId) -> Result<Option<Collection>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?1"),
                params![id.to_string()],
                row_to_collection,
            )
            .optional()?)
    }

    /// All collections of one owner, newest first.
    pub fn list_collections_by_owner(&self, owner: &UserId) -> Result<Vec<Collection>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections
             WHERE owner_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![owner.as_str()], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_collections_by_visibility(
        &self,
        owner: &UserId,
        visibility: Visibility,
    ) -> Result<Vec<Collection>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections
             WHERE owner_id = ?1 AND visibility = ?2
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![owner.as_str(), visibility.as_str()], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Public collections, newest first. `query` matches title or description,
    /// case-insensitively.
    pub fn list_public_collections(
        &self,
        query: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Collection>> {
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(&q.to_lowercase())));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections
             WHERE visibility = 'public'
               AND (?1 IS NULL
                    OR lower(title) LIKE ?1 ESCAPE '\\'
                    OR lower(description) LIKE ?1 ESCAPE '\\')
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![pattern, limit, offset],
            row_to_collection,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename / re-describe. Returns `false` if the collection does not exist
    /// or is not owned by `owner`.
    pub fn update_collection_details(
        &self,
        id: CollectionId,
        owner: &UserId,
        title: &str,
        description: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE collections SET title = ?1, description = ?2, updated_at = ?3
             WHERE id = ?4 AND owner_id = ?5",
            params![
                title,
                description,
                Utc::now().to_rfc3339(),
                id.to_string(),
                owner.as_str()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Set visibility and the shared list together.
    pub fn update_visibility(
        &self,
        id: CollectionId,
        owner: &UserId,
        visibility: Visibility,
        shared_emails: &[String],
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE collections SET visibility = ?1, shared_emails = ?2, updated_at = ?3
             WHERE id = ?4 AND owner_id = ?5",
            params![
                visibility.as_str(),
                serde_json::to_string(shared_emails)?,
                Utc::now().to_rfc3339(),
                id.to_string(),
                owner.as_str()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Replace the shared list, leaving visibility alone.
    pub fn set_shared_emails(
        &self,
        id: CollectionId,
        owner: &UserId,
        shared_emails: &[String],
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE collections SET shared_emails = ?1, updated_at = ?2
             WHERE id = ?3 AND owner_id = ?4",
            params![
                serde_json::to_string(shared_emails)?,
                Utc::now().to_rfc3339(),
                id.to_string(),
                owner.as_str()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Recompute `total_links` from the links table.
    pub fn recount_links(&self, id: CollectionId) -> Result<i64> {
        self.conn().execute(
            "UPDATE collections
             SET total_links = (SELECT COUNT(*) FROM links WHERE collection_id = ?1)
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        self.conn()
            .query_row(
                "SELECT total_links FROM collections WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    /// Recompute `likes` from the likes table.
    pub fn recount_likes(&self, id: CollectionId) -> Result<i64> {
        self.conn().execute(
            "UPDATE collections
             SET likes = (SELECT COUNT(*) FROM collection_likes WHERE collection_id = ?1)
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        self.conn()
            .query_row(
                "SELECT likes FROM collections WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: links, likes, saves, pins and access requests go with it
    pub fn delete_collection(&self, id: CollectionId, owner: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM collections WHERE id = ?1 AND owner_id = ?2",
            params![id.to_string(), owner.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a row selected with [`COLLECTION_COLUMNS`] to a [`Collection`].
pub(crate) fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: CollectionId(convert::uuid(row, 0)?),
        owner_id: UserId(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        visibility: convert::parsed(row, 4)?,
        shared_emails: convert::json_list(row, 5)?,
        total_links: row.get(6)?,
        likes: row.get(7)?,
        created_at: convert::timestamp(row, 8)?,
        updated_at: convert::timestamp(row, 9)?,
    })
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn seed_user(db: &Database, id: &str) -> UserId {
        let uid = UserId::new(id);
        db.upsert_user(&uid, id, &format!("{id}@x.com"), None).unwrap();
        uid
    }

    pub(crate) fn seed_collection(
        db: &Database,
        owner: &UserId,
        title: &str,
        visibility: Visibility,
    ) -> Collection {
        db.create_collection(&NewCollection {
            owner_id: owner.clone(),
            title: title.to_string(),
            description: String::new(),
            visibility,
        })
        .unwrap()
    }

    #[test]
    fn create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let created = seed_collection(&db, &owner, "Rust", Visibility::Private);

        let fetched = db.get_collection(created.id).unwrap();
        assert_eq!(fetched.title, "Rust");
        assert_eq!(fetched.visibility, Visibility::Private);
        assert!(fetched.shared_emails.is_empty());
        assert!(matches!(
            db.get_collection(CollectionId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn owner_scoped_updates() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let other = seed_user(&db, "other");
        let c = seed_collection(&db, &owner, "Rust", Visibility::Private);

        let emails = vec!["a@x.com".to_string()];
        assert!(!db
            .update_visibility(c.id, &other, Visibility::Public, &[])
            .unwrap());
        assert!(db
            .update_visibility(c.id, &owner, Visibility::Protected, &emails)
            .unwrap());

        let fetched = db.get_collection(c.id).unwrap();
        assert_eq!(fetched.visibility, Visibility::Protected);
        assert_eq!(fetched.shared_emails, emails);
    }

    #[test]
    fn public_feed_filters_and_searches() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        seed_collection(&db, &owner, "Rust async", Visibility::Public);
        seed_collection(&db, &owner, "Cooking", Visibility::Public);
        seed_collection(&db, &owner, "Rust secrets", Visibility::Private);

        let all = db.list_public_collections(None, 10, 0).unwrap();
        assert_eq!(all.len(), 2);

        let rust = db.list_public_collections(Some("RUST"), 10, 0).unwrap();
        assert_eq!(rust.len(), 1);
        assert_eq!(rust[0].title, "Rust async");

        let wildcard = db.list_public_collections(Some("%"), 10, 0).unwrap();
        assert!(wildcard.is_empty());
    }

    #[test]
    fn duplicate_copies_links_and_resets_sharing() {
        let mut db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let fan = seed_user(&db, "fan");
        let source = seed_collection(&db, &owner, "Rust", Visibility::Protected);
        db.set_shared_emails(source.id, &owner, &["fan@x.com".to_string()])
            .unwrap();
        db.add_link(source.id, &owner, "Book", "https://doc.rust-lang.org/book")
            .unwrap();
        db.add_link(source.id, &owner, "Std", "https://doc.rust-lang.org/std")
            .unwrap();

        let new = NewCollection {
            owner_id: fan.clone(),
            title: "Copy of Rust".into(),
            description: source.description.clone(),
            visibility: Visibility::Private,
        };
        let copy = db.duplicate_collection(source.id, &new, true).unwrap();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.owner_id, fan);
        assert!(copy.shared_emails.is_empty());
        assert_eq!(copy.total_links, 2);
        assert_eq!(copy.likes, 0);
        let links = db.list_links(copy.id).unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.user_id == fan));
        assert_eq!(links[0].title, "Book");
        assert_eq!(db.recount_links(copy.id).unwrap(), 2);

        let bare = db.duplicate_collection(source.id, &new, false).unwrap();
        assert_eq!(bare.total_links, 0);
        assert!(db.list_links(bare.id).unwrap().is_empty());

        assert!(matches!(
            db.duplicate_collection(CollectionId::new(), &new, true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_is_owner_scoped() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let other = seed_user(&db, "other");
        let c = seed_collection(&db, &owner, "Rust", Visibility::Public);

        assert!(!db.delete_collection(c.id, &other).unwrap());
        assert!(db.delete_collection(c.id, &owner).unwrap());
        assert!(db.find_collection(c.id).unwrap().is_none());
    }
}
