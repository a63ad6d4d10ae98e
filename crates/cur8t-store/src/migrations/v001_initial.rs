//! v001 -- Initial schema creation.
//!
//! Users, collections and everything hanging off a collection. Every child
//! table cascades on collection delete.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirrored from the auth provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- auth provider user id
    name       TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,          -- lower-cased
    username   TEXT UNIQUE,
    created_at TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Collections
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS collections (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    owner_id      TEXT NOT NULL,
    title         TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    visibility    TEXT NOT NULL DEFAULT 'private'
                  CHECK (visibility IN ('public', 'private', 'protected')),
    shared_emails TEXT NOT NULL DEFAULT '[]', -- JSON array of lower-cased emails
    total_links   INTEGER NOT NULL DEFAULT 0, -- denormalized
    likes         INTEGER NOT NULL DEFAULT 0, -- denormalized
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_collections_owner ON collections(owner_id);
CREATE INDEX IF NOT EXISTS idx_collections_visibility_created
    ON collections(visibility, created_at DESC);

-- ----------------------------------------------------------------
-- Links
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS links (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    collection_id TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    title         TEXT NOT NULL,
    url           TEXT NOT NULL,
    created_at    TEXT NOT NULL,

    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_links_collection ON links(collection_id, created_at);

-- ----------------------------------------------------------------
-- Likes / saves / pins
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS collection_likes (
    user_id       TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    liked_at      TEXT NOT NULL,

    PRIMARY KEY (user_id, collection_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS saved_collections (
    user_id       TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    saved_at      TEXT NOT NULL,

    PRIMARY KEY (user_id, collection_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS pinned_collections (
    user_id       TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    position      INTEGER NOT NULL,
    pinned_at     TEXT NOT NULL,

    PRIMARY KEY (user_id, collection_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Access requests: at most one row per (requester, collection)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS access_requests (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    requester_id  TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    owner_id      TEXT NOT NULL,              -- copied from the collection at creation
    message       TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL DEFAULT 'pending'
                  CHECK (status IN ('pending', 'approved', 'denied')),
    requested_at  TEXT NOT NULL,
    responded_at  TEXT,

    UNIQUE (requester_id, collection_id),
    FOREIGN KEY (requester_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE,
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_access_requests_owner
    ON access_requests(owner_id, requested_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
