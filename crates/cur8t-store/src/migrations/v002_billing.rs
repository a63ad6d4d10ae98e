use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Subscription state, written only by the webhook processor
CREATE TABLE IF NOT EXISTS subscriptions (
    id                   TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_id              TEXT NOT NULL,
    store_customer_id    TEXT,
    subscription_id      TEXT UNIQUE,                -- provider id, NULL until known
    product_id           TEXT,
    variant_id           TEXT,
    status               TEXT NOT NULL DEFAULT 'none',
    current_period_start TEXT,
    current_period_end   TEXT,
    cancel_at_period_end INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    trial_end            TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, updated_at DESC);

-- Idempotency ledger: one row per provider event id
CREATE TABLE IF NOT EXISTS webhook_events (
    event_id     TEXT PRIMARY KEY NOT NULL,
    type         TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'received'
                 CHECK (status IN ('received', 'processed')),
    received_at  TEXT NOT NULL,
    processed_at TEXT
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
