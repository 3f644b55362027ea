//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema includes:
/// - `accounts` table (one row per linked provider identity)
/// - `installations` table (one row per (repository, account) webhook)
/// - `review_records` table (one row per (repository, merge request))
pub const SQLITE_INIT: &str = r"
-- ---------------------------------------------------------------------------
-- Linked provider accounts. The token column never leaves the server.
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL DEFAULT 'gitlab',
    base_url TEXT NOT NULL,
    username TEXT NOT NULL,
    name TEXT NULL,
    avatar_url TEXT NULL,
    token TEXT NOT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(provider, base_url, username)
);

-- ---------------------------------------------------------------------------
-- Webhook installations. The partial index backs the at-most-one-active-
-- webhook-per-repository invariant at the storage layer.
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS installations (
    repository_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    webhook_id INTEGER NULL,
    callback_url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT NULL,
    installed_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    PRIMARY KEY (repository_id, account_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_installations_active
    ON installations(repository_id) WHERE status = 'active';

-- ---------------------------------------------------------------------------
-- Review lifecycle, one row per (repository, mr_iid). Rows are superseded,
-- never deleted.
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS review_records (
    id INTEGER PRIMARY KEY NOT NULL,
    repository_id INTEGER NOT NULL,
    mr_iid INTEGER NOT NULL,
    title TEXT NULL,
    branch TEXT NULL,
    revision TEXT NULL, -- last commit sha (or provider timestamp) of the tracked revision
    status TEXT NOT NULL DEFAULT 'pending',
    summary TEXT NULL,
    url TEXT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(repository_id, mr_iid)
);

CREATE INDEX IF NOT EXISTS idx_review_records_updated
    ON review_records(updated_at);
";
