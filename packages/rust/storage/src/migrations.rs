//! SQL migration definitions for the webextract database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: extract_jobs, credit_usage",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per completed extraction run
CREATE TABLE IF NOT EXISTS extract_jobs (
    job_id       TEXT PRIMARY KEY,
    success      INTEGER NOT NULL,
    message      TEXT NOT NULL,
    num_docs     INTEGER NOT NULL,
    docs_json    TEXT NOT NULL,
    time_taken   REAL NOT NULL,
    team_id      TEXT NOT NULL,
    mode         TEXT NOT NULL,
    url          TEXT NOT NULL,
    request_json TEXT NOT NULL,
    origin       TEXT NOT NULL,
    num_tokens   INTEGER NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extract_jobs_team ON extract_jobs(team_id);
CREATE INDEX IF NOT EXISTS idx_extract_jobs_created ON extract_jobs(created_at);

-- Credit ledger
CREATE TABLE IF NOT EXISTS credit_usage (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id      TEXT NOT NULL,
    subscription_id TEXT,
    credits         INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_usage_account ON credit_usage(account_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
