//! libSQL storage layer for job logs and the credit ledger.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! completed extraction run (`extract_jobs`) and one row per charge
//! (`credit_usage`).
//!
//! **Access rules:**
//! - Extraction runs: read-write via [`Storage::open`]
//! - Reporting commands (`jobs list`, `credits`): read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Row, params};
use webextract_shared::{ExtractError, JobRecord, Result};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A job record as read back from the log, with its insertion time.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub record: JobRecord,
    pub created_at: String,
}

fn storage_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ExtractError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ExtractError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ExtractError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job log
    // -----------------------------------------------------------------------

    /// Append one job record.
    pub async fn insert_job_log(&self, record: &JobRecord) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let docs_json = serde_json::to_string(&record.docs).map_err(storage_err)?;
        let request_json = serde_json::to_string(&record.request).map_err(storage_err)?;

        self.conn
            .execute(
                "INSERT INTO extract_jobs (job_id, success, message, num_docs, docs_json,
                    time_taken, team_id, mode, url, request_json, origin, num_tokens, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.job_id.as_str(),
                    i64::from(record.success),
                    record.message.as_str(),
                    i64::from(record.num_docs),
                    docs_json,
                    record.time_taken,
                    record.team_id.as_str(),
                    record.mode.as_str(),
                    record.url.as_str(),
                    request_json,
                    record.origin.as_str(),
                    record.num_tokens as i64,
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent job records first, up to `limit`.
    pub async fn list_job_logs(&self, limit: u32) -> Result<Vec<StoredJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT job_id, success, message, num_docs, docs_json, time_taken, team_id,
                        mode, url, request_json, origin, num_tokens, created_at
                 FROM extract_jobs ORDER BY created_at DESC, job_id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(storage_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // Credit ledger
    // -----------------------------------------------------------------------

    /// Record a charge against an account.
    pub async fn record_credit_usage(
        &self,
        account_id: &str,
        subscription_id: Option<&str>,
        credits: u64,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO credit_usage (account_id, subscription_id, credits, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account_id, subscription_id, credits as i64, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Total credits charged to an account.
    pub async fn credits_used(&self, account_id: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(SUM(credits), 0) FROM credit_usage WHERE account_id = ?1",
                params![account_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

fn row_to_job(row: &Row) -> Result<StoredJob> {
    let docs_json: String = row.get(4).map_err(storage_err)?;
    let request_json: String = row.get(9).map_err(storage_err)?;

    Ok(StoredJob {
        record: JobRecord {
            job_id: row.get(0).map_err(storage_err)?,
            success: row.get::<i64>(1).map_err(storage_err)? != 0,
            message: row.get(2).map_err(storage_err)?,
            num_docs: row.get::<i64>(3).map_err(storage_err)? as u32,
            docs: serde_json::from_str(&docs_json).map_err(storage_err)?,
            time_taken: row.get(5).map_err(storage_err)?,
            team_id: row.get(6).map_err(storage_err)?,
            mode: row.get(7).map_err(storage_err)?,
            url: row.get(8).map_err(storage_err)?,
            request: serde_json::from_str(&request_json).map_err(storage_err)?,
            origin: row.get(10).map_err(storage_err)?,
            num_tokens: row.get::<i64>(11).map_err(storage_err)?.max(0) as u64,
        },
        created_at: row.get(12).map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("we_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn record(job_id: &str) -> JobRecord {
        JobRecord {
            job_id: job_id.into(),
            success: true,
            message: "Extract completed".into(),
            num_docs: 1,
            docs: json!({"ceo": "Ada"}),
            time_taken: 1.25,
            team_id: "team-1".into(),
            mode: "extract".into(),
            url: "https://a.example/, https://b.example/".into(),
            request: json!({"urls": ["https://a.example/"], "prompt": "ceo"}),
            origin: "api".into(),
            num_tokens: 42,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("we_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn job_log_roundtrip() {
        let storage = test_storage().await;
        storage.insert_job_log(&record("job-1")).await.expect("insert");

        let jobs = storage.list_job_logs(10).await.expect("list");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].record, record("job-1"));
        assert!(!jobs[0].created_at.is_empty());
    }

    #[tokio::test]
    async fn job_log_limit_applies() {
        let storage = test_storage().await;
        for i in 0..3 {
            storage
                .insert_job_log(&record(&format!("job-{i}")))
                .await
                .unwrap();
        }
        assert_eq!(storage.list_job_logs(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn credits_accumulate_per_account() {
        let storage = test_storage().await;
        storage.record_credit_usage("team-1", None, 20).await.unwrap();
        storage
            .record_credit_usage("team-1", Some("sub-9"), 5)
            .await
            .unwrap();
        storage.record_credit_usage("team-2", None, 15).await.unwrap();

        assert_eq!(storage.credits_used("team-1").await.unwrap(), 25);
        assert_eq!(storage.credits_used("team-2").await.unwrap(), 15);
        assert_eq!(storage.credits_used("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("we_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.record_credit_usage("team-1", None, 5).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.credits_used("team-1").await.unwrap(), 5);
        let result = ro.insert_job_log(&record("job-ro")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_database() {
        let tmp = std::env::temp_dir().join(format!("we_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
