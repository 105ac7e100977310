//! Storage-backed billing and job-log collaborators.

use std::sync::Arc;

use async_trait::async_trait;

use webextract_shared::{Billing, JobLogger, JobRecord, Result};
use webextract_storage::Storage;

/// Charges accounts by appending to the local credit ledger.
pub struct LedgerBilling {
    storage: Arc<Storage>,
}

impl LedgerBilling {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Billing for LedgerBilling {
    async fn charge(
        &self,
        account_id: &str,
        subscription_id: Option<&str>,
        credits: u64,
    ) -> Result<()> {
        self.storage
            .record_credit_usage(account_id, subscription_id, credits)
            .await
    }
}

/// Persists job records to the `extract_jobs` table.
pub struct StorageJobLog {
    storage: Arc<Storage>,
}

impl StorageJobLog {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl JobLogger for StorageJobLog {
    async fn record(&self, record: &JobRecord) -> Result<()> {
        self.storage.insert_job_log(record).await
    }
}
