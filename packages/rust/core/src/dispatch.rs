//! Best-effort billing and job logging after a run.
//!
//! Both side effects run as detached tasks tracked by a [`TaskTracker`]. The
//! caller never awaits them for its result; a process that is about to exit
//! calls [`SideEffects::drain`] so in-flight writes are not lost.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use webextract_shared::{AccountContext, Billing, JobLogger, JobRecord};

/// Fire-and-forget dispatcher for billing and job logging.
#[derive(Clone)]
pub struct SideEffects {
    billing: Arc<dyn Billing>,
    job_log: Arc<dyn JobLogger>,
    tracker: TaskTracker,
}

impl SideEffects {
    pub fn new(billing: Arc<dyn Billing>, job_log: Arc<dyn JobLogger>) -> Self {
        Self {
            billing,
            job_log,
            tracker: TaskTracker::new(),
        }
    }

    /// Credits owed for a run that sent `url_count` URLs to the fetch stage.
    pub fn billing_amount(url_count: usize, credits_per_url: u64) -> u64 {
        (url_count as u64).saturating_mul(credits_per_url)
    }

    /// Spawn the billing charge and the job-log write. Returns immediately.
    pub fn dispatch(&self, account: &AccountContext, credits: u64, record: JobRecord) {
        let billing = Arc::clone(&self.billing);
        let account_id = account.account_id.clone();
        let subscription_id = account.subscription_id.clone();
        self.tracker.spawn(async move {
            match billing
                .charge(&account_id, subscription_id.as_deref(), credits)
                .await
            {
                Ok(()) => debug!(account_id = %account_id, credits, "billing recorded"),
                Err(e) => {
                    error!(account_id = %account_id, credits, error = %e, "failed to bill account")
                }
            }
        });

        let job_log = Arc::clone(&self.job_log);
        self.tracker.spawn(async move {
            match job_log.record(&record).await {
                Ok(()) => debug!(job_id = %record.job_id, "job logged"),
                Err(e) => error!(job_id = %record.job_id, error = %e, "failed to log job"),
            }
        });
    }

    /// Wait for every dispatched side effect to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use webextract_shared::{ExtractError, Result};

    #[derive(Default)]
    struct RecordingBilling {
        charges: Mutex<Vec<(String, Option<String>, u64)>>,
        fail: bool,
    }

    #[async_trait]
    impl Billing for RecordingBilling {
        async fn charge(
            &self,
            account_id: &str,
            subscription_id: Option<&str>,
            credits: u64,
        ) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(ExtractError::Storage("ledger offline".into()));
            }
            self.charges.lock().unwrap().push((
                account_id.to_string(),
                subscription_id.map(str::to_string),
                credits,
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingJobLog {
        records: Mutex<Vec<JobRecord>>,
    }

    #[async_trait]
    impl JobLogger for RecordingJobLog {
        async fn record(&self, record: &JobRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn record() -> JobRecord {
        JobRecord {
            job_id: "run-1".into(),
            success: true,
            message: "Extract completed".into(),
            num_docs: 1,
            docs: json!({}),
            time_taken: 0.5,
            team_id: "team-1".into(),
            mode: "extract".into(),
            url: "https://a.test/".into(),
            request: json!({}),
            origin: "api".into(),
            num_tokens: 0,
        }
    }

    #[test]
    fn billing_amount_is_per_url() {
        assert_eq!(SideEffects::billing_amount(4, 5), 20);
        assert_eq!(SideEffects::billing_amount(0, 5), 0);
    }

    #[tokio::test]
    async fn dispatch_runs_both_effects() {
        let billing = Arc::new(RecordingBilling::default());
        let job_log = Arc::new(RecordingJobLog::default());
        let effects = SideEffects::new(billing.clone(), job_log.clone());

        let mut account = AccountContext::new("team-1");
        account.subscription_id = Some("sub-1".into());
        effects.dispatch(&account, 20, record());
        effects.drain().await;

        assert_eq!(
            *billing.charges.lock().unwrap(),
            vec![("team-1".to_string(), Some("sub-1".to_string()), 20)]
        );
        assert_eq!(job_log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn billing_failure_does_not_block_job_log() {
        let billing = Arc::new(RecordingBilling {
            fail: true,
            ..Default::default()
        });
        let job_log = Arc::new(RecordingJobLog::default());
        let effects = SideEffects::new(billing.clone(), job_log.clone());

        effects.dispatch(&AccountContext::new("team-1"), 5, record());
        effects.drain().await;

        assert!(billing.charges.lock().unwrap().is_empty());
        assert_eq!(job_log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tracker_is_reusable_after_drain() {
        let job_log = Arc::new(RecordingJobLog::default());
        let effects = SideEffects::new(Arc::new(RecordingBilling::default()), job_log.clone());

        effects.dispatch(&AccountContext::new("t"), 5, record());
        effects.drain().await;
        effects.dispatch(&AccountContext::new("t"), 5, record());
        effects.drain().await;

        assert_eq!(job_log.records.lock().unwrap().len(), 2);
    }
}
