//! Concurrent, order-stable URL trace log.
//!
//! Expansion and fetch tasks run concurrently and complete out of order, but
//! the trace handed back to callers must follow seed order. Every entry is
//! stored with a `(group, seq)` key: expansion of seed `i` writes into group
//! `i` through a [`TraceScope`], and entries first seen by the fetch stage go
//! into a trailing group. Snapshots sort by that key, so the final order is
//! seed order first and discovery order within a seed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::types::{ContentStats, TraceStatus, UrlTrace};

/// Group for URLs that reach the fetch stage without an expansion entry.
const FETCH_GROUP: usize = usize::MAX;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<((usize, u64), UrlTrace)>,
    next_seq: u64,
}

impl Inner {
    fn push(&mut self, group: usize, trace: UrlTrace) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(((group, seq), trace));
    }

    /// First entry for `url` in final (sorted) order.
    fn find_mut(&mut self, url: &str) -> Option<&mut UrlTrace> {
        self.entries
            .iter_mut()
            .filter(|(_, t)| t.url == url)
            .min_by_key(|(key, _)| *key)
            .map(|(_, t)| t)
    }

    /// Earliest entry for `url` written into `group`.
    fn find_in_group_mut(&mut self, group: usize, url: &str) -> Option<&mut UrlTrace> {
        self.entries
            .iter_mut()
            .filter(|((g, _), t)| *g == group && t.url == url)
            .min_by_key(|(key, _)| *key)
            .map(|(_, t)| t)
    }
}

/// Shared, lock-guarded trace log for one run.
///
/// Cloning is cheap and every clone refers to the same log.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    inner: Arc<Mutex<Inner>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer leaves the log structurally intact.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A handle that appends into the slot of seed number `seed_index`.
    pub fn scope(&self, seed_index: usize) -> TraceScope {
        TraceScope {
            log: self.clone(),
            group: seed_index,
        }
    }

    /// Mark a fetch as started, creating the entry if expansion never traced it.
    pub fn mark_fetching(&self, url: &str) {
        let mut inner = self.lock();
        let now = Utc::now();
        match inner.find_mut(url) {
            Some(trace) => {
                trace.status = TraceStatus::Fetching;
                trace.timing.fetch_started_at = Some(now);
            }
            None => {
                let mut trace = UrlTrace::discovered(url);
                trace.status = TraceStatus::Fetching;
                trace.timing.fetch_started_at = Some(now);
                inner.push(FETCH_GROUP, trace);
            }
        }
    }

    /// Mark a fetch as succeeded and attach its content statistics.
    pub fn mark_fetched(&self, url: &str, stats: ContentStats) {
        let mut inner = self.lock();
        if let Some(trace) = inner.find_mut(url) {
            trace.status = TraceStatus::Fetched;
            trace.timing.completed_at = Some(Utc::now());
            trace.content_stats = Some(stats);
        }
    }

    /// Mark a URL as failed with an error detail.
    pub fn mark_failed(&self, url: &str, error: impl Into<String>) {
        let mut inner = self.lock();
        if let Some(trace) = inner.find_mut(url) {
            trace.status = TraceStatus::Failed;
            trace.error = Some(error.into());
            trace.used_in_completion = Some(false);
        }
    }

    /// Write a token share into the content stats of the trace for `url`.
    ///
    /// Returns `false` when no entry with content stats exists for `url`.
    pub fn set_tokens_used(&self, url: &str, tokens: u64) -> bool {
        let mut inner = self.lock();
        match inner.find_mut(url).and_then(|t| t.content_stats.as_mut()) {
            Some(stats) => {
                stats.tokens_used = tokens;
                true
            }
            None => false,
        }
    }

    /// Current trace for `url`, if any.
    pub fn get(&self, url: &str) -> Option<UrlTrace> {
        self.lock().find_mut(url).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in seed order, then discovery order.
    pub fn snapshot(&self) -> Vec<UrlTrace> {
        let mut entries: Vec<_> = self.lock().entries.clone();
        entries.sort_by_key(|(key, _)| *key);
        entries.into_iter().map(|(_, t)| t).collect()
    }
}

/// Append handle for a single seed's expansion.
#[derive(Debug, Clone)]
pub struct TraceScope {
    log: TraceLog,
    group: usize,
}

impl TraceScope {
    /// Record a discovered URL.
    pub fn discovered(&self, url: impl Into<String>) {
        self.record(UrlTrace::discovered(url));
    }

    /// Append a fully built trace entry.
    pub fn record(&self, trace: UrlTrace) {
        self.log.lock().push(self.group, trace);
    }

    /// Mark a URL as failed; appends a failed entry if it was never recorded.
    pub fn fail(&self, url: &str, error: impl Into<String>) {
        let error = error.into();
        let mut inner = self.log.lock();
        match inner.find_in_group_mut(self.group, url) {
            Some(trace) => {
                trace.status = TraceStatus::Failed;
                trace.error = Some(error);
                trace.used_in_completion = Some(false);
            }
            None => {
                let mut trace = UrlTrace::discovered(url);
                trace.status = TraceStatus::Failed;
                trace.error = Some(error);
                trace.used_in_completion = Some(false);
                inner.push(self.group, trace);
            }
        }
    }

    /// Flag a URL in this scope as selected for use in the completion.
    pub fn mark_used(&self, url: &str) {
        if let Some(trace) = self.log.lock().find_in_group_mut(self.group, url) {
            trace.used_in_completion = Some(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(log: &TraceLog) -> Vec<String> {
        log.snapshot().into_iter().map(|t| t.url).collect()
    }

    #[test]
    fn snapshot_orders_by_seed_then_discovery() {
        let log = TraceLog::new();
        let second = log.scope(1);
        let first = log.scope(0);

        second.discovered("https://b.example/1");
        first.discovered("https://a.example/1");
        second.discovered("https://b.example/2");
        first.discovered("https://a.example/2");

        assert_eq!(
            urls(&log),
            vec![
                "https://a.example/1",
                "https://a.example/2",
                "https://b.example/1",
                "https://b.example/2",
            ]
        );
    }

    #[test]
    fn fetch_lifecycle_updates_existing_entry() {
        let log = TraceLog::new();
        log.scope(0).discovered("https://a.example/");

        log.mark_fetching("https://a.example/");
        assert_eq!(log.get("https://a.example/").unwrap().status, TraceStatus::Fetching);

        log.mark_fetched(
            "https://a.example/",
            ContentStats {
                raw_content_length: 10,
                processed_content_length: 10,
                tokens_used: 0,
            },
        );
        let trace = log.get("https://a.example/").unwrap();
        assert_eq!(trace.status, TraceStatus::Fetched);
        assert!(trace.timing.completed_at.is_some());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn fetch_of_untraced_url_appends_after_seeds() {
        let log = TraceLog::new();
        log.mark_fetching("https://late.example/");
        log.scope(3).discovered("https://seed.example/");

        assert_eq!(urls(&log), vec!["https://seed.example/", "https://late.example/"]);
    }

    #[test]
    fn tokens_require_content_stats() {
        let log = TraceLog::new();
        log.scope(0).discovered("https://a.example/");
        assert!(!log.set_tokens_used("https://a.example/", 5));
        assert!(!log.set_tokens_used("https://missing.example/", 5));

        log.mark_fetched("https://a.example/", ContentStats::default());
        assert!(log.set_tokens_used("https://a.example/", 5));
        let stats = log.get("https://a.example/").unwrap().content_stats.unwrap();
        assert_eq!(stats.tokens_used, 5);
    }

    #[test]
    fn scope_fail_records_unknown_seed() {
        let log = TraceLog::new();
        let scope = log.scope(0);
        scope.fail("https://bad.example/", "URL is blocked");

        let trace = log.get("https://bad.example/").unwrap();
        assert_eq!(trace.status, TraceStatus::Failed);
        assert_eq!(trace.error.as_deref(), Some("URL is blocked"));
        assert_eq!(trace.used_in_completion, Some(false));
    }

    #[test]
    fn duplicate_urls_update_first_entry() {
        let log = TraceLog::new();
        log.scope(1).discovered("https://dup.example/");
        log.scope(0).discovered("https://dup.example/");

        log.mark_failed("https://dup.example/", "timeout");
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].status, TraceStatus::Failed);
        assert_eq!(snapshot[1].status, TraceStatus::Discovered);
    }

    #[test]
    fn duplicate_seeds_fail_in_their_own_scope() {
        let log = TraceLog::new();
        let first = log.scope(0);
        let second = log.scope(1);
        first.discovered("https://dup.example/");
        second.discovered("https://dup.example/");

        first.fail("https://dup.example/", "URL is blocked");
        second.fail("https://dup.example/", "URL is blocked");

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        for trace in &snapshot {
            assert_eq!(trace.status, TraceStatus::Failed);
            assert_eq!(trace.error.as_deref(), Some("URL is blocked"));
        }
    }

    #[test]
    fn mark_used_stays_in_scope() {
        let log = TraceLog::new();
        log.scope(0).discovered("https://dup.example/");
        log.scope(1).discovered("https://dup.example/");

        log.scope(1).mark_used("https://dup.example/");

        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].used_in_completion, None);
        assert_eq!(snapshot[1].used_in_completion, Some(true));
    }

    #[tokio::test]
    async fn concurrent_writers_keep_seed_order() {
        let log = TraceLog::new();
        let mut handles = Vec::new();
        for seed in 0..8usize {
            let scope = log.scope(seed);
            handles.push(tokio::spawn(async move {
                // Later seeds finish first.
                tokio::time::sleep(std::time::Duration::from_millis((8 - seed as u64) * 3)).await;
                for link in 0..3 {
                    scope.discovered(format!("https://s{seed}.example/{link}"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let expected: Vec<String> = (0..8)
            .flat_map(|s| (0..3).map(move |l| format!("https://s{s}.example/{l}")))
            .collect();
        assert_eq!(urls(&log), expected);
    }
}
