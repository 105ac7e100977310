//! End-to-end extraction run: seeds → expand → fetch → assemble → extract →
//! attribute → dispatch.
//!
//! Expansion and fetching fan out one task per seed / per URL and join on all
//! of them. Trace entries are written concurrently into a shared [`TraceLog`]
//! and read back in seed order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::{join_all, try_join_all};
use serde_json::json;
use tracing::{info, instrument, warn};

use webextract_shared::{
    AccountContext, CompletionOptions, ContentStats, DEFAULT_CREDITS_PER_URL, Document,
    DocumentFetcher, ExpandContext, ExtractError, ExtractMode, ExtractionRequest, Extractor,
    FetchContext, FetchOutcome, JobRecord, Result, RunId, RunResult, TraceLog, UrlExpander,
};

use crate::assembler::assemble_context;
use crate::attribution::attribute_usage;
use crate::dispatch::SideEffects;
use crate::prompt::build_system_prompt;

/// Error returned when no seed expanded into a usable URL.
pub const NO_VALID_URLS: &str =
    "No valid URLs found to scrape. Try adjusting your search criteria or including more URLs.";

/// Per-fetch timeout when the request carries no usable overall budget.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Message recorded in the job log for a completed run.
const COMPLETED_MESSAGE: &str = "Extract completed";

/// Mode tag recorded in the job log.
const JOB_MODE: &str = "extract";

/// The black-box services one run is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub expander: Arc<dyn UrlExpander>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub side_effects: SideEffects,
}

/// Pipeline-wide knobs that are not part of the request.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Credits charged per URL entering the fetch stage.
    pub credits_per_url: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            credits_per_url: DEFAULT_CREDITS_PER_URL,
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each fetch settles.
    fn url_fetched(&self, url: &str, current: usize, total: usize);
    /// Called when the run completes successfully.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn url_fetched(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &RunResult) {}
}

/// Per-fetch timeout: 70% of the overall budget, or the default when that is zero.
pub fn derive_fetch_timeout(overall_timeout_ms: Option<u64>) -> u64 {
    match overall_timeout_ms.map(|t| t / 10 * 7 + t % 10 * 7 / 10) {
        Some(ms) if ms > 0 => ms,
        _ => DEFAULT_FETCH_TIMEOUT_MS,
    }
}

/// Run one extraction request end to end.
///
/// Early exits (no usable URLs, fatal fetch fan-out) come back as
/// `Ok(RunResult { success: false, .. })` carrying the trace collected so far.
/// A failing extraction call is returned as `Err`. Billing and job logging are
/// dispatched in the background and never affect the result.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, seeds = request.urls.len()))]
pub async fn perform_extraction(
    request: &ExtractionRequest,
    account: &AccountContext,
    collaborators: &Collaborators,
    options: &PipelineOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunResult> {
    let start = Instant::now();
    let run_id = RunId::new();
    tracing::Span::current().record("run_id", tracing::field::display(&run_id));

    let trace = TraceLog::new();
    let origin = request.origin_or_default().to_string();

    info!(origin = %origin, "starting extraction run");

    // --- Expanding ---
    progress.phase("Expanding URLs");
    let links = expand_seeds(request, account, &origin, &collaborators.expander, &trace).await;

    if links.is_empty() {
        warn!("no seed produced a usable URL");
        return Ok(RunResult::failure(run_id, NO_VALID_URLS, trace.snapshot()));
    }

    // --- Fetching ---
    progress.phase("Fetching documents");
    let timeout_ms = derive_fetch_timeout(request.timeout_ms);
    let ctx = FetchContext {
        account: account.clone(),
        origin: origin.clone(),
        timeout_ms,
    };

    let docs = match fetch_documents(&links, &ctx, &collaborators.fetcher, &trace, progress).await
    {
        Ok(docs) => docs,
        Err(e) => {
            warn!(error = %e, "fetch fan-out failed, aborting run");
            return Ok(RunResult::failure(run_id, e.to_string(), trace.snapshot()));
        }
    };

    info!(
        links = links.len(),
        documents = docs.len(),
        timeout_ms,
        "fetch stage complete"
    );

    // --- Extracting ---
    progress.phase("Extracting");
    let completion_options = CompletionOptions {
        mode: ExtractMode::Llm,
        system_prompt: build_system_prompt(request.system_prompt.as_deref(), &links),
        prompt: request.prompt.clone(),
        schema: request.schema.clone(),
    };
    let context = assemble_context(&docs);

    let completion = collaborators
        .extractor
        .extract(&run_id, &completion_options, &context, None, true)
        .await?;

    // --- Attributing ---
    if let Some(num_tokens) = completion.num_tokens {
        let attributed = attribute_usage(&docs, num_tokens, &trace);
        info!(num_tokens, attributed, "usage attributed");
    }

    let data = completion.extract.clone().unwrap_or_else(|| json!({}));
    let result = RunResult {
        success: true,
        data: Some(data.clone()),
        run_id: run_id.clone(),
        warning: completion.warning.clone(),
        trace: request.url_trace.then(|| trace.snapshot()),
        error: None,
    };

    // --- Dispatching ---
    let credits = SideEffects::billing_amount(links.len(), options.credits_per_url);
    let record = JobRecord {
        job_id: run_id.to_string(),
        success: true,
        message: COMPLETED_MESSAGE.into(),
        num_docs: 1,
        docs: data,
        time_taken: start.elapsed().as_secs_f64(),
        team_id: account.account_id.clone(),
        mode: JOB_MODE.into(),
        url: request.urls.join(", "),
        request: serde_json::to_value(request).unwrap_or_else(|_| json!({})),
        origin,
        num_tokens: completion.num_tokens.unwrap_or(0),
    };
    collaborators.side_effects.dispatch(account, credits, record);

    info!(
        credits,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "extraction run completed"
    );
    progress.done(&result);
    Ok(result)
}

/// Expand every seed concurrently and flatten the results in seed order.
async fn expand_seeds(
    request: &ExtractionRequest,
    account: &AccountContext,
    origin: &str,
    expander: &Arc<dyn UrlExpander>,
    trace: &TraceLog,
) -> Vec<String> {
    let ctx = ExpandContext {
        prompt: request.prompt.clone(),
        account: account.clone(),
        policy: request.link_policy(),
        origin: origin.to_string(),
        limit: request.limit,
    };

    let handles = request.urls.iter().enumerate().map(|(index, seed)| {
        let expander = Arc::clone(expander);
        let scope = trace.scope(index);
        let seed = seed.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match expander.expand(&seed, &ctx, &scope).await {
                Ok(links) => links,
                Err(e) => {
                    warn!(seed = %seed, error = %e, "seed expansion failed");
                    scope.fail(&seed, e.to_string());
                    Vec::new()
                }
            }
        })
    });

    let mut links = Vec::new();
    for (index, joined) in join_all(handles).await.into_iter().enumerate() {
        match joined {
            Ok(expanded) => links.extend(expanded),
            Err(e) => {
                let seed = &request.urls[index];
                warn!(seed = %seed, error = %e, "seed expansion task panicked");
                trace.scope(index).fail(seed, format!("expansion task failed: {e}"));
            }
        }
    }

    links.retain(|link| !link.is_empty());
    links
}

/// Fetch every URL concurrently. Skipped fetches are dropped; a fatal outcome
/// (or a panicked task) aborts the whole stage.
async fn fetch_documents(
    links: &[String],
    ctx: &FetchContext,
    fetcher: &Arc<dyn DocumentFetcher>,
    trace: &TraceLog,
    progress: &dyn ProgressReporter,
) -> Result<Vec<Document>> {
    let total = links.len();
    let settled = AtomicUsize::new(0);

    let tasks = links.iter().map(|url| {
        let handle = {
            let fetcher = Arc::clone(fetcher);
            let trace = trace.clone();
            let ctx = ctx.clone();
            let url = url.clone();
            tokio::spawn(async move {
                trace.mark_fetching(&url);
                match fetcher.fetch(&url, &ctx).await {
                    FetchOutcome::Fetched(doc) => {
                        let len = doc.content_len();
                        trace.mark_fetched(
                            &url,
                            ContentStats {
                                raw_content_length: len,
                                processed_content_length: len,
                                tokens_used: 0,
                            },
                        );
                        Ok(Some(doc))
                    }
                    FetchOutcome::Skipped(reason) => {
                        trace.mark_failed(&url, reason);
                        Ok(None)
                    }
                    FetchOutcome::Fatal(e) => {
                        trace.mark_failed(&url, e.to_string());
                        Err(e)
                    }
                }
            })
        };

        let settled = &settled;
        async move {
            let outcome = handle
                .await
                .map_err(|e| ExtractError::fatal(format!("fetch task failed: {e}")))?;
            let current = settled.fetch_add(1, Ordering::Relaxed) + 1;
            progress.url_fetched(url, current, total);
            outcome
        }
    });

    let fetched = try_join_all(tasks).await?;
    Ok(fetched.into_iter().flatten().collect())
}
