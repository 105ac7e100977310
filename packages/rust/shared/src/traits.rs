//! Collaborator contracts consumed by the extraction pipeline.
//!
//! URL expansion, document fetching, structured extraction, billing, and job
//! logging are each black-box services behind one of these traits. The HTTP,
//! OpenRouter, and libSQL implementations live in their own crates; tests use
//! in-process mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::trace::TraceScope;
use crate::types::{AccountContext, Document, JobRecord, LinkPolicy, RunId};

// ---------------------------------------------------------------------------
// URL expansion
// ---------------------------------------------------------------------------

/// Per-seed inputs for URL expansion.
#[derive(Debug, Clone)]
pub struct ExpandContext {
    pub prompt: String,
    pub account: AccountContext,
    pub policy: LinkPolicy,
    pub origin: String,
    pub limit: Option<usize>,
}

/// Turns one seed URL into zero or more concrete URLs to fetch.
#[async_trait]
pub trait UrlExpander: Send + Sync {
    /// Expand `seed`, appending a trace entry for every URL discovered.
    ///
    /// A seed that yields nothing should return an empty list and mark its
    /// trace with the reason. An `Err` is treated the same way by the pipeline.
    async fn expand(&self, seed: &str, ctx: &ExpandContext, trace: &TraceScope)
    -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Document fetching
// ---------------------------------------------------------------------------

/// Per-fetch inputs.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub account: AccountContext,
    pub origin: String,
    /// Budget for this single fetch, in milliseconds.
    pub timeout_ms: u64,
}

/// Outcome of one fetch task.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The URL was fetched and normalized.
    Fetched(Document),
    /// The URL could not be used; the run continues without it.
    Skipped(String),
    /// A systemic failure; aborts the whole run.
    Fatal(ExtractError),
}

/// Fetches and normalizes a concrete URL into a [`Document`].
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, ctx: &FetchContext) -> FetchOutcome;
}

// ---------------------------------------------------------------------------
// Structured extraction
// ---------------------------------------------------------------------------

/// Extraction mode understood by the extraction collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    Llm,
}

/// Prompting options for one extraction call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOptions {
    pub mode: ExtractMode,
    pub system_prompt: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// Structured output of the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Extracted payload, opaque to the pipeline.
    #[serde(default)]
    pub extract: Option<serde_json::Value>,
    /// Aggregate tokens consumed, when the provider reports it.
    #[serde(default)]
    pub num_tokens: Option<u64>,
    #[serde(default)]
    pub warning: Option<String>,
}

/// Runs structured extraction over an assembled context.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// `previous` carries an earlier extraction to refine; `strict` requests
    /// schema-strict output when a schema is given.
    async fn extract(
        &self,
        run_id: &RunId,
        options: &CompletionOptions,
        context: &str,
        previous: Option<&serde_json::Value>,
        strict: bool,
    ) -> Result<Completion>;
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Charges an account for a run.
#[async_trait]
pub trait Billing: Send + Sync {
    async fn charge(&self, account_id: &str, subscription_id: Option<&str>, credits: u64)
    -> Result<()>;
}

/// Persists one job record per run.
#[async_trait]
pub trait JobLogger: Send + Sync {
    async fn record(&self, record: &JobRecord) -> Result<()>;
}

/// Billing sink that accepts every charge without recording it.
pub struct NoopBilling;

#[async_trait]
impl Billing for NoopBilling {
    async fn charge(&self, account_id: &str, _subscription_id: Option<&str>, credits: u64)
    -> Result<()> {
        tracing::debug!(account_id, credits, "billing disabled, charge dropped");
        Ok(())
    }
}
