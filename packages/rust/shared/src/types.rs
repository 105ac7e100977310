//! Core domain types for extraction runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin tag used when a request does not carry one.
pub const DEFAULT_ORIGIN: &str = "api";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for extraction run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ExtractionRequest
// ---------------------------------------------------------------------------

/// A caller's extraction request. Immutable for the lifetime of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Seed URLs, in caller order. Duplicates are kept.
    pub urls: Vec<String>,
    /// Natural-language extraction prompt.
    #[serde(default)]
    pub prompt: String,
    /// Output schema, passed through to the extraction collaborator untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Prepended to the fixed extraction instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Overall time budget for the run in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Allow expansion to follow links to other hosts.
    #[serde(default)]
    pub allow_external_links: bool,
    /// Allow expansion to follow links to subdomains of the seed host.
    #[serde(default)]
    pub include_subdomains: bool,
    /// Maximum number of links one seed may expand into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Caller origin tag (e.g. "api", "cli").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Include the URL trace in a successful result.
    #[serde(default)]
    pub url_trace: bool,
}

impl ExtractionRequest {
    /// Origin tag, falling back to [`DEFAULT_ORIGIN`].
    pub fn origin_or_default(&self) -> &str {
        self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN)
    }

    /// Link-following policy flags for the expander.
    pub fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            allow_external_links: self.allow_external_links,
            include_subdomains: self.include_subdomains,
        }
    }
}

/// Which links the expander may follow from a seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkPolicy {
    pub allow_external_links: bool,
    pub include_subdomains: bool,
}

/// The account a run is performed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    /// Owning account (team) identifier, charged for the run.
    pub account_id: String,
    /// Optional subscription the charge is booked against.
    pub subscription_id: Option<String>,
}

impl AccountContext {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            subscription_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// UrlTrace
// ---------------------------------------------------------------------------

/// Lifecycle state of a traced URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    /// Discovered during expansion.
    #[serde(rename = "mapped")]
    Discovered,
    /// A fetch has been attempted and is in flight.
    #[serde(rename = "scraping")]
    Fetching,
    /// The fetch produced a document.
    #[serde(rename = "scraped")]
    Fetched,
    /// Expansion or fetching failed; see the trace's `error`.
    #[serde(rename = "error")]
    Failed,
}

/// Timestamps recorded as a URL moves through the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTiming {
    pub discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Content statistics, present once a fetch succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStats {
    pub raw_content_length: usize,
    pub processed_content_length: usize,
    /// Share of the run's token usage, filled in by usage attribution.
    pub tokens_used: u64,
}

/// Diagnostic record of one URL touched during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTrace {
    pub url: String,
    pub status: TraceStatus,
    pub timing: TraceTiming,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_stats: Option<ContentStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_in_completion: Option<bool>,
}

impl UrlTrace {
    /// A freshly discovered URL.
    pub fn discovered(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: TraceStatus::Discovered,
            timing: TraceTiming {
                discovered_at: Utc::now(),
                fetch_started_at: None,
                completed_at: None,
            },
            error: None,
            warning: None,
            content_stats: None,
            used_in_completion: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Metadata attached to a fetched document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Canonical source URL; the correlation key into the URL trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl DocumentMetadata {
    /// Present metadata fields as `(key, value)` pairs, in a fixed order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = &self.source_url {
            out.push(("sourceURL", v.clone()));
        }
        if let Some(v) = &self.title {
            out.push(("title", v.clone()));
        }
        if let Some(v) = self.status_code {
            out.push(("statusCode", v.to_string()));
        }
        if let Some(v) = &self.content_type {
            out.push(("contentType", v.clone()));
        }
        if let Some(v) = self.fetched_at {
            out.push(("fetchedAt", v.to_rfc3339()));
        }
        out
    }
}

/// One successfully fetched, normalized source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The URL that was requested.
    pub url: String,
    /// Normalized Markdown body.
    pub markdown: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(url: impl Into<String>, markdown: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            metadata: DocumentMetadata {
                source_url: Some(url.clone()),
                ..Default::default()
            },
            url,
            markdown: markdown.into(),
        }
    }

    /// Canonical source URL used to correlate with the trace.
    pub fn source_url(&self) -> Option<&str> {
        self.metadata.source_url.as_deref()
    }

    /// Length of the normalized content, used for usage attribution.
    pub fn content_len(&self) -> usize {
        self.markdown.len()
    }
}

// ---------------------------------------------------------------------------
// Run result and job record
// ---------------------------------------------------------------------------

/// Result returned to the immediate caller of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<UrlTrace>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// A terminal failure carrying whatever trace was collected.
    pub fn failure(run_id: RunId, error: impl Into<String>, trace: Vec<UrlTrace>) -> Self {
        Self {
            success: false,
            data: None,
            run_id,
            warning: None,
            trace: Some(trace),
            error: Some(error.into()),
        }
    }
}

/// One structured job-log entry per completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub success: bool,
    pub message: String,
    pub num_docs: u32,
    /// Extracted payload, or `{}` when absent.
    pub docs: serde_json::Value,
    /// Wall-clock seconds spent on the run.
    pub time_taken: f64,
    pub team_id: String,
    pub mode: String,
    /// Seed URLs joined with ", ".
    pub url: String,
    /// The original request, serialized.
    pub request: serde_json::Value,
    pub origin: String,
    pub num_tokens: u64,
}
