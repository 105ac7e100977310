//! Shared types, error model, trace log, and configuration for webextract.
//!
//! This crate is the foundation depended on by all other webextract crates.
//! It provides:
//! - [`ExtractError`], the unified error type
//! - Domain types ([`ExtractionRequest`], [`UrlTrace`], [`Document`], [`RunResult`])
//! - The concurrent [`TraceLog`]
//! - Collaborator traits ([`UrlExpander`], [`DocumentFetcher`], [`Extractor`], …)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod trace;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BillingConfig, DEFAULT_CREDITS_PER_URL, DefaultsConfig, FetchConfig,
    OpenRouterConfig, StorageConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{ExtractError, Result};
pub use trace::{TraceLog, TraceScope};
pub use traits::{
    Billing, Completion, CompletionOptions, DocumentFetcher, ExpandContext, ExtractMode,
    Extractor, FetchContext, FetchOutcome, JobLogger, NoopBilling, UrlExpander,
};
pub use types::{
    AccountContext, ContentStats, DEFAULT_ORIGIN, Document, DocumentMetadata, ExtractionRequest,
    JobRecord, LinkPolicy, RunId, RunResult, TraceStatus, TraceTiming, UrlTrace,
};
