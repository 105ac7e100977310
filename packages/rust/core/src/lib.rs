//! Extraction pipeline orchestration for webextract.
//!
//! [`pipeline::perform_extraction`] drives one run across the collaborator
//! traits from `webextract-shared`. This crate also holds the pieces of the
//! run that are not collaborators (context assembly, system prompt, usage
//! attribution, side-effect dispatch) plus the OpenRouter extractor and the
//! storage-backed billing and job-log collaborators.

pub mod assembler;
pub mod attribution;
pub mod dispatch;
pub mod ledger;
pub mod openrouter;
pub mod pipeline;
pub mod prompt;

pub use dispatch::SideEffects;
pub use ledger::{LedgerBilling, StorageJobLog};
pub use openrouter::OpenRouterExtractor;
pub use pipeline::{
    Collaborators, PipelineOptions, ProgressReporter, SilentProgress, derive_fetch_timeout,
    perform_extraction,
};
