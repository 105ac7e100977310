//! Error types for webextract.
//!
//! Library crates use [`ExtractError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all webextract operations.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during expansion or fetching.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or link extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The extraction collaborator failed (API, transport, or response parsing).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad request, blocked URL, invalid schema file).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A failure of the fetch fan-out itself rather than of a single document.
    ///
    /// Displays as the bare message so it can be surfaced to callers verbatim.
    #[error("{0}")]
    Fatal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExtractError>;

impl ExtractError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a fan-out-level fatal error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ExtractError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ExtractError::validation("schema file is not JSON");
        assert!(err.to_string().contains("schema file"));
    }

    #[test]
    fn fatal_displays_bare_message() {
        let err = ExtractError::fatal("scrape queue unavailable");
        assert_eq!(err.to_string(), "scrape queue unavailable");
    }
}
