//! HTTP document fetcher.
//!
//! [`HttpFetcher`] implements the [`DocumentFetcher`] collaborator: it fetches
//! one concrete URL under the per-fetch timeout handed down by the pipeline,
//! normalizes the body to Markdown, and wraps it in a [`Document`].
//!
//! Individual failures (blocked URL, HTTP error, timeout, unsupported body)
//! become [`FetchOutcome::Skipped`]. Only a broken HTTP client is reported as
//! [`FetchOutcome::Fatal`], since every other fetch in the run would fail the
//! same way.

pub mod guard;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use webextract_markdown::{ConvertOptions, ConvertResult};
use webextract_shared::{
    Document, DocumentFetcher, DocumentMetadata, ExtractError, FetchConfig, FetchContext,
    FetchOutcome, Result,
};

pub use guard::is_blocked_url;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("webextract/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches pages over HTTP and normalizes them to Markdown.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    allow_private_hosts: bool,
    max_body_bytes: u64,
}

impl HttpFetcher {
    /// Create a fetcher from the `[fetch]` config section.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ExtractError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn fetch_document(&self, url: &str, ctx: &FetchContext) -> Result<Document> {
        let parsed =
            Url::parse(url).map_err(|e| ExtractError::validation(format!("invalid URL: {e}")))?;

        if !self.allow_private_hosts && is_blocked_url(&parsed) {
            return Err(ExtractError::validation("URL is blocked"));
        }

        let response = self
            .client
            .get(parsed.as_str())
            .timeout(Duration::from_millis(ctx.timeout_ms))
            .send()
            .await
            .map_err(|e| classify_send_error(url, ctx.timeout_ms, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(ExtractError::validation(format!(
                    "{url}: response too large ({len} bytes, max {})",
                    self.max_body_bytes
                )));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_ascii_lowercase());

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExtractError::Network(format!("{url}: timed out after {} ms", ctx.timeout_ms))
            } else {
                ExtractError::Network(format!("{url}: body read failed: {e}"))
            }
        })?;

        if body.len() as u64 > self.max_body_bytes {
            return Err(ExtractError::validation(format!(
                "{url}: response too large ({} bytes, max {})",
                body.len(),
                self.max_body_bytes
            )));
        }

        let converted = normalize_body(&body, content_type.as_deref(), url)?;

        debug!(
            url,
            raw_len = body.len(),
            markdown_len = converted.markdown.len(),
            words = converted.word_count,
            "document normalized"
        );

        Ok(Document {
            url: url.to_string(),
            markdown: converted.markdown,
            metadata: DocumentMetadata {
                source_url: Some(url.to_string()),
                title: converted.title,
                status_code: Some(status.as_u16()),
                content_type,
                content_hash: Some(compute_hash(&body)),
                fetched_at: Some(Utc::now()),
            },
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url, origin = %ctx.origin, timeout_ms = ctx.timeout_ms))]
    async fn fetch(&self, url: &str, ctx: &FetchContext) -> FetchOutcome {
        match self.fetch_document(url, ctx).await {
            Ok(doc) => FetchOutcome::Fetched(doc),
            Err(ExtractError::Fatal(message)) => FetchOutcome::Fatal(ExtractError::Fatal(message)),
            Err(e) => {
                warn!(url, error = %e, "fetch failed, skipping document");
                FetchOutcome::Skipped(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a transport error to a per-document or fan-out-level failure.
fn classify_send_error(url: &str, timeout_ms: u64, e: reqwest::Error) -> ExtractError {
    if e.is_builder() {
        ExtractError::fatal(format!("HTTP client cannot build requests: {e}"))
    } else if e.is_timeout() {
        ExtractError::Network(format!("{url}: timed out after {timeout_ms} ms"))
    } else {
        ExtractError::Network(format!("{url}: {e}"))
    }
}

/// Normalize a response body according to its content type.
fn normalize_body(body: &str, content_type: Option<&str>, url: &str) -> Result<ConvertResult> {
    let opts = ConvertOptions {
        source_url: url.to_string(),
    };

    match content_type {
        None => webextract_markdown::convert(body, &opts),
        Some(ct) if ct.contains("html") => webextract_markdown::convert(body, &opts),
        Some(ct) if ct.contains("json") => {
            let fenced = format!("```json\n{}\n```", body.trim());
            Ok(webextract_markdown::normalize_text(&fenced, &opts))
        }
        Some(ct) if ct.starts_with("text/") || ct.contains("markdown") => {
            Ok(webextract_markdown::normalize_text(body, &opts))
        }
        Some(ct) => Err(ExtractError::validation(format!(
            "{url}: unsupported content type {ct}"
        ))),
    }
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webextract_shared::AccountContext;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            allow_private_hosts: true,
            ..Default::default()
        })
        .unwrap()
    }

    fn ctx(timeout_ms: u64) -> FetchContext {
        FetchContext {
            account: AccountContext::new("team-1"),
            origin: "api".into(),
            timeout_ms,
        }
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        let err = normalize_body("%PDF", Some("application/pdf"), "https://x.test/a.pdf")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported content type"));
    }

    #[tokio::test]
    async fn fetches_and_normalizes_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><head><title>About Acme</title></head><body>\
                     <main><h1>About</h1><p>Founded in 1999.</p></main></body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .mount(&server)
            .await;

        let url = format!("{}/about", server.uri());
        let outcome = local_fetcher().fetch(&url, &ctx(5_000)).await;

        let FetchOutcome::Fetched(doc) = outcome else {
            panic!("expected Fetched, got {outcome:?}");
        };
        assert!(doc.markdown.contains("Founded in 1999."));
        assert_eq!(doc.source_url(), Some(url.as_str()));
        assert_eq!(doc.metadata.title.as_deref(), Some("About Acme"));
        assert_eq!(doc.metadata.status_code, Some(200));
        assert_eq!(doc.metadata.content_hash.as_ref().map(String::len), Some(64));
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        let server = MockServer::start().await;
        Mock::given(path("/notes.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/markdown")
                    .set_body_string("# Notes\n\nShip it."),
            )
            .mount(&server)
            .await;

        let outcome = local_fetcher()
            .fetch(&format!("{}/notes.md", server.uri()), &ctx(5_000))
            .await;
        let FetchOutcome::Fetched(doc) = outcome else {
            panic!("expected Fetched, got {outcome:?}");
        };
        assert_eq!(doc.markdown, "# Notes\n\nShip it.\n");
    }

    #[tokio::test]
    async fn http_error_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = local_fetcher()
            .fetch(&format!("{}/missing", server.uri()), &ctx(5_000))
            .await;
        match outcome {
            FetchOutcome::Skipped(reason) => assert!(reason.contains("404")),
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn per_fetch_timeout_is_enforced() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(1_500)),
            )
            .mount(&server)
            .await;

        let outcome = local_fetcher()
            .fetch(&format!("{}/slow", server.uri()), &ctx(100))
            .await;
        match outcome {
            FetchOutcome::Skipped(reason) => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn private_hosts_are_blocked_by_default() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        match fetcher.fetch("http://127.0.0.1:9/", &ctx(1_000)).await {
            FetchOutcome::Skipped(reason) => assert!(reason.contains("URL is blocked")),
            other => panic!("expected Skipped, got {other:?}"),
        }
    }
}
