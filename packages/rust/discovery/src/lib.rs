//! Seed URL expansion.
//!
//! A seed is either a concrete page, returned as-is, or a site pattern ending
//! in `/*` that is mapped into the pages worth fetching. Mapping fetches the
//! seed page and the site's `llms.txt` (per <https://llmstxt.org/>)
//! concurrently, harvests both for links, keeps the ones the request's
//! [`LinkPolicy`](webextract_shared::LinkPolicy) allows, and orders them by
//! how well their paths match the prompt.
//!
//! Every URL the expander hands back is recorded in the seed's trace scope.

mod links;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use webextract_fetcher::is_blocked_url;
use webextract_shared::{
    ExpandContext, ExtractError, FetchConfig, Result, TraceScope, UrlExpander,
};

use links::{LinkScope, extract_llms_links, extract_page_links, select_links};

/// Suffix marking a seed as a site pattern.
const WILDCARD_SUFFIX: &str = "/*";

/// Maximum number of redirects to follow while mapping.
const MAX_REDIRECTS: usize = 3;

/// Timeout in seconds for each mapping request.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// User-Agent string for mapping requests.
const USER_AGENT: &str = concat!("webextract/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// LinkExpander
// ---------------------------------------------------------------------------

/// Expands seeds by mapping the seed page and its site's llms.txt.
#[derive(Debug, Clone)]
pub struct LinkExpander {
    client: Client,
    allow_private_hosts: bool,
    max_body_bytes: u64,
}

impl LinkExpander {
    /// Create an expander from the `[fetch]` config section.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExtractError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn is_allowed(&self, url: &Url) -> bool {
        self.allow_private_hosts || !is_blocked_url(url)
    }

    /// Map a site pattern into scoped, ranked links.
    async fn map_site(&self, base: &Url, ctx: &ExpandContext) -> Result<Vec<Url>> {
        let llms_url = base
            .join("/llms.txt")
            .map_err(|e| ExtractError::validation(format!("invalid URL: {e}")))?;

        let (page, llms) = tokio::join!(
            self.fetch_text(base.as_str()),
            self.fetch_text(llms_url.as_str()),
        );

        let html = page?;
        let mut candidates = vec![base.clone()];
        candidates.extend(extract_page_links(&html, base));

        match llms {
            Ok(body) => {
                let entries = extract_llms_links(&body, base);
                debug!(entries = entries.len(), "llms.txt found");
                candidates.extend(entries);
            }
            Err(e) => debug!(error = %e, "llms.txt not available"),
        }

        let scope = LinkScope::new(base, ctx.policy);
        let candidates = candidates.into_iter().filter(|u| self.is_allowed(u)).collect();
        Ok(select_links(candidates, &scope, &ctx.prompt, ctx.limit))
    }

    /// GET a URL and return its body as text.
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Network(format!("{url}: {e}")))?;

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

        response
            .text()
            .await
            .map_err(|e| ExtractError::Network(format!("{url}: failed to read body: {e}")))
    }
}

#[async_trait]
impl UrlExpander for LinkExpander {
    #[instrument(skip_all, fields(seed = %seed, origin = %ctx.origin))]
    async fn expand(
        &self,
        seed: &str,
        ctx: &ExpandContext,
        trace: &TraceScope,
    ) -> Result<Vec<String>> {
        trace.discovered(seed);

        let is_pattern = seed.ends_with(WILDCARD_SUFFIX);
        let base_str = seed.strip_suffix(WILDCARD_SUFFIX).unwrap_or(seed);

        let base = match Url::parse(base_str) {
            Ok(u) if self.is_allowed(&u) => u,
            Ok(_) => {
                trace.fail(seed, "URL is blocked");
                return Ok(Vec::new());
            }
            Err(e) => {
                trace.fail(seed, format!("invalid URL: {e}"));
                return Ok(Vec::new());
            }
        };

        if !is_pattern && !ctx.policy.allow_external_links {
            trace.mark_used(seed);
            return Ok(vec![seed.to_string()]);
        }

        let links = match self.map_site(&base, ctx).await {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "mapping failed");
                trace.fail(seed, e.to_string());
                return Ok(Vec::new());
            }
        };

        if links.is_empty() {
            trace.fail(seed, "No links found for this URL");
            return Ok(Vec::new());
        }

        let links: Vec<String> = links.into_iter().map(String::from).collect();
        for link in &links {
            if link != seed {
                trace.discovered(link.as_str());
            }
            trace.mark_used(link);
        }

        info!(links = links.len(), "seed expanded");
        Ok(links)
    }
}
