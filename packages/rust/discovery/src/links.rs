//! Link harvesting, scoping, and relevance ordering.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use webextract_shared::LinkPolicy;

/// Prompt words shorter than this are ignored for relevance.
const MIN_TERM_LEN: usize = 4;

/// Extract all `<a href>` links from an HTML page, resolved against `base`.
pub(crate) fn extract_page_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    doc.select(&link_sel)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| {
            !(href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:"))
        })
        .filter_map(|href| base.join(href).ok())
        .collect()
}

/// Extract link targets from an llms.txt body (`[title](url)` entries).
pub(crate) fn extract_llms_links(body: &str, base: &Url) -> Vec<Url> {
    static ENTRY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").expect("valid regex"));

    ENTRY_RE
        .captures_iter(body)
        .filter_map(|c| base.join(&c[1]).ok())
        .collect()
}

/// Canonical form for deduplication: no fragment, no trailing slash on paths.
pub(crate) fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let mut s = url.to_string();
    if s.ends_with('/') && url.path() != "/" {
        s.pop();
    }
    s
}

/// Host without a leading `www.`.
fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Decides which harvested links a seed may expand into.
pub(crate) struct LinkScope {
    host: String,
    policy: LinkPolicy,
}

impl LinkScope {
    pub(crate) fn new(base: &Url, policy: LinkPolicy) -> Self {
        Self {
            host: bare_host(base.host_str().unwrap_or("")).to_string(),
            policy,
        }
    }

    pub(crate) fn allows(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if self.policy.allow_external_links {
            return true;
        }

        let host = bare_host(url.host_str().unwrap_or(""));
        host == self.host
            || (self.policy.include_subdomains && host.ends_with(&format!(".{}", self.host)))
    }
}

/// Lower-cased prompt words long enough to be meaningful in a URL.
pub(crate) fn prompt_terms(prompt: &str) -> Vec<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Number of prompt terms occurring in the URL's path and query.
fn relevance(url: &Url, terms: &[String]) -> usize {
    let haystack = format!("{}?{}", url.path(), url.query().unwrap_or("")).to_lowercase();
    terms.iter().filter(|t| haystack.contains(t.as_str())).count()
}

/// Scope, deduplicate, and order candidate links; keeps discovery order among equals.
pub(crate) fn select_links(
    candidates: Vec<Url>,
    scope: &LinkScope,
    prompt: &str,
    limit: Option<usize>,
) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links: Vec<Url> = candidates
        .into_iter()
        .map(|mut u| {
            u.set_fragment(None);
            u
        })
        .filter(|u| scope.allows(u))
        .filter(|u| seen.insert(normalize_url(u)))
        .collect();

    let terms = prompt_terms(prompt);
    if !terms.is_empty() {
        // Stable: equally relevant links stay in discovery order.
        links.sort_by_key(|u| std::cmp::Reverse(relevance(u, &terms)));
    }

    if let Some(limit) = limit {
        links.truncate(limit);
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn page_links_resolve_and_skip_non_navigational() {
        let html = r##"<html><body>
            <a href="/pricing">Pricing</a>
            <a href="https://external.test/">Ext</a>
            <a href="#top">Top</a>
            <a href="mailto:hi@example.com">Mail</a>
            <a href="team">Team</a>
        </body></html>"##;
        let links = extract_page_links(html, &url("https://example.com/about/"));
        let links: Vec<String> = links.iter().map(Url::to_string).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/pricing",
                "https://external.test/",
                "https://example.com/about/team",
            ]
        );
    }

    #[test]
    fn llms_links_are_parsed() {
        let body = "# Acme\n\n## Docs\n- [Quickstart](/docs/quickstart): start here\n- [API](https://example.com/api)\n";
        let links = extract_llms_links(body, &url("https://example.com/"));
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].as_str(), "https://example.com/docs/quickstart");
    }

    #[test]
    fn scope_respects_link_policy() {
        let base = url("https://www.example.com/");
        let strict = LinkScope::new(&base, LinkPolicy::default());
        assert!(strict.allows(&url("https://example.com/a")));
        assert!(!strict.allows(&url("https://blog.example.com/a")));
        assert!(!strict.allows(&url("https://other.test/a")));

        let subdomains = LinkScope::new(
            &base,
            LinkPolicy {
                allow_external_links: false,
                include_subdomains: true,
            },
        );
        assert!(subdomains.allows(&url("https://blog.example.com/a")));
        assert!(!subdomains.allows(&url("https://notexample.com/a")));

        let external = LinkScope::new(
            &base,
            LinkPolicy {
                allow_external_links: true,
                include_subdomains: false,
            },
        );
        assert!(external.allows(&url("https://other.test/a")));
        assert!(!external.allows(&url("ftp://other.test/a")));
    }

    #[test]
    fn select_links_dedups_ranks_and_limits() {
        let base = url("https://example.com/");
        let scope = LinkScope::new(&base, LinkPolicy::default());
        let candidates = vec![
            url("https://example.com/blog"),
            url("https://example.com/pricing#plans"),
            url("https://example.com/pricing/"),
            url("https://example.com/careers"),
            url("https://example.com/team/leadership"),
        ];

        let links = select_links(candidates, &scope, "Who is on the leadership team?", Some(3));
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/team/leadership",
                "https://example.com/blog",
                "https://example.com/pricing",
            ]
        );
    }

    #[test]
    fn short_prompt_words_are_ignored() {
        assert_eq!(prompt_terms("Get the CEO of acme"), vec!["acme"]);
    }
}
