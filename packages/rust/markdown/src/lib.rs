//! HTML-to-Markdown normalization for fetched documents.
//!
//! Converts a fetched HTML page to clean Markdown using the `htmd` crate, then
//! applies the cleanup passes in [`cleanup`]. Plain-text and Markdown bodies
//! skip conversion and only go through cleanup.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use webextract_shared::{ExtractError, Result};

/// Tags dropped entirely during conversion.
const SKIP_TAGS: &[&str] = &["script", "style", "nav", "iframe", "noscript", "svg", "form"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of normalizing a fetched body.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// Normalized Markdown.
    pub markdown: String,
    /// Title from `<title>` or the first H1, if any.
    pub title: Option<String>,
    /// Approximate word count, excluding code blocks.
    pub word_count: usize,
}

/// Options for the conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Source URL used for resolving relative links.
    pub source_url: String,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML page to clean Markdown.
///
/// 1. Picks the main content container (stripping page chrome)
/// 2. Rewrites `<table>` elements into Markdown tables
/// 3. Converts HTML → Markdown via `htmd`
/// 4. Runs the cleanup pipeline
#[instrument(skip(html), fields(url = %opts.source_url))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let doc = Html::parse_document(html);
    let head_title = document_title(&doc);
    let content_html = preprocess_tables(&extract_content_html(&doc, html));

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| ExtractError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(&opts.source_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());
    let title = head_title.or_else(|| extract_title_from_markdown(&markdown));
    let word_count = count_words(&markdown);

    Ok(ConvertResult {
        markdown,
        title,
        word_count,
    })
}

/// Normalize a body that is already text or Markdown.
pub fn normalize_text(text: &str, opts: &ConvertOptions) -> ConvertResult {
    let base_url = Url::parse(&opts.source_url).ok();
    let markdown = cleanup::run_pipeline(text, base_url.as_ref());
    ConvertResult {
        title: extract_title_from_markdown(&markdown),
        word_count: count_words(&markdown),
        markdown,
    }
}

// ---------------------------------------------------------------------------
// Content selection
// ---------------------------------------------------------------------------

/// Pick the main content HTML, falling back to `<body>` and then the raw input.
fn extract_content_html(doc: &Html, raw: &str) -> String {
    let candidates = [
        "article",
        "main",
        "[role=\"main\"]",
        "#content",
        ".content",
        "body",
    ];

    for sel_str in candidates {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    raw.to_string()
}

/// Text of `<title>`, trimmed; `None` when absent or empty.
fn document_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Replace each `<table>` with an equivalent Markdown table.
///
/// `htmd` 0.1 has no table support.
fn preprocess_tables(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let Ok(table_sel) = Selector::parse("table") else {
        return html.to_string();
    };

    let mut result = html.to_string();
    for table in fragment.select(&table_sel) {
        result = result.replacen(&table.html(), &table_to_markdown(&table), 1);
    }
    result
}

fn table_to_markdown(table: &ElementRef) -> String {
    let (Ok(tr_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return String::new();
    };

    let rows: Vec<Vec<String>> = table
        .select(&tr_sel)
        .map(|tr| {
            tr.select(&cell_sel)
                .map(|cell| cell.text().collect::<String>().trim().replace('|', "\\|"))
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let line = |cells: &[String]| {
        let mut padded = cells.to_vec();
        padded.resize(width, String::new());
        format!("| {} |\n", padded.join(" | "))
    };

    let mut md = String::from("\n\n");
    md.push_str(&line(&rows[0]));
    md.push_str(&line(&vec!["---".to_string(); width]));
    for row in &rows[1..] {
        md.push_str(&line(row));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

/// Count words, excluding fenced code blocks.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    CODE_BLOCK_RE
        .replace_all(md, "")
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c == '#'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(url: &str) -> ConvertOptions {
        ConvertOptions {
            source_url: url.to_string(),
        }
    }

    #[test]
    fn convert_simple_html() {
        let html = "<html><body><main><h1>Hello World</h1><p>Some text.</p></main></body></html>";
        let result = convert(html, &opts("https://example.com/page")).unwrap();

        assert!(result.markdown.contains("# Hello World"));
        assert!(result.markdown.contains("Some text."));
        assert_eq!(result.title.as_deref(), Some("Hello World"));
        assert!(result.word_count > 0);
    }

    #[test]
    fn head_title_wins_over_h1() {
        let html = "<html><head><title>Pricing | Acme</title></head>\
                    <body><main><h1>Plans</h1></main></body></html>";
        let result = convert(html, &opts("https://acme.test/pricing")).unwrap();
        assert_eq!(result.title.as_deref(), Some("Pricing | Acme"));
    }

    #[test]
    fn convert_strips_nav_and_footer() {
        let html = r#"<html><body>
            <nav><a href="/">Home</a></nav>
            <main><h1>Content</h1><p>Important text.</p></main>
            <footer><p>Copyright 2024</p></footer>
        </body></html>"#;

        let result = convert(html, &opts("https://example.com/")).unwrap();
        assert!(result.markdown.contains("Important text."));
        assert!(!result.markdown.contains("Copyright 2024"));
    }

    #[test]
    fn convert_preserves_tables() {
        let html = r#"<html><body><main>
            <h1>Team</h1>
            <table>
                <thead><tr><th>Name</th><th>Role</th></tr></thead>
                <tbody>
                    <tr><td>Ada</td><td>CEO</td></tr>
                    <tr><td>Linus</td><td>CTO</td></tr>
                </tbody>
            </table>
        </main></body></html>"#;

        let result = convert(html, &opts("https://example.com/team")).unwrap();
        assert!(result.markdown.contains("| Name | Role |"));
        assert!(result.markdown.contains("| Ada | CEO |"));
    }

    #[test]
    fn convert_resolves_relative_links() {
        let html = r#"<html><body><main><p>See <a href="/about">about</a>.</p></main></body></html>"#;
        let result = convert(html, &opts("https://example.com/docs/")).unwrap();
        assert!(result.markdown.contains("[about](https://example.com/about)"));
    }

    #[test]
    fn convert_empty_html() {
        let result = convert("<html><body></body></html>", &opts("https://example.com/")).unwrap();
        assert!(result.title.is_none());
        assert_eq!(result.word_count, 0);
    }

    #[test]
    fn normalize_text_keeps_markdown() {
        let result = normalize_text("# Notes\n\n\n\n\nline   \n", &opts("https://example.com/a.md"));
        assert_eq!(result.markdown, "# Notes\n\n\nline\n");
        assert_eq!(result.title.as_deref(), Some("Notes"));
    }

    #[test]
    fn word_count_excludes_code_blocks() {
        let md = "# Title\n\nOne two three.\n\n```\nlots of code words\n```\n";
        assert_eq!(count_words(md), 4);
    }
}
