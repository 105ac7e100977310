//! Post-conversion cleanup passes.
//!
//! Each pass is `&str -> String`, applied in order by [`run_pipeline`].

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Run all cleanup passes on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = strip_leftover_html(md);
    result = resolve_links(&result, base_url);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);
    ensure_trailing_newline(&result)
}

/// Remove layout tags that survived conversion, outside fenced code.
fn strip_leftover_html(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                line.to_string()
            } else {
                TAG_RE.replace_all(line, "").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve relative link targets against the page URL. Images are left alone.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &Captures| {
            let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
            let absolute = href.contains("://")
                || href.starts_with('#')
                || href.starts_with("mailto:")
                || href.starts_with("tel:");
            if !bang.is_empty() || absolute {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of 4+ newlines into 3.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").into_owned()
}

fn ensure_trailing_newline(md: &str) -> String {
    format!("{}\n", md.trim_end_matches('\n'))
}
