//! Proportional attribution of aggregate token usage back onto the trace.

use tracing::debug;
use webextract_shared::{Document, TraceLog};

/// Share of `num_tokens` owed to a document of `len` out of `total` bytes.
///
/// Floors the exact proportion; a zero total yields zero.
fn share(len: usize, total: usize, num_tokens: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((len as u128 * u128::from(num_tokens)) / total as u128) as u64
}

/// Write each document's share of `num_tokens` into its trace's content stats.
///
/// Documents without a source URL, or whose URL has no trace entry carrying
/// content stats, are skipped. Returns the total tokens written; truncation
/// may leave this below `num_tokens`.
pub fn attribute_usage(docs: &[Document], num_tokens: u64, trace: &TraceLog) -> u64 {
    let total: usize = docs.iter().map(Document::content_len).sum();
    let mut attributed = 0;

    for doc in docs {
        let tokens = share(doc.content_len(), total, num_tokens);
        let written = doc
            .source_url()
            .is_some_and(|url| trace.set_tokens_used(url, tokens));

        if written {
            attributed += tokens;
        } else {
            debug!(url = %doc.url, tokens, "no trace with content stats, attribution skipped");
        }
    }

    attributed
}
