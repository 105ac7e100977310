//! Context assembly: fetched documents → one evidentiary text block.

use webextract_shared::Document;

/// Separator between a document body and its metadata block.
pub const METADATA_SEPARATOR: &str = "- - - - - Page metadata - - - - -";

/// Render one document as its Markdown body followed by a metadata block.
pub fn render_document(doc: &Document) -> String {
    let mut out = String::with_capacity(doc.markdown.len() + 128);
    out.push_str(&doc.markdown);
    out.push('\n');
    out.push_str(METADATA_SEPARATOR);
    out.push('\n');

    for (key, value) in doc.metadata.entries() {
        out.push('\n');
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&value);
    }
    out
}

/// Render every document and join them, one per section, in input order.
pub fn assemble_context(docs: &[Document]) -> String {
    docs.iter()
        .map(render_document)
        .collect::<Vec<_>>()
        .join("\n")
}
