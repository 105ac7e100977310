//! System prompt construction for the extraction call.

/// Fixed instruction appended after any caller-supplied system prompt.
const EXTRACTION_INSTRUCTIONS: &str = "Always prioritize using the provided content to answer the question. \
Do not make up an answer. Be concise and follow the schema always if provided. \
Here are the urls the user provided of which he wants to extract information from: ";

/// Build the system prompt: optional caller prompt, fixed instructions, source URLs.
pub fn build_system_prompt(custom: Option<&str>, links: &[String]) -> String {
    let mut prompt = String::new();
    if let Some(custom) = custom.filter(|c| !c.is_empty()) {
        prompt.push_str(custom);
        prompt.push('\n');
    }
    prompt.push_str(EXTRACTION_INSTRUCTIONS);
    prompt.push_str(&links.join(", "));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> Vec<String> {
        vec!["https://a.test/".into(), "https://b.test/x".into()]
    }

    #[test]
    fn lists_sources_after_instructions() {
        let prompt = build_system_prompt(None, &links());
        assert!(prompt.starts_with("Always prioritize using the provided content"));
        assert!(prompt.ends_with("extract information from: https://a.test/, https://b.test/x"));
    }

    #[test]
    fn custom_prompt_is_prepended_on_its_own_line() {
        let prompt = build_system_prompt(Some("You are a finance analyst."), &links());
        assert!(prompt.starts_with("You are a finance analyst.\nAlways prioritize"));
    }

    #[test]
    fn empty_custom_prompt_is_ignored() {
        assert_eq!(
            build_system_prompt(Some(""), &links()),
            build_system_prompt(None, &links())
        );
    }
}
