//! Prompt construction for LLM extraction
//!
//! The system prompt is fixed; the user prompt depends on the schema type.
//! Structured schemas are pretty-printed inside a fenced JSON block so the
//! model sees the exact shape it must fill; natural-language schemas go in
//! verbatim.

use crate::models::Schema;

/// Fixed extraction instructions sent as the system message
const SYSTEM_PROMPT: &str = "\
You are a data extraction expert. Your job is to extract structured data from webpage content.

Rules:
1. Return ONLY valid JSON matching the requested schema
2. If a field cannot be found, use null
3. For arrays, return empty array [] if no items found
4. For numbers, extract numeric values only (no currency symbols)
5. For dates, use ISO 8601 format (YYYY-MM-DD)
6. For strings, preserve the exact text from the content
7. Do not invent or infer data that isn't explicitly in the content

Be precise. Do not invent data that isn't in the content.";

/// The system prompt for extraction requests
pub fn build_system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// The user prompt for a schema + content pair
pub fn build_user_prompt(schema: &Schema, markdown: &str) -> String {
    match schema {
        Schema::Prompt(text) => {
            let instruction = if text.trim().is_empty() {
                "Extract all relevant information from the content."
            } else {
                text.trim()
            };
            format!(
                "Extract the following information from the content:\n\n\
                 {instruction}\n\n\
                 CONTENT:\n{markdown}\n\n\
                 Return the extracted data as valid JSON."
            )
        }
        Schema::Structured(value) => {
            let schema_json = serde_json::to_string_pretty(value)
                .unwrap_or_else(|_| value.to_string());
            format!(
                "Extract data matching this JSON Schema:\n\n\
                 ```json\n{schema_json}\n```\n\n\
                 CONTENT:\n{markdown}\n\n\
                 Return the extracted data as valid JSON matching the schema above."
            )
        }
    }
}
