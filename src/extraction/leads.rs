//! Lead-term generation for seeding extractor queries.

use std::sync::Arc;

use crate::llm::{ChatMessage, CompletionProvider};
use crate::types::Result;

/// Maximum number of lead terms kept per question.
pub const MAX_LEAD_TERMS: usize = 3;

/// Fixed reply the provider is instructed to use for out-of-domain questions.
pub const REJECTION_PHRASE: &str = "Provide a relevant Question";

const LEAD_SYSTEM_PROMPT: &str = "You identify key variables and terms that help \
extract information from call center transcripts. Given an organization and a \
question, reply with at most three key terms, comma separated, using underscores \
for multi-word phrases. Avoid overlapping or conflicting terms and reply with the \
terms only. If the question does not fit the organization's domain, reply exactly: \
Provide a relevant Question";

/// Derives short keyword terms from question text via the completion provider.
pub struct LeadGenerator {
    completions: Arc<dyn CompletionProvider>,
}

impl LeadGenerator {
    pub fn new(completions: Arc<dyn CompletionProvider>) -> Self {
        Self { completions }
    }

    /// At most [`MAX_LEAD_TERMS`] search terms for `question`.
    pub async fn generate(&self, organization: &str, question: &str) -> Result<Vec<String>> {
        let messages = [
            ChatMessage::system(LEAD_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Organization: {organization}\n\nQuestion: {question}\n\n\
                 What are the key terms to look for?"
            )),
        ];
        let response = self.completions.complete(&messages, 0.0, 200).await?;
        Ok(parse_lead_terms(&response))
    }
}

/// Splits the raw reply on commas, trims, drops empty fragments and truncates
/// to [`MAX_LEAD_TERMS`]. No semantic validation happens here; the rejection
/// phrase is passed through untouched as the sole element.
pub fn parse_lead_terms(response: &str) -> Vec<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == REJECTION_PHRASE {
        return vec![REJECTION_PHRASE.to_string()];
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .take(MAX_LEAD_TERMS)
        .map(str::to_string)
        .collect()
}
