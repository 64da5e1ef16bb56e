//! Duplicate and relevance screening for new questions.
//!
//! The provider replies with one of three raw shapes: the duplicate sentinel
//! `"0"`, the fixed rejection phrase, or a comma-separated keyword list. The
//! reply is decoded exactly once here; the raw sentinels never cross into
//! other layers.

use std::sync::Arc;

use super::leads::{REJECTION_PHRASE, parse_lead_terms};
use crate::llm::{ChatMessage, CompletionProvider};
use crate::types::Result;

const DUPLICATE_SENTINEL: &str = "0";

const SCREENING_SYSTEM_PROMPT: &str = "You validate new call center questions for an \
organization, reasoning broadly about relevance.\n\
Step 1: Check whether the existing questions list has meaningful content.\n\
Step 2: If it does and the new question is clearly very similar to one of them, \
respond with: 0\n\
Step 3: Otherwise check whether the new question could reasonably apply to the \
organization's business, customers, products or operations.\n\
Step 4: If it is clearly unrelated, respond with: Provide a relevant Question\n\
Step 5: Otherwise extract key terms from the new question (use underscores for \
multi-word phrases) and return only those, comma separated.";

/// Boundary-decoded outcome of validating a new question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuestionScreening {
    /// The question is new and relevant; `keywords` seed its lead terms.
    Accepted { keywords: Vec<String> },
    /// The question duplicates one the organization already has.
    Duplicate,
    /// The question does not fit the organization's domain.
    Irrelevant,
}

/// Screens candidate questions against an organization's existing set.
pub struct QuestionScreener {
    completions: Arc<dyn CompletionProvider>,
}

impl QuestionScreener {
    pub fn new(completions: Arc<dyn CompletionProvider>) -> Self {
        Self { completions }
    }

    /// Screens `question` against the organization's existing questions.
    /// Scoping is per organization: `existing` must contain only that
    /// organization's question texts.
    pub async fn screen(
        &self,
        organization: &str,
        question: &str,
        existing: &[String],
    ) -> Result<QuestionScreening> {
        let existing_joined = existing.join("; ");
        let messages = [
            ChatMessage::system(SCREENING_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Organization: {organization}\n\nNew question: {question}\n\n\
                 Existing questions: '{existing_joined}'"
            )),
        ];
        let response = self.completions.complete(&messages, 0.0, 300).await?;
        Ok(decode_screening(&response))
    }
}

/// Decodes the provider's raw tri-state reply.
pub fn decode_screening(response: &str) -> QuestionScreening {
    let trimmed = response.trim();
    if trimmed == DUPLICATE_SENTINEL {
        return QuestionScreening::Duplicate;
    }
    if trimmed == REJECTION_PHRASE {
        return QuestionScreening::Irrelevant;
    }
    QuestionScreening::Accepted {
        keywords: parse_lead_terms(trimmed),
    }
}
