//! Durable metadata records and the document-store seam.
//!
//! Persistent storage of organizations, questions, conversations and
//! extraction results is an external collaborator: the pipeline only depends
//! on the [`DocumentStore`] trait. [`MemoryDocumentStore`] is the reference
//! implementation used by tests and small deployments.

pub mod memory;

pub use memory::MemoryDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::AnswerExtraction;
use crate::types::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl OrganizationRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub organization_id: String,
    pub text: String,
    /// Precomputed lead terms; empty means "generate at processing time".
    pub lead_terms: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl QuestionRecord {
    pub fn new(
        organization_id: impl Into<String>,
        text: impl Into<String>,
        lead_terms: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            text: text.into(),
            lead_terms,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub organization_id: String,
    pub filename: String,
    pub transcript: String,
    pub session_id: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        organization_id: impl Into<String>,
        filename: impl Into<String>,
        transcript: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            filename: filename.into(),
            transcript: transcript.into(),
            session_id: Uuid::new_v4().to_string(),
            processed: false,
            created_at: Utc::now(),
        }
    }
}

/// One durable extraction result for a (conversation, question) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: String,
    pub conversation_id: String,
    pub question_id: String,
    pub question_text: String,
    pub answer: String,
    pub confidence: f32,
    pub lead_terms: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn new(
        conversation_id: &str,
        question_id: &str,
        question_text: &str,
        extraction: AnswerExtraction,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            question_id: question_id.to_string(),
            question_text: question_text.to_string(),
            answer: extraction.answer,
            confidence: extraction.confidence.clamp(0.0, 1.0),
            lead_terms: extraction.leads,
            created_at: Utc::now(),
        }
    }
}

/// Metadata persistence consumed by the pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_organization(&self, organization: OrganizationRecord) -> Result<()>;
    async fn organization(&self, organization_id: &str) -> Result<Option<OrganizationRecord>>;
    async fn organizations(&self) -> Result<Vec<OrganizationRecord>>;
    /// Removes the organization and cascades to its questions, conversations
    /// and results. `false` when the organization never existed.
    async fn delete_organization(&self, organization_id: &str) -> Result<bool>;

    async fn upsert_question(&self, question: QuestionRecord) -> Result<()>;
    /// An organization's questions, newest first.
    async fn questions_for(&self, organization_id: &str) -> Result<Vec<QuestionRecord>>;
    /// Equality lookup on question text, scoped to one organization; backs
    /// the duplicate-question check.
    async fn question_by_text(
        &self,
        organization_id: &str,
        text: &str,
    ) -> Result<Option<QuestionRecord>>;
    /// Removes the question and its results. `false` when it never existed.
    async fn delete_question(&self, question_id: &str) -> Result<bool>;

    async fn upsert_conversation(&self, conversation: ConversationRecord) -> Result<()>;
    async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>>;
    async fn mark_processed(&self, conversation_id: &str) -> Result<()>;

    async fn insert_result(&self, result: ExtractionRecord) -> Result<()>;
    /// Stored results for a conversation, newest first.
    async fn results_for(&self, conversation_id: &str) -> Result<Vec<ExtractionRecord>>;
}
