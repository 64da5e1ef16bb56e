//! Ingestion and batch-processing orchestration.
//!
//! [`ConversationProcessor`] wires the chunker, shared embedder, vector
//! index, extractor and document store together. The ordering contract for
//! processing is strict: every extraction result is durably persisted before
//! the conversation's vector index is touched, so a persistence failure never
//! costs the only copy of the embeddings.

use std::sync::Arc;

use crate::chunking::chunk_transcript;
use crate::config::Settings;
use crate::documents::{ConversationRecord, DocumentStore, ExtractionRecord, QuestionRecord};
use crate::embeddings::SharedEmbedder;
use crate::extraction::{LeadGenerator, QuestionScreener, QuestionScreening, RagExtractor};
use crate::llm::CompletionProvider;
use crate::stores::{SqliteVectorIndex, StorageJanitor, VectorIndex};
use crate::types::{Result, SiftError};

/// Checks an uploaded transcript file before it reaches the core.
pub fn validate_upload(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<String> {
    let lowered = filename.to_ascii_lowercase();
    if !(lowered.ends_with(".txt") || lowered.ends_with(".text")) {
        return Err(SiftError::Upload("only .txt files are allowed".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(SiftError::Upload(format!(
            "file exceeds the {max_bytes} byte limit"
        )));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| SiftError::Upload("file must be valid UTF-8 text".to_string()))
}

/// Outcome of screening and storing a candidate question.
#[derive(Clone, Debug)]
pub enum QuestionOutcome {
    Added(QuestionRecord),
    Duplicate,
    Irrelevant,
}

/// Summary returned after processing a conversation.
#[derive(Clone, Debug)]
pub struct ProcessingSummary {
    pub conversation_id: String,
    pub results: Vec<ExtractionRecord>,
    /// Whether index deletion and shard reclaim fully succeeded.
    pub index_reclaimed: bool,
}

/// End-to-end orchestrator for transcript ingestion and question processing.
pub struct ConversationProcessor {
    settings: Settings,
    index: Arc<SqliteVectorIndex>,
    embedder: Arc<SharedEmbedder>,
    documents: Arc<dyn DocumentStore>,
    extractor: RagExtractor,
    leads: LeadGenerator,
    screener: QuestionScreener,
    janitor: StorageJanitor,
}

impl ConversationProcessor {
    pub fn new(
        settings: Settings,
        index: Arc<SqliteVectorIndex>,
        embedder: Arc<SharedEmbedder>,
        completions: Arc<dyn CompletionProvider>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let extractor = RagExtractor::new(
            index.clone() as Arc<dyn VectorIndex>,
            embedder.clone(),
            completions.clone(),
        );
        let leads = LeadGenerator::new(completions.clone());
        let screener = QuestionScreener::new(completions);
        let janitor = StorageJanitor::new(index.clone());
        Self {
            settings,
            index,
            embedder,
            documents,
            extractor,
            leads,
            screener,
            janitor,
        }
    }

    /// Screens and stores a new question for an organization. The equality
    /// lookup catches verbatim duplicates before the provider is consulted;
    /// accepted keywords become the question's lead terms.
    pub async fn add_question(
        &self,
        organization_id: &str,
        text: &str,
    ) -> Result<QuestionOutcome> {
        let organization = self
            .documents
            .organization(organization_id)
            .await?
            .ok_or_else(|| {
                SiftError::Documents(format!("unknown organization {organization_id}"))
            })?;

        if self
            .documents
            .question_by_text(organization_id, text)
            .await?
            .is_some()
        {
            return Ok(QuestionOutcome::Duplicate);
        }

        let existing: Vec<String> = self
            .documents
            .questions_for(organization_id)
            .await?
            .into_iter()
            .map(|question| question.text)
            .collect();

        match self
            .screener
            .screen(&organization.name, text, &existing)
            .await?
        {
            QuestionScreening::Duplicate => Ok(QuestionOutcome::Duplicate),
            QuestionScreening::Irrelevant => Ok(QuestionOutcome::Irrelevant),
            QuestionScreening::Accepted { keywords } => {
                let question = QuestionRecord::new(organization_id, text, keywords);
                self.documents.upsert_question(question.clone()).await?;
                tracing::info!(question = %question.id, organization = organization_id, "question added");
                Ok(QuestionOutcome::Added(question))
            }
        }
    }

    /// Chunks, embeds and indexes a conversation transcript. Empty
    /// transcripts are skipped; re-ingesting an already indexed conversation
    /// is a no-op. Returns the number of chunks stored.
    pub async fn ingest_transcript(&self, conversation_id: &str, transcript: &str) -> Result<usize> {
        if transcript.trim().is_empty() {
            tracing::warn!(conversation = conversation_id, "empty transcript, nothing to index");
            return Ok(0);
        }

        let handle = self.index.create_collection(conversation_id).await?;
        if self.index.count(&handle).await? > 0 {
            tracing::debug!(conversation = conversation_id, "conversation already indexed");
            return Ok(0);
        }

        let chunks = chunk_transcript(
            transcript,
            self.settings.chunk_window,
            self.settings.chunk_overlap,
        )?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.encode(&texts).await?;
        let rows = chunks.into_iter().zip(vectors).collect();
        self.index.insert_chunks(&handle, rows).await
    }

    /// Validates an uploaded transcript file, persists the conversation
    /// record and indexes the content. Indexing failures are logged without
    /// failing the upload; processing re-ingests when needed.
    pub async fn upload(
        &self,
        organization_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ConversationRecord> {
        let transcript = validate_upload(filename, bytes, self.settings.max_upload_bytes)?;
        self.documents
            .organization(organization_id)
            .await?
            .ok_or_else(|| {
                SiftError::Documents(format!("unknown organization {organization_id}"))
            })?;

        let conversation = ConversationRecord::new(organization_id, filename, transcript);
        self.documents
            .upsert_conversation(conversation.clone())
            .await?;
        if let Err(err) = self
            .ingest_transcript(&conversation.id, &conversation.transcript)
            .await
        {
            tracing::error!(
                conversation = %conversation.id,
                error = %err,
                "failed to index uploaded transcript"
            );
        }
        Ok(conversation)
    }

    /// Answers every question of the conversation's organization and persists
    /// one result per question, including error-sentinel results, so callers
    /// can always verify `results.len() == questions.len()`. The vector index
    /// is deleted only after every result is durably stored.
    pub async fn process_conversation(&self, conversation_id: &str) -> Result<ProcessingSummary> {
        let conversation = self
            .documents
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                SiftError::Documents(format!("unknown conversation {conversation_id}"))
            })?;
        if conversation.processed {
            return Err(SiftError::Documents(format!(
                "conversation {conversation_id} is already processed"
            )));
        }

        let organization = self
            .documents
            .organization(&conversation.organization_id)
            .await?
            .ok_or_else(|| {
                SiftError::Documents(format!(
                    "unknown organization {}",
                    conversation.organization_id
                ))
            })?;

        let questions = self.documents.questions_for(&organization.id).await?;
        if questions.is_empty() {
            return Err(SiftError::Documents(format!(
                "no questions configured for organization {}",
                organization.id
            )));
        }

        // The transcript may not be indexed yet; ingestion is idempotent.
        if let Err(err) = self
            .ingest_transcript(conversation_id, &conversation.transcript)
            .await
        {
            tracing::warn!(
                conversation = conversation_id,
                error = %err,
                "re-ingestion before processing failed"
            );
        }

        let mut results = Vec::with_capacity(questions.len());
        for question in &questions {
            let lead_terms = if question.lead_terms.is_empty() {
                match self.leads.generate(&organization.name, &question.text).await {
                    Ok(terms) => terms,
                    Err(err) => {
                        tracing::warn!(
                            question = %question.id,
                            error = %err,
                            "lead generation failed"
                        );
                        Vec::new()
                    }
                }
            } else {
                question.lead_terms.clone()
            };

            let extraction = self
                .extractor
                .extract(conversation_id, &question.text, &lead_terms)
                .await;
            results.push(ExtractionRecord::new(
                conversation_id,
                &question.id,
                &question.text,
                extraction,
            ));
        }

        // Persist everything before touching the vector index; the index is
        // the only copy of the transcript's embeddings.
        for result in &results {
            self.documents.insert_result(result.clone()).await?;
        }
        self.documents.mark_processed(conversation_id).await?;

        let index_reclaimed = self.janitor.delete_conversation(conversation_id).await;
        if !index_reclaimed {
            tracing::warn!(
                conversation = conversation_id,
                "index cleanup incomplete, shards may need a later sweep"
            );
        }

        tracing::info!(
            conversation = conversation_id,
            questions = questions.len(),
            "conversation processed"
        );
        Ok(ProcessingSummary {
            conversation_id: conversation_id.to_string(),
            results,
            index_reclaimed,
        })
    }

    /// Stored results for a conversation, newest first. Pure document-store
    /// read; the retrieval core is not involved.
    pub async fn results(&self, conversation_id: &str) -> Result<Vec<ExtractionRecord>> {
        self.documents.results_for(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_validation_accepts_txt_files() {
        let transcript = validate_upload("call.txt", b"hello there", 1024).unwrap();
        assert_eq!(transcript, "hello there");
        assert!(validate_upload("call.TEXT", b"hi", 1024).is_ok());
    }

    #[test]
    fn upload_validation_rejects_other_extensions() {
        assert!(matches!(
            validate_upload("call.pdf", b"hello", 1024),
            Err(SiftError::Upload(_))
        ));
    }

    #[test]
    fn upload_validation_rejects_oversized_files() {
        assert!(matches!(
            validate_upload("call.txt", &[b'a'; 32], 16),
            Err(SiftError::Upload(_))
        ));
    }

    #[test]
    fn upload_validation_rejects_invalid_utf8() {
        assert!(matches!(
            validate_upload("call.txt", &[0xff, 0xfe, 0x00], 1024),
            Err(SiftError::Upload(_))
        ));
    }
}
