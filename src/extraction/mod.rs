//! Retrieval-augmented answer extraction.

pub mod leads;
pub mod screening;

pub use leads::LeadGenerator;
pub use screening::{QuestionScreener, QuestionScreening};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::SharedEmbedder;
use crate::llm::{ChatMessage, CompletionProvider};
use crate::stores::{RetrievedChunk, VectorIndex};
use crate::types::Result;

/// Results requested for the combined question + lead-terms query.
pub const PRIMARY_TOP_K: usize = 5;
/// Results requested for the question-only retry.
pub const FALLBACK_TOP_K: usize = 3;
/// Character budget for the assembled context.
pub const MAX_CONTEXT_CHARS: usize = 3000;
/// Upper bound on chunks included in the context.
pub const MAX_CONTEXT_CHUNKS: usize = 5;

const CONFIDENCE_BOOST: f32 = 1.2;
const GENERATION_TEMPERATURE: f32 = 0.0;
const GENERATION_MAX_TOKENS: u32 = 1000;

const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert at extracting specific \
information from call center conversations. Given context from a conversation and a \
question, answer concisely using the closest relevant information in the context. \
Prefer the nearest plausible detail over declaring the information missing; only say \
'Information not found' when nothing in the context relates to the question.";

/// Structured outcome of answering one question against one conversation.
///
/// `answer` is always non-empty; weak retrieval and provider failures produce
/// sentinel text rather than an absent value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnswerExtraction {
    pub answer: String,
    pub confidence: f32,
    pub leads: Vec<String>,
    pub chunks_used: usize,
}

/// Answers questions by retrieving conversation chunks and handing them to
/// the text-generation provider.
pub struct RagExtractor {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<SharedEmbedder>,
    completions: Arc<dyn CompletionProvider>,
}

impl RagExtractor {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<SharedEmbedder>,
        completions: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            index,
            embedder,
            completions,
        }
    }

    /// Extracts an answer for `question` from the conversation's index.
    ///
    /// Never fails: storage or provider errors become an error-sentinel
    /// result, so one bad question cannot abort a batch.
    pub async fn extract(
        &self,
        conversation_id: &str,
        question: &str,
        lead_terms: &[String],
    ) -> AnswerExtraction {
        match self.try_extract(conversation_id, question, lead_terms).await {
            Ok(extraction) => extraction,
            Err(err) => {
                tracing::error!(
                    conversation = conversation_id,
                    question,
                    error = %err,
                    "extraction failed"
                );
                AnswerExtraction {
                    answer: "Error occurred during processing".to_string(),
                    confidence: 0.0,
                    leads: lead_terms.to_vec(),
                    chunks_used: 0,
                }
            }
        }
    }

    async fn try_extract(
        &self,
        conversation_id: &str,
        question: &str,
        lead_terms: &[String],
    ) -> Result<AnswerExtraction> {
        let matches = self.retrieve(conversation_id, question, lead_terms).await?;
        if matches.is_empty() {
            return Ok(AnswerExtraction {
                answer: "No relevant information found in this conversation".to_string(),
                confidence: 0.0,
                leads: lead_terms.to_vec(),
                chunks_used: 0,
            });
        }

        let (context, similarities) = assemble_context(&matches);
        let messages = [
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Context from conversation:\n{context}\n\nQuestion: {question}\n\nAnswer:"
            )),
        ];
        let raw = self
            .completions
            .complete(&messages, GENERATION_TEMPERATURE, GENERATION_MAX_TOKENS)
            .await?;

        Ok(AnswerExtraction {
            answer: validate_answer(&raw, question),
            confidence: confidence_from(&similarities),
            leads: lead_terms.to_vec(),
            chunks_used: similarities.len(),
        })
    }

    /// Three-tier retrieval ladder: question + leads (top-5), question alone
    /// (top-3), then the unranked full dump.
    async fn retrieve(
        &self,
        conversation_id: &str,
        question: &str,
        lead_terms: &[String],
    ) -> Result<Vec<RetrievedChunk>> {
        let Some(handle) = self.index.get_collection(conversation_id).await? else {
            tracing::warn!(conversation = conversation_id, "no collection for conversation");
            return Ok(Vec::new());
        };

        let combined = build_query(question, lead_terms);
        let vector = self.embedder.encode_one(&combined).await?;
        let matches = self.index.query(&handle, &vector, PRIMARY_TOP_K).await?;
        if !matches.is_empty() {
            return Ok(matches);
        }

        tracing::debug!(
            conversation = conversation_id,
            "combined query returned nothing, retrying with question alone"
        );
        let vector = self.embedder.encode_one(question).await?;
        let matches = self.index.query(&handle, &vector, FALLBACK_TOP_K).await?;
        if !matches.is_empty() {
            return Ok(matches);
        }

        tracing::debug!(conversation = conversation_id, "falling back to unranked dump");
        self.index.get_all(&handle).await
    }
}

fn build_query(question: &str, lead_terms: &[String]) -> String {
    if lead_terms.is_empty() {
        question.to_string()
    } else {
        format!("{question} {}", lead_terms.join(" "))
    }
}

/// Concatenates ranked chunk texts up to [`MAX_CONTEXT_CHUNKS`] chunks and
/// [`MAX_CONTEXT_CHARS`] characters. Whole chunks only: assembly stops at the
/// first chunk that would overflow the budget. Returns the context together
/// with the similarities of the chunks actually included.
fn assemble_context(matches: &[RetrievedChunk]) -> (String, Vec<f32>) {
    let mut context = String::new();
    let mut similarities = Vec::new();
    for chunk in matches.iter().take(MAX_CONTEXT_CHUNKS) {
        let addition = if context.is_empty() {
            chunk.text.len()
        } else {
            chunk.text.len() + 2
        };
        if context.len() + addition > MAX_CONTEXT_CHARS {
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&chunk.text);
        similarities.push(chunk.similarity);
    }
    (context, similarities)
}

/// Mean similarity of the included chunks, boosted and clamped to `[0, 1]`.
fn confidence_from(similarities: &[f32]) -> f32 {
    if similarities.is_empty() {
        return 0.0;
    }
    let mean = similarities.iter().sum::<f32>() / similarities.len() as f32;
    (mean * CONFIDENCE_BOOST).clamp(0.0, 1.0)
}

/// Replaces blank or degenerate replies with a deterministic sentinel so the
/// answer is never empty.
fn validate_answer(raw: &str, question: &str) -> String {
    let trimmed = raw.trim();
    let degenerate = trimmed.is_empty()
        || matches!(trimmed.to_lowercase().as_str(), "none" | "n/a" | "null");
    if degenerate {
        format!("processed but nothing found for: {question}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TranscriptChunk;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::llm::MockCompletionProvider;
    use crate::stores::{ChunkMetadata, CollectionHandle};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn chunk(text: &str, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                conversation_id: "conv".to_string(),
                chunk_id: 0,
                start_index: 0,
                end_index: text.split_whitespace().count(),
            },
            similarity,
        }
    }

    /// Vector index stub with scripted query responses.
    struct StubIndex {
        handle: Option<CollectionHandle>,
        queries: Mutex<VecDeque<Vec<RetrievedChunk>>>,
        dump: Vec<RetrievedChunk>,
    }

    impl StubIndex {
        fn new(
            handle: bool,
            queries: Vec<Vec<RetrievedChunk>>,
            dump: Vec<RetrievedChunk>,
        ) -> Arc<Self> {
            Arc::new(Self {
                handle: handle.then(|| CollectionHandle {
                    name: "conversation_conv".to_string(),
                    conversation_id: "conv".to_string(),
                    shard: "shard".to_string(),
                }),
                queries: Mutex::new(queries.into()),
                dump,
            })
        }
    }

    #[async_trait::async_trait]
    impl VectorIndex for StubIndex {
        async fn create_collection(&self, _: &str) -> Result<CollectionHandle> {
            Ok(self.handle.clone().unwrap())
        }

        async fn get_collection(&self, _: &str) -> Result<Option<CollectionHandle>> {
            Ok(self.handle.clone())
        }

        async fn insert_chunks(
            &self,
            _: &CollectionHandle,
            rows: Vec<(TranscriptChunk, Vec<f32>)>,
        ) -> Result<usize> {
            Ok(rows.len())
        }

        async fn query(
            &self,
            _: &CollectionHandle,
            _: &[f32],
            _: usize,
        ) -> Result<Vec<RetrievedChunk>> {
            Ok(self.queries.lock().pop_front().unwrap_or_default())
        }

        async fn get_all(&self, _: &CollectionHandle) -> Result<Vec<RetrievedChunk>> {
            Ok(self.dump.clone())
        }

        async fn count(&self, _: &CollectionHandle) -> Result<usize> {
            Ok(self.dump.len())
        }

        async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
            Ok(Vec::new())
        }

        async fn delete_collection(&self, _: &str) -> Result<bool> {
            Ok(false)
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }
    }

    fn extractor(
        index: Arc<StubIndex>,
        completions: Arc<MockCompletionProvider>,
    ) -> RagExtractor {
        let embedder = Arc::new(SharedEmbedder::preloaded(Arc::new(
            MockEmbeddingProvider::new(),
        )));
        RagExtractor::new(index, embedder, completions)
    }

    #[tokio::test]
    async fn answers_from_the_primary_query() {
        let index = StubIndex::new(
            true,
            vec![vec![chunk("order number is 12345", 0.9)]],
            Vec::new(),
        );
        let completions = Arc::new(MockCompletionProvider::new());
        completions.push_reply("The order number is 12345.");

        let result = extractor(index, completions.clone())
            .extract("conv", "What is the order number?", &["order_number".to_string()])
            .await;

        assert!(result.answer.contains("12345"));
        assert_eq!(result.chunks_used, 1);
        assert!(result.confidence > 0.9);
        // The user message carries both the context and the question.
        let requests = completions.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][1].content.contains("order number is 12345"));
    }

    #[tokio::test]
    async fn second_tier_uses_the_question_alone() {
        let index = StubIndex::new(
            true,
            vec![Vec::new(), vec![chunk("the balance was eighty euros", 0.4)]],
            Vec::new(),
        );
        let completions = Arc::new(MockCompletionProvider::new());
        completions.push_reply("Eighty euros.");

        let result = extractor(index, completions)
            .extract("conv", "What was the balance?", &["misleading_lead".to_string()])
            .await;

        assert_eq!(result.answer, "Eighty euros.");
        assert_eq!(result.chunks_used, 1);
    }

    #[tokio::test]
    async fn third_tier_falls_back_to_the_full_dump() {
        let index = StubIndex::new(
            true,
            vec![Vec::new(), Vec::new()],
            vec![chunk("hello how are you", 0.5)],
        );
        let completions = Arc::new(MockCompletionProvider::new());
        completions.push_reply("Information not found");

        let result = extractor(index, completions)
            .extract("conv", "What is the account balance?", &[])
            .await;

        assert_eq!(result.answer, "Information not found");
        assert_eq!(result.chunks_used, 1);
    }

    #[tokio::test]
    async fn empty_ladder_yields_the_no_information_result() {
        let index = StubIndex::new(true, vec![Vec::new(), Vec::new()], Vec::new());
        let completions = Arc::new(MockCompletionProvider::new());

        let result = extractor(index, completions.clone())
            .extract("conv", "Anything?", &[])
            .await;

        assert_eq!(result.answer, "No relevant information found in this conversation");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.chunks_used, 0);
        // The provider is never consulted without context.
        assert!(completions.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_collection_is_not_an_error() {
        let index = StubIndex::new(false, Vec::new(), Vec::new());
        let completions = Arc::new(MockCompletionProvider::new());

        let result = extractor(index, completions)
            .extract("ghost", "Anything?", &[])
            .await;

        assert_eq!(result.chunks_used, 0);
        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn degenerate_replies_are_substituted() {
        for reply in ["", "  ", "none", "N/A", "null"] {
            let index = StubIndex::new(true, vec![vec![chunk("some context", 0.8)]], Vec::new());
            let completions = Arc::new(MockCompletionProvider::new());
            completions.push_reply(reply);

            let result = extractor(index, completions)
                .extract("conv", "What is the order number?", &[])
                .await;
            assert_eq!(
                result.answer,
                "processed but nothing found for: What is the order number?"
            );
        }
    }

    #[tokio::test]
    async fn provider_failure_becomes_an_error_sentinel() {
        let index = StubIndex::new(true, vec![vec![chunk("context", 0.8)]], Vec::new());
        let completions = Arc::new(MockCompletionProvider::new());
        completions.push_failure("timeout");

        let result = extractor(index, completions)
            .extract("conv", "Anything?", &["lead".to_string()])
            .await;

        assert_eq!(result.answer, "Error occurred during processing");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.chunks_used, 0);
        assert_eq!(result.leads, vec!["lead".to_string()]);
    }

    #[test]
    fn context_assembly_respects_both_budgets() {
        let small: Vec<RetrievedChunk> = (0..8).map(|i| chunk(&format!("c{i}"), 0.9)).collect();
        let (_, similarities) = assemble_context(&small);
        assert_eq!(similarities.len(), MAX_CONTEXT_CHUNKS);

        let big = vec![
            chunk(&"x".repeat(2900), 0.9),
            chunk(&"y".repeat(200), 0.8),
            chunk("short", 0.7),
        ];
        let (context, similarities) = assemble_context(&big);
        // The second chunk would overflow; assembly stops without truncating.
        assert_eq!(similarities.len(), 1);
        assert_eq!(context.len(), 2900);

        let oversized = vec![chunk(&"z".repeat(4000), 0.9)];
        let (context, similarities) = assemble_context(&oversized);
        assert!(context.is_empty());
        assert!(similarities.is_empty());
    }

    #[test]
    fn confidence_is_boosted_mean_similarity() {
        assert_eq!(confidence_from(&[]), 0.0);
        let value = confidence_from(&[0.5, 0.7]);
        assert!((value - 0.72).abs() < 1e-6);
        assert_eq!(confidence_from(&[0.9, 1.0]), 1.0);
    }
}
