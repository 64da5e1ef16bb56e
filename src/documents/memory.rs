//! In-memory document store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    ConversationRecord, DocumentStore, ExtractionRecord, OrganizationRecord, QuestionRecord,
};
use crate::types::{Result, SiftError};

/// Reference [`DocumentStore`] backed by process memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: RwLock<State>,
}

#[derive(Default)]
struct State {
    organizations: HashMap<String, OrganizationRecord>,
    questions: HashMap<String, QuestionRecord>,
    conversations: HashMap<String, ConversationRecord>,
    results: Vec<ExtractionRecord>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert_organization(&self, organization: OrganizationRecord) -> Result<()> {
        self.inner
            .write()
            .organizations
            .insert(organization.id.clone(), organization);
        Ok(())
    }

    async fn organization(&self, organization_id: &str) -> Result<Option<OrganizationRecord>> {
        Ok(self.inner.read().organizations.get(organization_id).cloned())
    }

    async fn organizations(&self) -> Result<Vec<OrganizationRecord>> {
        let mut all: Vec<_> = self.inner.read().organizations.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete_organization(&self, organization_id: &str) -> Result<bool> {
        let mut state = self.inner.write();
        if state.organizations.remove(organization_id).is_none() {
            return Ok(false);
        }
        let question_ids: Vec<String> = state
            .questions
            .values()
            .filter(|q| q.organization_id == organization_id)
            .map(|q| q.id.clone())
            .collect();
        for id in &question_ids {
            state.questions.remove(id);
        }
        let conversation_ids: Vec<String> = state
            .conversations
            .values()
            .filter(|c| c.organization_id == organization_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &conversation_ids {
            state.conversations.remove(id);
        }
        state.results.retain(|r| {
            !question_ids.contains(&r.question_id)
                && !conversation_ids.contains(&r.conversation_id)
        });
        Ok(true)
    }

    async fn upsert_question(&self, question: QuestionRecord) -> Result<()> {
        self.inner
            .write()
            .questions
            .insert(question.id.clone(), question);
        Ok(())
    }

    async fn questions_for(&self, organization_id: &str) -> Result<Vec<QuestionRecord>> {
        let mut questions: Vec<_> = self
            .inner
            .read()
            .questions
            .values()
            .filter(|q| q.organization_id == organization_id)
            .cloned()
            .collect();
        questions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(questions)
    }

    async fn question_by_text(
        &self,
        organization_id: &str,
        text: &str,
    ) -> Result<Option<QuestionRecord>> {
        Ok(self
            .inner
            .read()
            .questions
            .values()
            .find(|q| q.organization_id == organization_id && q.text == text)
            .cloned())
    }

    async fn delete_question(&self, question_id: &str) -> Result<bool> {
        let mut state = self.inner.write();
        if state.questions.remove(question_id).is_none() {
            return Ok(false);
        }
        state.results.retain(|r| r.question_id != question_id);
        Ok(true)
    }

    async fn upsert_conversation(&self, conversation: ConversationRecord) -> Result<()> {
        self.inner
            .write()
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.inner.read().conversations.get(conversation_id).cloned())
    }

    async fn mark_processed(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.inner.write();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| {
                SiftError::Documents(format!("unknown conversation {conversation_id}"))
            })?;
        conversation.processed = true;
        Ok(())
    }

    async fn insert_result(&self, result: ExtractionRecord) -> Result<()> {
        self.inner.write().results.push(result);
        Ok(())
    }

    async fn results_for(&self, conversation_id: &str) -> Result<Vec<ExtractionRecord>> {
        let mut results: Vec<_> = self
            .inner
            .read()
            .results
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::AnswerExtraction;

    fn extraction(answer: &str) -> AnswerExtraction {
        AnswerExtraction {
            answer: answer.to_string(),
            confidence: 0.8,
            leads: vec!["lead".to_string()],
            chunks_used: 1,
        }
    }

    #[tokio::test]
    async fn question_text_lookup_is_scoped_to_the_organization() {
        let store = MemoryDocumentStore::new();
        let org_a = OrganizationRecord::new("A");
        let org_b = OrganizationRecord::new("B");
        store.upsert_organization(org_a.clone()).await.unwrap();
        store.upsert_organization(org_b.clone()).await.unwrap();
        store
            .upsert_question(QuestionRecord::new(&org_a.id, "Same text?", Vec::new()))
            .await
            .unwrap();

        assert!(store
            .question_by_text(&org_a.id, "Same text?")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .question_by_text(&org_b.id, "Same text?")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deleting_an_organization_cascades() {
        let store = MemoryDocumentStore::new();
        let org = OrganizationRecord::new("Acme");
        store.upsert_organization(org.clone()).await.unwrap();

        let question = QuestionRecord::new(&org.id, "Q?", Vec::new());
        store.upsert_question(question.clone()).await.unwrap();

        let conversation = ConversationRecord::new(&org.id, "call.txt", "hello");
        store.upsert_conversation(conversation.clone()).await.unwrap();
        store
            .insert_result(ExtractionRecord::new(
                &conversation.id,
                &question.id,
                "Q?",
                extraction("A"),
            ))
            .await
            .unwrap();

        assert!(store.delete_organization(&org.id).await.unwrap());
        assert!(store.organization(&org.id).await.unwrap().is_none());
        assert!(store.questions_for(&org.id).await.unwrap().is_empty());
        assert!(store.conversation(&conversation.id).await.unwrap().is_none());
        assert!(store.results_for(&conversation.id).await.unwrap().is_empty());
        assert!(!store.delete_organization(&org.id).await.unwrap());
    }

    #[tokio::test]
    async fn results_come_back_newest_first() {
        let store = MemoryDocumentStore::new();
        let mut first = ExtractionRecord::new("conv", "q1", "Q1?", extraction("first"));
        let second = ExtractionRecord::new("conv", "q2", "Q2?", extraction("second"));
        first.created_at = second.created_at - chrono::Duration::seconds(5);
        store.insert_result(first).await.unwrap();
        store.insert_result(second).await.unwrap();

        let results = store.results_for("conv").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].answer, "second");
    }

    #[tokio::test]
    async fn confidence_is_clamped_into_range() {
        let record = ExtractionRecord::new(
            "conv",
            "q",
            "Q?",
            AnswerExtraction {
                answer: "A".to_string(),
                confidence: 3.5,
                leads: Vec::new(),
                chunks_used: 1,
            },
        );
        assert_eq!(record.confidence, 1.0);
    }

    #[tokio::test]
    async fn marking_an_unknown_conversation_fails() {
        let store = MemoryDocumentStore::new();
        assert!(store.mark_processed("ghost").await.is_err());
    }
}
