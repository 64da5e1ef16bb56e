//! Embedding provider seam and the process-wide shared embedder.
//!
//! All retrieval depends on a single embedding model, so the model is held
//! behind [`SharedEmbedder`]: a process-wide handle with lazy, once-only
//! initialization. Concurrent first calls coalesce on the same load; a load
//! failure is surfaced to the caller and should abort startup.

pub mod openai;

pub use openai::OpenAiEmbeddings;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::config::Settings;
use crate::types::{Result, SiftError};

/// Converts text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// Process-wide embedder with lazy, once-only provider initialization.
///
/// The provider is either installed up front ([`SharedEmbedder::preloaded`])
/// or built from [`Settings`] on first use ([`SharedEmbedder::lazy`]). Once
/// initialized it is read-only and safe for unlimited concurrent `encode`
/// calls. The first successful encode pins the vector dimensionality for the
/// rest of the process lifetime.
pub struct SharedEmbedder {
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
    settings: Option<Settings>,
    dimensions: Mutex<Option<usize>>,
}

impl SharedEmbedder {
    /// Defers provider construction to the first `encode` call.
    pub fn lazy(settings: Settings) -> Self {
        Self {
            cell: OnceCell::new(),
            settings: Some(settings),
            dimensions: Mutex::new(None),
        }
    }

    /// Installs an already-constructed provider (tests, custom backends).
    pub fn preloaded(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(provider)),
            settings: None,
            dimensions: Mutex::new(None),
        }
    }

    /// Whether the underlying provider has been initialized.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Vector dimensionality observed on the first successful encode.
    pub fn dimensions(&self) -> Option<usize> {
        *self.dimensions.lock()
    }

    async fn provider(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.cell
            .get_or_try_init(|| async {
                let settings = self.settings.as_ref().ok_or_else(|| {
                    SiftError::Config("no embedding provider configured".to_string())
                })?;
                tracing::info!(model = %settings.embedding_model, "loading embedding provider");
                let provider = OpenAiEmbeddings::from_settings(settings)?;
                Ok(Arc::new(provider) as Arc<dyn EmbeddingProvider>)
            })
            .await
    }

    /// Encodes `texts`; output positions correspond 1:1 with the input.
    pub async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let provider = self.provider().await?;
        let vectors = provider.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(SiftError::Embedding(format!(
                "provider {} returned {} vectors for {} inputs",
                provider.name(),
                vectors.len(),
                texts.len()
            )));
        }
        self.check_dimensions(&vectors)?;
        Ok(vectors)
    }

    /// Encodes a single query string.
    pub async fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.encode(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| SiftError::Embedding("provider returned no vector".to_string()))
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let mut guard = self.dimensions.lock();
        for vector in vectors {
            match *guard {
                Some(dimensions) if vector.len() != dimensions => {
                    return Err(SiftError::Embedding(format!(
                        "provider returned a {}-dimension vector, expected {dimensions}",
                        vector.len()
                    )));
                }
                Some(_) => {}
                None => *guard = Some(vector.len()),
            }
        }
        Ok(())
    }
}

/// Deterministic embedding provider for tests.
///
/// Words are hashed into a fixed number of buckets and the resulting vector
/// is L2-normalized, so texts sharing vocabulary score higher under cosine
/// similarity without any model involved.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimensions: 32 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let token: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn encode_preserves_input_order() {
        let embedder = SharedEmbedder::preloaded(Arc::new(MockEmbeddingProvider::new()));
        let texts = vec![
            "alpha beta".to_string(),
            "gamma delta".to_string(),
            "alpha beta".to_string(),
        ];
        let vectors = embedder.encode(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let provider = MockEmbeddingProvider::new();
        let base = provider.vector_for("my order number is 12345");
        let related = provider.vector_for("what is the order number");
        let unrelated = provider.vector_for("completely different topic here");
        assert!(cosine(&base, &related) > cosine(&base, &unrelated));
    }

    #[tokio::test]
    async fn dimension_drift_is_rejected() {
        struct DriftingProvider;

        #[async_trait]
        impl EmbeddingProvider for DriftingProvider {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| vec![0.0; 4 + i])
                    .collect())
            }

            fn name(&self) -> &str {
                "drifting"
            }
        }

        let embedder = SharedEmbedder::preloaded(Arc::new(DriftingProvider));
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            embedder.encode(&texts).await,
            Err(SiftError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn lazy_embedder_without_key_fails_on_first_use() {
        let embedder = SharedEmbedder::lazy(Settings::default());
        assert!(!embedder.is_loaded());
        let texts = vec!["hello".to_string()];
        assert!(embedder.encode(&texts).await.is_err());
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let embedder = SharedEmbedder::lazy(Settings::default());
        let vectors = embedder.encode(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert!(!embedder.is_loaded());
    }
}
