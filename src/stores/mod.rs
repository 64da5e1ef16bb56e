//! Vector storage for per-conversation transcript chunks.
//!
//! Each conversation owns exactly one named collection. Collections live in
//! physical shard directories under a shared storage root; shard identifiers
//! are opaque and unrelated to conversation ids, so reclaiming them is a
//! separate concern handled by [`lifecycle::StorageJanitor`].

pub mod lifecycle;
pub mod sqlite;

pub use lifecycle::StorageJanitor;
pub use sqlite::SqliteVectorIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunking::TranscriptChunk;
use crate::types::Result;

/// Similarity reported for unranked full dumps.
pub const NEUTRAL_SIMILARITY: f32 = 0.5;

/// Names a conversation's collection and the shard directory backing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    pub name: String,
    pub conversation_id: String,
    pub shard: String,
}

/// Metadata stored alongside every chunk and echoed back on retrieval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub conversation_id: String,
    pub chunk_id: usize,
    pub start_index: usize,
    pub end_index: usize,
}

/// One matched chunk returned from a query.
///
/// `similarity` is in `[0, 1]`, derived from cosine distance as
/// `max(0, 1 - distance)`; higher is more relevant.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity: f32,
}

/// Per-conversation vector index operations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent: returns the existing handle when the conversation already
    /// has a collection, otherwise allocates a new empty one.
    async fn create_collection(&self, conversation_id: &str) -> Result<CollectionHandle>;

    /// Pure lookup; never creates.
    async fn get_collection(&self, conversation_id: &str) -> Result<Option<CollectionHandle>>;

    /// Bulk-writes all chunk records in one transaction. Record ids follow
    /// the `{conversation_id}_{chunk_id}` convention, keeping them unique
    /// across the whole index. Returns the number of rows written.
    async fn insert_chunks(
        &self,
        handle: &CollectionHandle,
        rows: Vec<(TranscriptChunk, Vec<f32>)>,
    ) -> Result<usize>;

    /// At most `min(top_k, collection size)` chunks, ordered by descending
    /// similarity. An empty collection yields an empty sequence, not an
    /// error.
    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Unranked full dump with [`NEUTRAL_SIMILARITY`]; last-resort fallback.
    async fn get_all(&self, handle: &CollectionHandle) -> Result<Vec<RetrievedChunk>>;

    /// Number of chunks in the collection.
    async fn count(&self, handle: &CollectionHandle) -> Result<usize>;

    /// Every live collection in the index.
    async fn list_collections(&self) -> Result<Vec<CollectionHandle>>;

    /// Removes the named collection if present; `false` when it never
    /// existed. The physical shard is left for the janitor.
    async fn delete_collection(&self, conversation_id: &str) -> Result<bool>;

    /// Drops and reopens the backend's connection handles, releasing file
    /// descriptors. Only safe while no collections are live; the janitor
    /// serializes this against query and insert traffic.
    async fn reset(&self) -> Result<()>;
}
