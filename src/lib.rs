//! ```text
//! Transcript upload ──► chunking ──► embeddings::SharedEmbedder
//!                                             │
//!                                             ▼
//!                     stores::SqliteVectorIndex (one collection per conversation)
//!                                             │
//! Organization questions ──► extraction::RagExtractor ──► llm::CompletionProvider
//!                                             │
//! Durable results (documents::DocumentStore) ──► stores::StorageJanitor reclaim
//! ```
//!
pub mod chunking;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod extraction;
pub mod llm;
pub mod pipeline;
pub mod stores;
pub mod types;

pub use config::Settings;
pub use pipeline::ConversationProcessor;
pub use types::{Result, SiftError};
