//! Environment-driven settings with compiled defaults.
//!
//! Every knob can be overridden through a `CALLSIFT_*` environment variable
//! (a `.env` file is honored when present). Invalid values are configuration
//! errors rather than silent fallbacks.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{Result, SiftError};

/// Runtime configuration for the extraction pipeline.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Root directory holding the vector index catalog and shard directories.
    pub index_root: PathBuf,
    /// Words per transcript chunk.
    pub chunk_window: usize,
    /// Words shared by consecutive chunks; clamped to half the window at
    /// chunking time.
    pub chunk_overlap: usize,
    /// Model name sent to the embeddings endpoint.
    pub embedding_model: String,
    /// Model name sent to the chat-completions endpoint.
    pub completion_model: String,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// API key; required before any provider-backed call is made.
    pub api_key: Option<String>,
    /// Upper bound on a single provider request.
    pub request_timeout: Duration,
    /// Maximum accepted transcript upload size in bytes.
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_root: PathBuf::from("./vector_db"),
            chunk_window: 2000,
            chunk_overlap: 200,
            embedding_model: "text-embedding-3-small".to_string(),
            completion_model: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Builds settings from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();

        if let Some(root) = env_var("CALLSIFT_INDEX_ROOT") {
            settings.index_root = PathBuf::from(root);
        }
        if let Some(window) = env_parse::<usize>("CALLSIFT_CHUNK_WINDOW")? {
            settings.chunk_window = window;
        }
        if let Some(overlap) = env_parse::<usize>("CALLSIFT_CHUNK_OVERLAP")? {
            settings.chunk_overlap = overlap;
        }
        if let Some(model) = env_var("CALLSIFT_EMBEDDING_MODEL") {
            settings.embedding_model = model;
        }
        if let Some(model) = env_var("CALLSIFT_COMPLETION_MODEL") {
            settings.completion_model = model;
        }
        if let Some(base) = env_var("CALLSIFT_API_BASE") {
            settings.api_base = base;
        }
        if let Some(seconds) = env_parse::<u64>("CALLSIFT_REQUEST_TIMEOUT_SECS")? {
            settings.request_timeout = Duration::from_secs(seconds);
        }
        if let Some(bytes) = env_parse::<usize>("CALLSIFT_MAX_UPLOAD_BYTES")? {
            settings.max_upload_bytes = bytes;
        }
        settings.api_key = env_var("CALLSIFT_API_KEY").or_else(|| env_var("OPENAI_API_KEY"));

        Ok(settings)
    }

    /// The configured API key, or a configuration error when unset.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SiftError::Config("CALLSIFT_API_KEY is not set".to_string()))
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| SiftError::Config(format!("invalid {key}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.chunk_window, 2000);
        assert_eq!(settings.chunk_overlap, 200);
        assert_eq!(settings.request_timeout, Duration::from_secs(60));
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_api_key(),
            Err(SiftError::Config(_))
        ));
    }
}
