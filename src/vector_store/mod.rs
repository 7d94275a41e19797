//! Storage and similarity search for chunk embeddings.

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Metadata stored next to every vector. `text` carries the chunk itself so a
/// query result can be put into a prompt without another lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default, deserialize_with = "whole_number")]
    pub chunk_index: u32,
    #[serde(default, deserialize_with = "whole_number")]
    pub start_index: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_whole_number"
    )]
    pub chat_id: Option<i64>,
}

// Pinecone stores every metadata number as a float and may return `3.0`.
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(f64::deserialize(deserializer)? as u32)
}

fn optional_whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.map(|v| v as i64))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub index_name: String,
    pub dimension: usize,
    pub total_vector_count: u64,
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Vector store API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Index '{0}' not found; upload a document to create it")]
    IndexNotFound(String),
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Index '{0}' is not ready yet")]
    NotReady(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Make sure the index exists, creating it when it does not.
    async fn ensure_index(&self) -> Result<(), VectorStoreError>;

    /// Insert records, returning how many were written.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError>;

    /// Nearest neighbours of `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    async fn stats(&self) -> Result<IndexStats, VectorStoreError>;

    /// Drop every vector by deleting and recreating the index.
    async fn recreate_index(&self) -> Result<(), VectorStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_accepts_float_numbers() {
        let metadata: ChunkMetadata = serde_json::from_value(json!({
            "text": "hello",
            "source": "a.txt",
            "chunk_index": 3.0,
            "start_index": 120,
            "chat_id": 7.0
        }))
        .unwrap();
        assert_eq!(metadata.chunk_index, 3);
        assert_eq!(metadata.start_index, 120);
        assert_eq!(metadata.chat_id, Some(7));
        assert_eq!(metadata.document_id, "");
    }
}
