use super::{IndexStats, ScoredChunk, VectorRecord, VectorStore, VectorStoreError};
use crate::embedding::cosine_similarity;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Brute-force cosine index held in process memory.
pub struct MemoryStore {
    name: String,
    dimension: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn records(&self) -> Vec<VectorRecord> {
        self.records.read().clone()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), VectorStoreError> {
        if actual != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_index(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError> {
        for record in &records {
            self.check_dimension(record.values.len())?;
        }
        let count = records.len();
        let mut stored = self.records.write();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(count)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        self.check_dimension(vector.len())?;
        let stored = self.records.read();
        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .map(|r| ScoredChunk {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn stats(&self) -> Result<IndexStats, VectorStoreError> {
        Ok(IndexStats {
            index_name: self.name.clone(),
            dimension: self.dimension,
            total_vector_count: self.len() as u64,
        })
    }

    async fn recreate_index(&self) -> Result<(), VectorStoreError> {
        self.records.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::ChunkMetadata;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            values,
            metadata: ChunkMetadata {
                text: format!("text of {id}"),
                source: "notes.txt".into(),
                document_id: "doc".into(),
                chunk_index: 0,
                start_index: 0,
                chat_id: None,
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = MemoryStore::new("test", 2);
        store
            .upsert(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.6, 0.8])])
            .await
            .unwrap();

        let results = store.query(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(results[0].id, "b");
        assert_eq!(results[1].id, "a");
        assert!(results[0].score > results[1].score);

        let top = store.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let store = MemoryStore::new("test", 3);
        let err = store.upsert(vec![record("a", vec![1.0])]).await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_same_id_overwrites_and_recreate_clears() {
        let store = MemoryStore::new("test", 2);
        store.upsert(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_vector_count, 1);

        store.recreate_index().await.unwrap();
        assert!(store.is_empty());
    }
}
