use crate::llm::openai::OpenAiConfig;
use crate::llm::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Turns text into fixed-width vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Width of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings from the OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    config: OpenAiConfig,
    model: String,
    dimension: usize,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig, model: String, dimension: usize, client: Client) -> Self {
        Self {
            config,
            model,
            dimension,
            client,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut req = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body);

        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            log::warn!("embedding request failed with {}: {}", status, text);
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let data: EmbeddingResponse = resp.json().await?;
        collect_embeddings(data, texts.len(), self.dimension)
    }
}

fn collect_embeddings(
    mut data: EmbeddingResponse,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, LlmError> {
    if data.data.len() != expected_count {
        return Err(LlmError::Parse(format!(
            "expected {} embeddings, got {}",
            expected_count,
            data.data.len()
        )));
    }
    data.data.sort_by_key(|d| d.index);

    let vectors: Vec<Vec<f32>> = data.data.into_iter().map(|d| d.embedding).collect();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(LlmError::Dimension {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
