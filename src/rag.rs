//! Retrieval-augmented answering: ingest documents into the vector store and
//! answer questions from the chunks most similar to them.

use crate::db::models::{Message, Role};
use crate::doc_processor::{self, DocumentError};
use crate::embedding::Embedder;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::vector_store::{ChunkMetadata, ScoredChunk, VectorRecord, VectorStore, VectorStoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Texts sent per embeddings call.
const EMBED_BATCH_SIZE: usize = 20;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions about the user's documents. \
Use the numbered context passages below when they are relevant and mention the source file you relied on. \
If the context does not contain the answer, say so and answer from general knowledge.";

const NO_CONTEXT_PROMPT: &str = "You are a helpful assistant. No uploaded document matched this question, \
so answer from general knowledge and say that no relevant document was found.";

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
}

#[derive(Debug, Clone)]
pub struct RagOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    /// Retrieval is discarded when the best match scores below this.
    pub similarity_threshold: f32,
    pub model: String,
    pub temperature: f32,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            top_k: 3,
            similarity_threshold: 0.7,
            model: "llama3-8b-8192".to_string(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: usize,
    pub chunk_count: usize,
    pub vectors_upserted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub source: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub score: f32,
}

impl From<&ScoredChunk> for Source {
    fn from(chunk: &ScoredChunk) -> Self {
        Self {
            source: chunk.metadata.source.clone(),
            document_id: chunk.metadata.document_id.clone(),
            chunk_index: chunk.metadata.chunk_index,
            score: chunk.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub body: String,
    pub sources: Vec<Source>,
    pub reasoning_steps: Vec<String>,
}

pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn ChatModel>,
    options: RagOptions,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn ChatModel>,
        options: RagOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            options,
        }
    }

    pub fn llm(&self) -> &Arc<dyn ChatModel> {
        &self.llm
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    /// Parse, chunk, embed and store one uploaded file.
    pub async fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        chat_id: Option<i64>,
    ) -> Result<IngestReport, RagError> {
        let parsed = doc_processor::parse_bytes(filename, bytes)?;
        let chunks = doc_processor::chunk_text(
            &parsed.content,
            self.options.chunk_size,
            self.options.chunk_overlap,
        );
        if chunks.is_empty() {
            return Err(DocumentError::Empty(filename.to_string()).into());
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            embeddings.extend(self.embedder.embed(batch).await?);
        }

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, values))| VectorRecord {
                id: format!("{}-{}", document_id, i),
                values,
                metadata: ChunkMetadata {
                    text: chunk.text,
                    source: filename.to_string(),
                    document_id: document_id.clone(),
                    chunk_index: i as u32,
                    start_index: chunk.start_index as u32,
                    chat_id,
                },
            })
            .collect();
        let chunk_count = records.len();

        self.store.ensure_index().await?;
        let vectors_upserted = self.store.upsert(records).await?;
        log::info!(
            "ingested {} ({}): {} chunks, {} vectors",
            filename,
            parsed.file_type,
            chunk_count,
            vectors_upserted
        );

        Ok(IngestReport {
            document_id,
            filename: filename.to_string(),
            file_type: parsed.file_type,
            file_size: bytes.len(),
            chunk_count,
            vectors_upserted,
        })
    }

    /// Chunks relevant to `question`, best first. Empty when nothing clears
    /// the similarity threshold.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, RagError> {
        let mut vectors = self.embedder.embed(&[question.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            LlmError::Parse("embeddings response contained no vector".to_string())
        })?;

        let mut matches = match self.store.query(&vector, self.options.top_k).await {
            Ok(matches) => matches,
            // Nothing has been uploaded yet.
            Err(VectorStoreError::IndexNotFound(name)) => {
                log::info!("index {} does not exist yet, answering without context", name);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        match matches.first() {
            Some(best) if best.score >= self.options.similarity_threshold => {
                log::debug!("retrieved {} chunks, best score {:.3}", matches.len(), best.score);
                Ok(matches)
            }
            Some(best) => {
                log::debug!(
                    "best score {:.3} below threshold {:.3}, dropping context",
                    best.score,
                    self.options.similarity_threshold
                );
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn answer(&self, question: &str, history: &[Message]) -> Result<Answer, RagError> {
        let context = self.retrieve(question).await?;
        let request = ChatRequest {
            messages: build_prompt(question, &context, history),
            model: self.options.model.clone(),
            temperature: Some(self.options.temperature),
            tools: Vec::new(),
        };
        let response = self.llm.chat(&request).await?;

        let mut reasoning_steps = Vec::new();
        if context.is_empty() {
            reasoning_steps.push("No relevant document passages found".to_string());
        } else {
            reasoning_steps.push(format!(
                "Retrieved {} passages from {}",
                context.len(),
                source_list(&context)
            ));
        }

        Ok(Answer {
            body: response.content,
            sources: context.iter().map(Source::from).collect(),
            reasoning_steps,
        })
    }
}

/// Distinct source names in retrieval order.
pub fn source_list(chunks: &[ScoredChunk]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for chunk in chunks {
        if !names.contains(&chunk.metadata.source.as_str()) {
            names.push(&chunk.metadata.source);
        }
    }
    names.join(", ")
}

/// Numbered context passages, one block per chunk.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] (source: {})\n{}", i + 1, c.metadata.source, c.metadata.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt with context, then prior turns, then the question.
pub fn build_prompt(question: &str, context: &[ScoredChunk], history: &[Message]) -> Vec<ChatMessage> {
    let system = if context.is_empty() {
        NO_CONTEXT_PROMPT.to_string()
    } else {
        format!("{}\n\nContext:\n{}", SYSTEM_PROMPT, format_context(context))
    };

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history.iter().filter_map(|m| match m.role {
        Role::User => Some(ChatMessage::user(m.content.clone())),
        Role::Assistant => Some(ChatMessage::assistant(m.content.clone())),
        Role::System => None,
    }));
    messages.push(ChatMessage::user(question));
    messages
}
