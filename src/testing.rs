//! Offline stand-ins for the hosted services, used by unit and integration
//! tests and by nothing else.

use crate::config::Settings;
use crate::db::Database;
use crate::embedding::Embedder;
use crate::error::AppError;
use crate::llm::{ChatModel, ChatRequest, ChatResponse, LlmError, ToolCall};
use crate::rag::RagPipeline;
use crate::server::AppState;
use crate::vector_store::memory::MemoryStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// `dimension` buckets and the counts are normalised.
pub struct KeywordEmbedder {
    dimension: usize,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Replays queued responses, then falls back to echoing the system prompt so
/// callers can see which context reached the model.
#[derive(Default)]
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<ChatResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().push(request.clone());
        if let Some(reply) = self.replies.lock().pop_front() {
            return Ok(reply);
        }
        let system = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(ChatResponse::text(format!("Echo: {}", system), &request.model))
    }
}

/// A model whose API always answers with `status`.
pub struct FailingChatModel {
    pub status: u16,
}

#[async_trait]
impl ChatModel for FailingChatModel {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        Err(LlmError::Api {
            status: self.status,
            message: "scripted failure".to_string(),
        })
    }
}

/// An assistant turn that requests a single tool call.
pub fn tool_call_reply(id: &str, name: &str, arguments: serde_json::Value) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        model: "scripted".to_string(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

/// Settings for an offline run: fake keys, memory vector store, and
/// `overrides` applied on top.
pub fn settings(overrides: &[(&str, &str)]) -> Result<Settings, AppError> {
    let defaults: &[(&str, &str)] = &[
        ("GROQ_API_KEY", "gsk_test_key_0000"),
        ("OPENAI_API_KEY", "sk-test-key-0000"),
        ("VECTOR_STORE", "memory"),
        ("EMBEDDING_DIMENSION", "64"),
    ];
    let lookup = |key: &str| {
        overrides
            .iter()
            .chain(defaults.iter())
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    };
    Ok(Settings::from_lookup(lookup)?)
}

/// Application state wired to an in-memory database, a [`MemoryStore`] and
/// a [`KeywordEmbedder`].
pub fn app_state(settings: Settings, llm: Arc<dyn ChatModel>) -> Result<AppState, AppError> {
    let dimension = settings.embedding_dimension;
    let rag = RagPipeline::new(
        Arc::new(KeywordEmbedder::new(dimension)),
        Arc::new(MemoryStore::new(settings.pinecone_index_name.clone(), dimension)),
        llm,
        settings.rag_options(),
    );
    Ok(AppState::new(Database::open_in_memory()?, rag, settings))
}
