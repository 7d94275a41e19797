pub mod agent;
pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod rag;
pub mod server;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vector_store;

use config::{Settings, VectorStoreKind};
use db::Database;
use embedding::OpenAiEmbedder;
use error::AppError;
use llm::openai::OpenAiChatClient;
use rag::RagPipeline;
use server::AppState;
use std::sync::Arc;
use vector_store::memory::MemoryStore;
use vector_store::pinecone::PineconeStore;
use vector_store::{IndexStats, VectorStore, VectorStoreError};

/// Wire the hosted services, the vector store and the database together.
pub fn build_state(settings: Settings) -> Result<AppState, AppError> {
    let client = settings.http_client()?;
    let db = Database::open(&settings.data_dir)?;

    let embedder = Arc::new(OpenAiEmbedder::new(
        settings.openai_config(),
        settings.embedding_model.clone(),
        settings.embedding_dimension,
        client.clone(),
    ));
    let store: Arc<dyn VectorStore> = match settings.vector_store {
        VectorStoreKind::Pinecone => Arc::new(PineconeStore::new(settings.pinecone_config(), client.clone())),
        VectorStoreKind::Memory => {
            log::warn!("using the in-memory vector store; vectors are lost on restart");
            Arc::new(MemoryStore::new(
                settings.pinecone_index_name.clone(),
                settings.embedding_dimension,
            ))
        }
    };
    let llm = Arc::new(OpenAiChatClient::new(settings.groq_config(), client));

    let rag = RagPipeline::new(embedder, store, llm, settings.rag_options());
    Ok(AppState::new(db, rag, settings))
}

/// Check that the vector store is reachable. A missing index is fine: it is created on the
/// first upload.
pub async fn check_store(store: &dyn VectorStore) -> Result<Option<IndexStats>, VectorStoreError> {
    match store.stats().await {
        Ok(stats) => Ok(Some(stats)),
        Err(VectorStoreError::IndexNotFound(name)) => {
            log::warn!("index '{}' does not exist yet; it will be created on first upload", name);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub async fn run(settings: Settings) -> Result<(), AppError> {
    let addr = settings.socket_addr()?;
    log::info!(
        "starting with model {} and embeddings {} ({} dims)",
        settings.groq_model,
        settings.embedding_model,
        settings.embedding_dimension
    );
    let state = build_state(settings)?;

    match check_store(state.rag.store().as_ref()).await {
        Ok(Some(stats)) => log::info!(
            "index '{}' holds {} vectors",
            stats.index_name,
            stats.total_vector_count
        ),
        Ok(None) => {}
        Err(e @ VectorStoreError::DimensionMismatch { .. }) => return Err(e.into()),
        Err(e) => log::warn!("vector store not reachable at startup: {}", e),
    }

    server::serve(state, addr).await?;
    Ok(())
}
