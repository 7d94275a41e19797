//! HTTP surface: shared state, routes and middleware.

use crate::agent::Agent;
use crate::commands::{chat, health, knowledge, settings};
use crate::config::Settings;
use crate::db::Database;
use crate::rag::RagPipeline;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Multipart framing and form fields on top of the uploaded files.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Files accepted in one request at the maximum file size.
const MAX_FILES_PER_REQUEST: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub rag: Arc<RagPipeline>,
    pub agent: Arc<Agent>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(db: Database, rag: RagPipeline, settings: Settings) -> Self {
        let rag = Arc::new(rag);
        Self {
            db: Arc::new(db),
            agent: Arc::new(Agent::new(rag.clone())),
            rag,
            settings: Arc::new(settings),
        }
    }
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match frontend_url.map(|url| url.trim_end_matches('/').parse::<HeaderValue>()) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            log::warn!("FRONTEND_URL is not a valid origin ({}), allowing any origin", e);
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} {} {}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

pub fn router(state: AppState) -> Router {
    let body_limit = state
        .settings
        .max_file_bytes()
        .saturating_mul(MAX_FILES_PER_REQUEST)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let cors = cors_layer(state.settings.frontend_url.as_deref());

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/api/health", get(health::health))
        .route("/api/settings", get(settings::get_settings))
        // Chats
        .route("/api/chats/", get(chat::list_chats))
        .route("/api/chats/new/", post(chat::create_chat))
        .route("/api/chats/{id}/rename/", put(chat::rename_chat))
        .route("/api/chats/{id}/delete", delete(chat::delete_chat))
        .route("/api/chats/{id}/messages/", get(chat::get_messages))
        .route("/api/chats/{id}/send/", post(chat::send_message))
        // Knowledge base
        .route("/api/documents/", get(knowledge::list_documents))
        .route("/api/documents/upload/", post(knowledge::upload_documents))
        .route("/api/index/stats", get(knowledge::index_stats))
        .route("/api/index/reset", post(knowledge::reset_index))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("could not install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}
