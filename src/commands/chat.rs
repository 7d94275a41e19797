use crate::commands::form::ChatForm;
use crate::commands::knowledge::{check_uploads, store_upload};
use crate::db::models::{Chat, Message, Role};
use crate::db::DEFAULT_CHAT_TITLE;
use crate::error::AppError;
use crate::rag::{IngestReport, Source};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Characters of the first question kept as the chat title.
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Serialize)]
pub struct CreatedChat {
    pub chat_id: i64,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameChat {
    #[serde(alias = "title")]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedChat {
    pub chat_id: i64,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub body: String,
    pub reasoning_steps: Vec<String>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub agent_response: AgentResponse,
    pub uploads: Vec<IngestReport>,
    pub user_message: Option<Message>,
    pub assistant_message: Option<Message>,
}

/// Title derived from the first question of a chat.
pub fn title_from_query(query: &str) -> String {
    let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if query.chars().count() <= TITLE_MAX_CHARS {
        return query;
    }
    let head: String = query.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", head.trim_end())
}

/// One line acknowledging the ingested files, empty when there were none.
pub fn describe_uploads(uploads: &[IngestReport]) -> String {
    if uploads.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = uploads
        .iter()
        .map(|u| {
            let unit = if u.chunk_count == 1 { "chunk" } else { "chunks" };
            format!("{} ({} {})", u.filename, u.chunk_count, unit)
        })
        .collect();
    format!("Processed {}.", parts.join(", "))
}

fn require_chat(state: &AppState, id: i64) -> Result<Chat, AppError> {
    state.db.get_chat(id)?.ok_or(AppError::ChatNotFound(id))
}

pub async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<Chat>>, AppError> {
    Ok(Json(state.db.list_chats()?))
}

pub async fn create_chat(State(state): State<AppState>) -> Result<Json<CreatedChat>, AppError> {
    let chat = state.db.create_chat(DEFAULT_CHAT_TITLE)?;
    log::info!("created chat {}", chat.id);
    Ok(Json(CreatedChat {
        chat_id: chat.id,
        title: chat.title,
        created_at: chat.created_at,
    }))
}

pub async fn rename_chat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RenameChat>,
) -> Result<Json<Chat>, AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    let chat = state.db.rename_chat(id, name)?.ok_or(AppError::ChatNotFound(id))?;
    Ok(Json(chat))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeletedChat>, AppError> {
    let deleted = state.db.delete_chat(id)?;
    if deleted {
        log::info!("deleted chat {}", id);
    }
    Ok(Json(DeletedChat { chat_id: id, deleted }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Message>>, AppError> {
    require_chat(&state, id)?;
    Ok(Json(state.db.get_messages(id)?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    form: ChatForm,
) -> Result<Json<SendResponse>, AppError> {
    let chat = require_chat(&state, id)?;
    let query = form.query.trim().to_string();
    if query.is_empty() && form.files.is_empty() {
        return Err(AppError::BadRequest("query must not be empty".into()));
    }

    // 1. Ingest attachments before answering so the question can use them
    check_uploads(&form.files)?;
    let mut uploads = Vec::with_capacity(form.files.len());
    for upload in &form.files {
        uploads.push(store_upload(&state, &upload.filename, &upload.bytes, Some(id)).await?);
    }
    let upload_note = describe_uploads(&uploads);

    if query.is_empty() {
        return Ok(Json(SendResponse {
            agent_response: AgentResponse {
                body: upload_note,
                reasoning_steps: Vec::new(),
                sources: Vec::new(),
            },
            uploads,
            user_message: None,
            assistant_message: None,
        }));
    }

    // 2. Answer from the prior history
    let history = state.db.recent_messages(id, state.settings.history_limit)?;
    let answer = if form.agent {
        state.agent.run(&query, &history).await?
    } else {
        state.rag.answer(&query, &history).await?
    };

    // 3. Save both turns only once the answer exists
    let user_message = state.db.add_message(id, Role::User, &query)?;
    if chat.title == DEFAULT_CHAT_TITLE {
        state.db.rename_chat(id, &title_from_query(&query))?;
    }
    let body = if upload_note.is_empty() {
        answer.body
    } else {
        format!("{}\n\n{}", upload_note, answer.body)
    };
    let assistant_message = state.db.add_message(id, Role::Assistant, &body)?;

    Ok(Json(SendResponse {
        agent_response: AgentResponse {
            body,
            reasoning_steps: answer.reasoning_steps,
            sources: answer.sources,
        },
        uploads,
        user_message: Some(user_message),
        assistant_message: Some(assistant_message),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_title_from_query() {
        assert_eq!(title_from_query("  What is\n Rust?  "), "What is Rust?");
        let long = "word ".repeat(30);
        let title = title_from_query(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_describe_uploads() {
        let report = |name: &str, chunks: usize| IngestReport {
            document_id: "d".into(),
            filename: name.into(),
            file_type: "txt".into(),
            file_size: 10,
            chunk_count: chunks,
            vectors_upserted: chunks,
        };
        assert_eq!(describe_uploads(&[]), "");
        assert_eq!(
            describe_uploads(&[report("a.txt", 1), report("b.md", 3)]),
            "Processed a.txt (1 chunk), b.md (3 chunks)."
        );
    }
}
