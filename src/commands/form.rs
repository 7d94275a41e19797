//! Body extractor for the send and upload endpoints. Browsers post
//! `multipart/form-data`; scripts may send urlencoded fields or JSON.

use crate::error::AppError;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct ChatForm {
    pub query: String,
    pub agent: bool,
    pub files: Vec<Upload>,
}

#[derive(Deserialize)]
struct FormFields {
    #[serde(default)]
    query: String,
    #[serde(default)]
    agent: String,
}

#[derive(Deserialize)]
struct JsonFields {
    #[serde(default)]
    query: String,
    #[serde(default)]
    agent: Value,
}

/// Accepts the spellings HTML forms and JavaScript clients produce.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

fn flag_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => parse_flag(s),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(error.body_text())
    } else {
        AppError::BadRequest(error.body_text())
    }
}

async fn read_multipart(mut multipart: Multipart, max_file_bytes: usize) -> Result<ChatForm, AppError> {
    let mut form = ChatForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "query" | "message" => form.query = field.text().await.map_err(multipart_error)?,
            "agent" => form.agent = parse_flag(&field.text().await.map_err(multipart_error)?),
            "files" | "files[]" | "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty part when no file was picked.
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                if bytes.len() > max_file_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "{} is {} bytes, the limit is {} bytes",
                        filename,
                        bytes.len(),
                        max_file_bytes
                    )));
                }
                form.files.push(Upload { filename, bytes });
            }
            other => log::debug!("ignoring form field {:?}", other),
        }
    }
    Ok(form)
}

impl FromRequest<AppState> for ChatForm {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            read_multipart(multipart, state.settings.max_file_bytes()).await
        } else if content_type.starts_with("application/json") {
            let Json(fields) = Json::<JsonFields>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(ChatForm {
                query: fields.query,
                agent: flag_value(&fields.agent),
                files: Vec::new(),
            })
        } else {
            let Form(fields) = Form::<FormFields>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(ChatForm {
                query: fields.query,
                agent: parse_flag(&fields.agent),
                files: Vec::new(),
            })
        }
    }
}
