use crate::commands::form::{ChatForm, Upload};
use crate::db::models::{Document, NewDocument};
use crate::doc_processor;
use crate::error::AppError;
use crate::rag::IngestReport;
use crate::server::AppState;
use crate::vector_store::IndexStats;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ResetReport {
    pub index_name: String,
    pub documents_cleared: usize,
}

/// Reject the whole batch before anything is embedded if one file has an
/// unsupported type.
pub fn check_uploads(files: &[Upload]) -> Result<(), AppError> {
    for upload in files {
        doc_processor::file_type_of(&upload.filename)?;
    }
    Ok(())
}

/// Ingest one upload and record it in the documents table.
pub async fn store_upload(
    state: &AppState,
    filename: &str,
    bytes: &[u8],
    chat_id: Option<i64>,
) -> Result<IngestReport, AppError> {
    let report = state.rag.ingest(filename, bytes, chat_id).await?;
    state.db.insert_document(&NewDocument {
        id: &report.document_id,
        chat_id,
        filename: &report.filename,
        file_type: &report.file_type,
        file_size: report.file_size as i64,
        chunk_count: report.chunk_count as i64,
    })?;
    Ok(report)
}

pub async fn upload_documents(
    State(state): State<AppState>,
    form: ChatForm,
) -> Result<Json<Vec<IngestReport>>, AppError> {
    if form.files.is_empty() {
        return Err(AppError::BadRequest("no files in request".into()));
    }
    check_uploads(&form.files)?;
    let mut reports = Vec::with_capacity(form.files.len());
    for upload in &form.files {
        reports.push(store_upload(&state, &upload.filename, &upload.bytes, None).await?);
    }
    Ok(Json(reports))
}

pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(state.db.list_documents()?))
}

pub async fn index_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    Ok(Json(state.rag.store().stats().await?))
}

pub async fn reset_index(State(state): State<AppState>) -> Result<Json<ResetReport>, AppError> {
    state.rag.store().recreate_index().await?;
    let documents_cleared = state.db.clear_documents()?;
    let stats = state.rag.store().stats().await?;
    log::warn!(
        "index {} recreated, {} document records cleared",
        stats.index_name,
        documents_cleared
    );
    Ok(Json(ResetReport {
        index_name: stats.index_name,
        documents_cleared,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_processor::DocumentError;
    use axum::body::Bytes;

    fn upload(name: &str) -> Upload {
        Upload {
            filename: name.into(),
            bytes: Bytes::from_static(b"text"),
        }
    }

    #[test]
    fn test_check_uploads_rejects_any_unsupported_file() {
        assert!(check_uploads(&[]).is_ok());
        assert!(check_uploads(&[upload("a.txt"), upload("b.PDF"), upload("c.markdown")]).is_ok());
        match check_uploads(&[upload("a.txt"), upload("setup.exe")]) {
            Err(AppError::Document(DocumentError::UnsupportedFileType(ext))) => assert_eq!(ext, "exe"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
