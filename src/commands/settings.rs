use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use std::collections::BTreeMap;

/// Active configuration, API keys masked
pub async fn get_settings(State(state): State<AppState>) -> Json<BTreeMap<&'static str, String>> {
    Json(state.settings.masked())
}
